//! Core data types shared by the parser and the executor.
//!
//! - [`env`]: the variable environment (models, prompts, inputs)
//! - [`ast`]: the workflow tree and source spans

pub mod ast;
pub mod env;

pub use ast::{Node, OperatorCall, Span, Stage, Workflow};
pub use env::{Environment, ModelId, VarKind, VarValue, Variable};
