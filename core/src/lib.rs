//! Zodel core: the Zflow orchestration language
//!
//! Script text is tokenized by [`lexer`], turned into an [`Environment`] and a
//! [`Workflow`] by [`parser`], and run by the [`executor`] against any
//! [`Backend`], producing a stream of [`OutEvent`]s.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod service;
pub mod types;

// Re-export main types
pub use types::*;

pub use backend::{Backend, BackendError, ChunkStream, InvokeRequest};
pub use config::Config;
pub use error::{Result, ZflowError};
pub use events::OutEvent;
pub use executor::{EventStream, ExecError, Executor, RunHandle};
pub use parser::{parse_script, Script};
pub use service::ZflowService;
