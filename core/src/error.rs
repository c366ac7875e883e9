//! Error types for Zflow.
//!
//! Each layer has its own error enum; [`ZflowError`] gathers them for
//! callers that drive the whole pipeline (script text to event stream).

use thiserror::Error;

use crate::executor::ExecError;
use crate::lexer::LexError;
use crate::parser::ParseError;

/// Result type alias for Zflow operations.
pub type Result<T> = std::result::Result<T, ZflowError>;

#[derive(Error, Debug)]
pub enum ZflowError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ZflowError {
    /// Stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ZflowError::Lex(_) => "LEX_ERROR",
            ZflowError::Parse(_) => "PARSE_ERROR",
            ZflowError::Exec(ExecError::Backend(_)) => "BACKEND_ERROR",
            ZflowError::Exec(ExecError::Cancelled) => "CANCELLED",
            ZflowError::Exec(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the script itself is at fault. Such errors are never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ZflowError::Lex(_) | ZflowError::Parse(_))
    }
}
