//! Error handling utilities for the rvcc compiler

use thiserror::Error;

/// The main error type for rvcc compiler passes.
///
/// Most problems in a source program are recorded as diagnostics and do not
/// surface here; this type covers the conditions that abort a compilation.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("fatal: {message}")]
    Fatal { message: String },

    #[error("too many errors, aborting")]
    TooManyErrors,

    #[error("compilation failed")]
    Failed,

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("internal compiler error: {message}")]
    Internal { message: String },
}

/// Result type alias for rvcc compiler operations
pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Process exit code the driver should report for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
