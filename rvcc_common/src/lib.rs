//! Shared utilities for the rvcc compiler crates.

pub mod diagnostics;
pub mod error;
pub mod source;
pub mod span;

pub use diagnostics::{Diagnostic, Diagnostics, Severity, MAX_ERROR_COUNT};
pub use error::{CompileError, CompileResult};
pub use source::{FileId, SourceFile, SourceMap};
pub use span::{Span, Spanned};
