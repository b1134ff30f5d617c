//! Diagnostic message handling for the rvcc compiler.
//!
//! Elaboration and lowering never unwind on a bad program: they record a
//! diagnostic here, substitute a dummy node, and keep walking. Only the
//! fatal level and the accumulated-error threshold abort a compilation,
//! and both are reported to the driver as [`crate::CompileError`] values
//! rather than by exiting the process.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceMap;
use crate::span::Span;

/// Compilation aborts once this many errors have been recorded.
pub const MAX_ERROR_COUNT: usize = 25;

/// Severity level for diagnostic messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// A diagnostic message with location and severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Error, message: message.into(), span }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Warning, message: message.into(), span }
    }

    pub fn fatal(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Fatal, message: message.into(), span }
    }

    /// Render as `file(line): [warning:] message` followed by the source
    /// line with a caret under the offending token.
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        let file = sources.name(self.span.file);
        let prefix = match self.severity {
            Severity::Warning => "warning: ",
            _ => "",
        };
        if self.span.is_none() {
            out.push_str(&format!("{}: {}{}", file, prefix, self.message));
            return out;
        }
        out.push_str(&format!("{}({}): {}{}", file, self.span.line, prefix, self.message));
        if let Some(line) = sources.get(self.span.file).and_then(|f| f.line(self.span.line)) {
            out.push('\n');
            out.push_str(line);
            out.push('\n');
            let col = self.span.column.max(1) as usize - 1;
            let width = (self.span.len as usize).max(1);
            out.push_str(&" ".repeat(col));
            out.push_str(&"^".repeat(width));
        }
        out
    }
}

/// Collection of diagnostic messages
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
    /// Count warnings against the error threshold.
    pub warnings_as_errors: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::error(message, span));
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::warning(message, span));
    }

    pub fn fatal(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::fatal(message, span));
    }

    /// Errors recorded so far, including warnings when they are promoted.
    pub fn error_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|d| match d.severity {
                Severity::Error | Severity::Fatal => true,
                Severity::Warning => self.warnings_as_errors,
            })
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.messages.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn has_fatal(&self) -> bool {
        self.messages.iter().any(|d| d.severity == Severity::Fatal)
    }

    /// True once the error threshold is reached; callers stop elaborating.
    pub fn at_limit(&self) -> bool {
        self.error_count() >= MAX_ERROR_COUNT
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    /// Render every message in recording order.
    pub fn render_all(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        for d in &self.messages {
            out.push_str(&d.render(sources));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMap;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_points_caret_at_token() {
        let mut sources = SourceMap::new();
        let file = sources.add("a.c", "int x = y;\n");
        let d = Diagnostic::error("`y` undeclared", Span::new(file, 1, 9, 1));
        assert_eq!(d.render(&sources), "a.c(1): `y` undeclared\nint x = y;\n        ^");
    }

    #[test]
    fn warning_prefix() {
        let mut sources = SourceMap::new();
        let file = sources.add("a.c", "x;\n");
        let d = Diagnostic::warning("unreachable statement", Span::new(file, 1, 1, 1));
        assert!(d.render(&sources).starts_with("a.c(1): warning: "));
    }

    #[test]
    fn threshold_counts_promoted_warnings() {
        let mut diags = Diagnostics::new().with_warnings_as_errors(true);
        for _ in 0..MAX_ERROR_COUNT {
            diags.warning("w", Span::none());
        }
        assert!(diags.at_limit());
        assert!(diags.has_errors());

        let mut relaxed = Diagnostics::new();
        relaxed.warning("w", Span::none());
        assert!(!relaxed.has_errors());
    }
}
