//! One compiler invocation: sources, diagnostics and the exit status.

use rvcc_common::{CompileError, Diagnostics, SourceMap};

/// Owns everything a single compilation accumulates. Diagnostics are
/// rendered to stderr in recording order (source order within a file).
#[derive(Debug, Default)]
pub struct Session {
    pub sources: SourceMap,
    pub diags: Diagnostics,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.diags.warnings_as_errors = enabled;
        self
    }

    /// Print every diagnostic to stderr.
    pub fn report(&self) {
        if !self.diags.is_empty() {
            eprint!("{}", self.diags.render_all(&self.sources));
        }
    }

    /// 0 on success, 1 on any recorded error.
    pub fn exit_code(&self) -> i32 {
        if self.diags.has_errors() {
            1
        } else {
            0
        }
    }

    /// Exit code for a pipeline error.
    pub fn exit_code_for(&self, error: &CompileError) -> i32 {
        error.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvcc_common::Span;

    #[test]
    fn exit_code_follows_errors() {
        let mut session = Session::new();
        assert_eq!(session.exit_code(), 0);
        session.diags.warning("w", Span::none());
        assert_eq!(session.exit_code(), 0);
        session.diags.error("e", Span::none());
        assert_eq!(session.exit_code(), 1);
    }

    #[test]
    fn werror_promotes_warnings() {
        let mut session = Session::new().with_warnings_as_errors(true);
        session.diags.warning("w", Span::none());
        assert_eq!(session.exit_code(), 1);
    }
}
