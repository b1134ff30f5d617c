//! Tokens as handed over by the external lexer.

use rvcc_common::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position plus the raw text of one lexed token.
///
/// The semantic payload (literal value, identifier name, operator kind) has
/// already been consumed by the parser by the time a token reaches this
/// crate; what remains is what diagnostics need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub span: Span,
    pub text: String,
}

impl Token {
    pub fn new(span: Span, text: impl Into<String>) -> Self {
        Self { span, text: text.into() }
    }

    /// Token for synthesized nodes with no source position.
    pub fn none() -> Self {
        Self { span: Span::none(), text: String::new() }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.text)
    }
}
