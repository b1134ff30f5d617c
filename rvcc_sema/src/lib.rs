//! Semantic elaboration for the rvcc compiler.
//!
//! The external parser drives [`Elaborator`] bottom-up as it reduces: each
//! constructor returns a fully typed, canonicalized node, folding constants
//! and rewriting compound assignments, `++`/`--` and bit-field stores into
//! pure reads and writes. [`reach`] runs over finished function bodies,
//! and [`inline`] replaces qualifying calls with renamed clones of the
//! callee's body.

pub mod bitfield;
pub mod elaborate;
pub mod inline;
pub mod reach;

pub use elaborate::Elaborator;
pub use inline::can_inline;
pub use reach::{check_funcend_return, check_reach};
