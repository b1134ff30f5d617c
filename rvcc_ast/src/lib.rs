//! Typed abstract syntax tree for the rvcc compiler.
//!
//! The lexer and parser are external collaborators; they hand this crate
//! tokens and call the constructors in `rvcc_sema` to produce the typed
//! nodes defined here. Everything downstream (reachability, inline
//! expansion, IR lowering) consumes this representation.

pub mod expr;
pub mod func;
pub mod scope;
pub mod stmt;
pub mod structs;
pub mod token;
pub mod types;

pub use expr::{BinOp, Expr, ExprKind, StrLit, UnOp, VarRef};
pub use func::{Declaration, Function, Program};
pub use scope::{ensure_struct, Scope, ScopeId, Scopes, VarInfo, VarStorage, GLOBAL_SCOPE};
pub use stmt::{Initializer, Reach, Stmt, StmtKind, VarDeclItem};
pub use structs::{BitFieldInfo, MemberDecl, MemberInfo, StructInfo};
pub use token::Token;
pub use types::{
    FixnumKind, FlonumKind, FuncType, Qualifiers, StructType, Type, TypeKind,
};
