//! Statement nodes and their reachability annotations.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, VarRef};
use crate::scope::ScopeId;
use crate::token::Token;

bitflags! {
    /// How control leaves a statement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Reach: u8 {
        /// Control cannot fall through to the next statement.
        const STOP = 1 << 0;
        /// Every stopping path ends in a return.
        const RETURN = 1 << 1;
    }
}

/// Initializer tree for a variable, consumed by the data emitter for
/// globals and turned into assignment statements for locals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    Single(Expr),
    /// Positional element initializers; missing trailing elements are
    /// zero-filled.
    Multi(Vec<Initializer>),
}

/// One declarator in a `vardecl` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclItem {
    pub var: VarRef,
    /// Assignment statements performing the initialization, if any.
    pub init: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Empty,
    Expr(Expr),
    Block { scope: Option<ScopeId>, stmts: Vec<Stmt> },
    If { cond: Expr, then_stmt: Box<Stmt>, else_stmt: Option<Box<Stmt>> },
    /// `cases` holds the case values in declaration order; `None` is the
    /// default label. `Case` markers refer into it by index.
    Switch { value: Expr, body: Box<Stmt>, cases: Vec<Option<i64>> },
    Case { index: usize },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { pre: Option<Expr>, cond: Option<Expr>, post: Option<Expr>, body: Box<Stmt> },
    Break,
    Continue,
    Goto { label: String },
    Label { name: String, stmt: Box<Stmt>, used: bool },
    Return { value: Option<Expr>, func_end: bool },
    VarDecl { decls: Vec<VarDeclItem> },
    Asm { template: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub reach: Reach,
    pub token: Token,
}

impl Stmt {
    pub fn new(kind: StmtKind, token: Token) -> Self {
        Self { kind, reach: Reach::empty(), token }
    }

    pub fn empty() -> Self {
        Self::new(StmtKind::Empty, Token::none())
    }

    pub fn expr(expr: Expr) -> Self {
        let token = expr.token.clone();
        Self::new(StmtKind::Expr(expr), token)
    }

    pub fn block(scope: Option<ScopeId>, stmts: Vec<Stmt>, token: Token) -> Self {
        Self::new(StmtKind::Block { scope, stmts }, token)
    }

    pub fn ret(value: Option<Expr>, token: Token) -> Self {
        Self::new(StmtKind::Return { value, func_end: false }, token)
    }

    /// Control cannot fall through.
    pub fn stops(&self) -> bool {
        self.reach.contains(Reach::STOP)
    }

    /// True for a case in which a switch's `cases` vector contains this
    /// statement's index with no value, i.e. `default:`.
    pub fn is_default_case(&self, cases: &[Option<i64>]) -> bool {
        match self.kind {
            StmtKind::Case { index } => cases.get(index).map_or(false, |v| v.is_none()),
            _ => false,
        }
    }
}
