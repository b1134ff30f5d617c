//! Typed expression nodes.

use serde::{Deserialize, Serialize};

use crate::scope::ScopeId;
use crate::stmt::Stmt;
use crate::token::Token;
use crate::types::Type;

/// Binary operators after elaboration. Compound assignments and `++`/`--`
/// never appear here; the elaborator rewrites them into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
    Assign,
    Comma,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Mirror a comparison for swapped operands: `<`↔`>`, `<=`↔`>=`.
    pub fn swap_cmp(self) -> Self {
        match self {
            BinOp::Lt => BinOp::Gt,
            BinOp::Le => BinOp::Ge,
            BinOp::Gt => BinOp::Lt,
            BinOp::Ge => BinOp::Le,
            other => other,
        }
    }

    /// Logical negation of a comparison.
    pub fn negate_cmp(self) -> Self {
        match self {
            BinOp::Eq => BinOp::Ne,
            BinOp::Ne => BinOp::Eq,
            BinOp::Lt => BinOp::Ge,
            BinOp::Ge => BinOp::Lt,
            BinOp::Le => BinOp::Gt,
            BinOp::Gt => BinOp::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    BitNot,
    /// Address-of.
    Ref,
    Deref,
    /// Value conversion; the node type is the cast destination.
    Cast,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// A variable reference: name plus the scope it resolved in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    pub scope: ScopeId,
}

impl VarRef {
    pub fn new(name: impl Into<String>, scope: ScopeId) -> Self {
        Self { name: name.into(), scope }
    }
}

/// A string literal, stored with its terminating NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrLit {
    pub bytes: Vec<u8>,
}

impl StrLit {
    pub fn new(text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Self { bytes }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    FixNum(i64),
    FloNum(f64),
    Str(StrLit),
    Var(VarRef),
    Bin { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, sub: Box<Expr> },
    Ternary { cond: Box<Expr>, then_val: Box<Expr>, else_val: Box<Expr> },
    /// Member access; `index` points into the target struct's member list.
    Member { target: Box<Expr>, index: usize },
    Funcall { func: Box<Expr>, args: Vec<Expr> },
    /// A call replaced by a renamed clone of the callee's body.
    InlinedCall { name: String, args: Vec<Expr>, params: Vec<VarRef>, body: Box<Stmt> },
    /// Compound literal: a synthesized variable plus its init statements.
    CompoundLit { var: VarRef, inits: Vec<Stmt> },
    /// GNU statement expression; the value is the trailing expression.
    StmtExpr(Box<Stmt>),
}

/// A typed expression. Invariant: `ty` is valid after elaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub token: Token,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, token: Token) -> Self {
        Self { kind, ty, token }
    }

    pub fn fixnum(value: i64, ty: Type, token: Token) -> Self {
        Self::new(ExprKind::FixNum(value), ty, token)
    }

    pub fn flonum(value: f64, ty: Type, token: Token) -> Self {
        Self::new(ExprKind::FloNum(value), ty, token)
    }

    pub fn var(name: impl Into<String>, scope: ScopeId, ty: Type, token: Token) -> Self {
        Self::new(ExprKind::Var(VarRef::new(name, scope)), ty, token)
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr, ty: Type, token: Token) -> Self {
        Self::new(ExprKind::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, token)
    }

    pub fn unary(op: UnOp, sub: Expr, ty: Type, token: Token) -> Self {
        Self::new(ExprKind::Unary { op, sub: Box::new(sub) }, ty, token)
    }

    pub fn cast(sub: Expr, to: Type, token: Token) -> Self {
        Self::unary(UnOp::Cast, sub, to, token)
    }

    pub fn is_fixnum_const(&self) -> bool {
        matches!(self.kind, ExprKind::FixNum(_))
    }

    pub fn is_flonum_const(&self) -> bool {
        matches!(self.kind, ExprKind::FloNum(_))
    }

    pub fn is_const(&self) -> bool {
        self.is_fixnum_const() || self.is_flonum_const()
    }

    pub fn fixnum_value(&self) -> Option<i64> {
        match self.kind {
            ExprKind::FixNum(v) => Some(v),
            _ => None,
        }
    }

    /// Literal zero, the null-pointer constant.
    pub fn is_zero(&self) -> bool {
        matches!(self.kind, ExprKind::FixNum(0))
    }

    /// Designates an object in memory.
    pub fn is_lval(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_)
                | ExprKind::Member { .. }
                | ExprKind::CompoundLit { .. }
                | ExprKind::Unary { op: UnOp::Deref, .. }
        )
    }
}
