//! Functions and the translation unit.

use hashbrown::HashMap;
use rvcc_common::Span;

use crate::expr::VarRef;
use crate::scope::{ScopeId, Scopes};
use crate::stmt::Stmt;
use crate::types::Type;

/// A function definition or declaration. Parameters live in `scopes[0]`.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Always a `TypeKind::Func`.
    pub ty: Type,
    /// Scopes created while parsing the body, in creation order.
    pub scopes: Vec<ScopeId>,
    pub body: Option<Stmt>,
    /// Names of parameters in declaration order.
    pub params: Vec<String>,
    /// Goto targets referenced in the body.
    pub gotos: Vec<(String, Span)>,
    /// Declared labels; the flag records whether each is targeted.
    pub labels: HashMap<String, bool>,
    pub is_static: bool,
    pub is_inline: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            scopes: Vec::new(),
            body: None,
            params: Vec::new(),
            gotos: Vec::new(),
            labels: HashMap::new(),
            is_static: false,
            is_inline: false,
        }
    }

    pub fn top_scope(&self) -> Option<ScopeId> {
        self.scopes.first().copied()
    }

    pub fn param_refs(&self) -> Vec<VarRef> {
        let scope = self.top_scope().unwrap_or(crate::scope::GLOBAL_SCOPE);
        self.params.iter().map(|name| VarRef::new(name.clone(), scope)).collect()
    }

    pub fn ret_type(&self) -> &Type {
        &self.ty.func_type().expect("function must have a function type").ret
    }

    pub fn is_vaargs(&self) -> bool {
        self.ty.func_type().map_or(false, |ft| ft.vaargs)
    }
}

/// A top-level declaration in source order.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// A global variable; its `VarInfo` lives in the global scope.
    Var(VarRef),
    Func(Function),
}

/// One elaborated translation unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub scopes: Scopes,
    pub decls: Vec<Declaration>,
}

impl Program {
    pub fn new() -> Self {
        Self { scopes: Scopes::new(), decls: Vec::new() }
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.decls.iter().filter_map(|d| match d {
            Declaration::Func(f) => Some(f),
            _ => None,
        })
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|f| f.name == name)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
