//! The scope tree: variables, struct tags and enum members.
//!
//! Scopes live in an arena indexed by [`ScopeId`] so that nodes can refer
//! to their owning scope without back-pointers. Scope 0 is the global
//! scope of the translation unit.

use bitflags::bitflags;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::stmt::Initializer;
use crate::structs::StructInfo;
use crate::types::{Type, TypeKind};

/// Index of a scope in the [`Scopes`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

pub const GLOBAL_SCOPE: ScopeId = ScopeId(0);

impl ScopeId {
    pub fn is_global(self) -> bool {
        self == GLOBAL_SCOPE
    }
}

bitflags! {
    /// Storage flags of a variable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct VarStorage: u16 {
        const EXTERN = 1 << 0;
        const STATIC = 1 << 1;
        const INLINE = 1 << 2;
        const ENUM_MEMBER = 1 << 3;
        const PARAM = 1 << 4;
        /// The variable's address has been taken; it must live in memory.
        const REF_TAKEN = 1 << 5;
    }
}

/// One declared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub ty: Type,
    pub storage: VarStorage,
    pub enum_value: Option<i64>,
    /// For a static nested in a function: the name of its global twin.
    pub static_alias: Option<String>,
    /// Initializer, consumed by the data emitter for globals.
    pub init: Option<Initializer>,
}

impl VarInfo {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            storage: VarStorage::empty(),
            enum_value: None,
            static_alias: None,
            init: None,
        }
    }

    pub fn with_storage(mut self, storage: VarStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_init(mut self, init: Initializer) -> Self {
        self.init = Some(init);
        self
    }

    pub fn is_static(&self) -> bool {
        self.storage.contains(VarStorage::STATIC)
    }

    pub fn is_ref_taken(&self) -> bool {
        self.storage.contains(VarStorage::REF_TAKEN)
    }
}

/// One node of the scope tree.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub vars: Vec<VarInfo>,
    pub structs: HashMap<String, StructInfo>,
}

impl Scope {
    fn var(&self, name: &str) -> Option<&VarInfo> {
        self.vars.iter().find(|v| v.name == name)
    }

    fn var_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.vars.iter_mut().find(|v| v.name == name)
    }
}

/// Scope arena for one translation unit.
#[derive(Debug, Clone)]
pub struct Scopes {
    list: Vec<Scope>,
}

impl Scopes {
    /// A fresh arena containing only the global scope.
    pub fn new() -> Self {
        Self { list: vec![Scope::default()] }
    }

    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        self.list.push(Scope { parent: Some(parent), ..Scope::default() });
        ScopeId(self.list.len() as u32 - 1)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.list[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.list[id.0 as usize]
    }

    pub fn add_var(&mut self, scope: ScopeId, var: VarInfo) {
        self.get_mut(scope).vars.push(var);
    }

    /// Look up a variable by walking the scope chain outward from `from`.
    /// Returns the scope it was found in.
    pub fn find_var(&self, from: ScopeId, name: &str) -> Option<(ScopeId, &VarInfo)> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(var) = scope.var(name) {
                return Some((id, var));
            }
            cur = scope.parent;
        }
        None
    }

    pub fn find_var_mut(&mut self, from: ScopeId, name: &str) -> Option<(ScopeId, &mut VarInfo)> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            if self.get(id).var(name).is_some() {
                // Re-borrow mutably now that the owning scope is known.
                return self.get_mut(id).var_mut(name).map(|v| (id, v));
            }
            cur = self.get(id).parent;
        }
        None
    }

    /// A variable in exactly `scope`, not its ancestors.
    pub fn var_in(&self, scope: ScopeId, name: &str) -> Option<&VarInfo> {
        self.get(scope).var(name)
    }

    pub fn var_in_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut VarInfo> {
        self.get_mut(scope).var_mut(name)
    }

    pub fn define_struct(&mut self, scope: ScopeId, name: impl Into<String>, info: StructInfo) {
        self.get_mut(scope).structs.insert(name.into(), info);
    }

    pub fn find_struct(&self, from: ScopeId, name: &str) -> Option<&StructInfo> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let scope = self.get(id);
            if let Some(info) = scope.structs.get(name) {
                return Some(info);
            }
            cur = scope.parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a struct type's body through the scope chain. Returns false if
/// the tag is still incomplete.
pub fn ensure_struct(ty: &mut Type, from: ScopeId, scopes: &Scopes) -> bool {
    match &mut ty.kind {
        TypeKind::Struct(st) => {
            if st.info.is_some() {
                return true;
            }
            let Some(name) = st.name.clone() else { return false };
            match scopes.find_struct(from, &name) {
                Some(info) => {
                    st.info = Some(info.clone());
                    true
                }
                None => false,
            }
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::MemberDecl;

    #[test]
    fn lookup_walks_outward() {
        let mut scopes = Scopes::new();
        scopes.add_var(GLOBAL_SCOPE, VarInfo::new("g", Type::int()));
        let inner = scopes.push(GLOBAL_SCOPE);
        scopes.add_var(inner, VarInfo::new("x", Type::long()));

        let (sid, var) = scopes.find_var(inner, "g").unwrap();
        assert_eq!(sid, GLOBAL_SCOPE);
        assert_eq!(var.ty, Type::int());
        assert!(scopes.var_in(inner, "g").is_none());
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let mut scopes = Scopes::new();
        scopes.add_var(GLOBAL_SCOPE, VarInfo::new("x", Type::int()));
        let inner = scopes.push(GLOBAL_SCOPE);
        scopes.add_var(inner, VarInfo::new("x", Type::double()));

        let (sid, var) = scopes.find_var(inner, "x").unwrap();
        assert_eq!(sid, inner);
        assert!(var.ty.is_flonum());
    }

    #[test]
    fn ensure_struct_resolves_forward_reference() {
        let mut scopes = Scopes::new();
        let info = StructInfo::new(vec![MemberDecl::plain("x", Type::int())], false);
        scopes.define_struct(GLOBAL_SCOPE, "S", info);

        let mut ty = Type::new(TypeKind::Struct(crate::types::StructType {
            name: Some("S".to_string()),
            is_union: false,
            info: None,
        }));
        assert!(ensure_struct(&mut ty, GLOBAL_SCOPE, &scopes));
        assert_eq!(ty.size(), 4);

        let mut unknown = Type::new(TypeKind::Struct(crate::types::StructType {
            name: Some("T".to_string()),
            is_union: false,
            info: None,
        }));
        assert!(!ensure_struct(&mut unknown, GLOBAL_SCOPE, &scopes));
    }
}
