//! The C type model and its size, promotion and cast rules.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::structs::StructInfo;

/// Integer kinds, ordered by conversion rank. `Enum` ranks with `Int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FixnumKind {
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Enum,
}

impl FixnumKind {
    pub fn size(self) -> usize {
        match self {
            FixnumKind::Char => 1,
            FixnumKind::Short => 2,
            FixnumKind::Int | FixnumKind::Enum => 4,
            FixnumKind::Long | FixnumKind::LongLong => 8,
        }
    }

    /// Conversion rank used by the usual arithmetic conversions.
    pub fn rank(self) -> u8 {
        match self {
            FixnumKind::Char => 0,
            FixnumKind::Short => 1,
            FixnumKind::Int | FixnumKind::Enum => 2,
            FixnumKind::Long => 3,
            FixnumKind::LongLong => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlonumKind {
    Float,
    Double,
    LongDouble,
}

impl FlonumKind {
    pub fn size(self) -> usize {
        match self {
            FlonumKind::Float => 4,
            // long double is treated as double on this target.
            FlonumKind::Double | FlonumKind::LongDouble => 8,
        }
    }
}

bitflags! {
    /// Type qualifier bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
        const VOLATILE = 1 << 1;
    }
}

/// A function signature. `params` of `None` means unspecified (old-style).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    pub ret: Type,
    pub params: Option<Vec<Type>>,
    pub vaargs: bool,
}

/// A struct or union reference. `info` is `None` while the tag is only
/// forward-declared; `ensure_struct` resolves it through the scope chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    pub name: Option<String>,
    pub is_union: bool,
    pub info: Option<StructInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    Fixnum { kind: FixnumKind, unsigned: bool },
    Flonum(FlonumKind),
    Ptr(Box<Type>),
    Array { elem: Box<Type>, len: Option<usize> },
    Struct(StructType),
    Func(Box<FuncType>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub qualifiers: Qualifiers,
}

pub const POINTER_SIZE: usize = 8;

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind, qualifiers: Qualifiers::empty() }
    }

    pub fn with_qualifiers(mut self, qualifiers: Qualifiers) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn fixnum(kind: FixnumKind, unsigned: bool) -> Self {
        Self::new(TypeKind::Fixnum { kind, unsigned })
    }

    pub fn char_type() -> Self {
        Self::fixnum(FixnumKind::Char, false)
    }

    pub fn int() -> Self {
        Self::fixnum(FixnumKind::Int, false)
    }

    pub fn long() -> Self {
        Self::fixnum(FixnumKind::Long, false)
    }

    /// The signed type that holds a pointer difference.
    pub fn ssize() -> Self {
        Self::long()
    }

    /// The unsigned type that holds an object size.
    pub fn size_type() -> Self {
        Self::fixnum(FixnumKind::Long, true)
    }

    pub fn bool_type() -> Self {
        Self::int()
    }

    pub fn flonum(kind: FlonumKind) -> Self {
        Self::new(TypeKind::Flonum(kind))
    }

    pub fn double() -> Self {
        Self::flonum(FlonumKind::Double)
    }

    pub fn ptr(base: Type) -> Self {
        Self::new(TypeKind::Ptr(Box::new(base)))
    }

    pub fn array(elem: Type, len: Option<usize>) -> Self {
        Self::new(TypeKind::Array { elem: Box::new(elem), len })
    }

    pub fn func(ret: Type, params: Option<Vec<Type>>, vaargs: bool) -> Self {
        Self::new(TypeKind::Func(Box::new(FuncType { ret, params, vaargs })))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_fixnum(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { .. })
    }

    pub fn is_flonum(&self) -> bool {
        matches!(self.kind, TypeKind::Flonum(_))
    }

    pub fn is_number(&self) -> bool {
        self.is_fixnum() || self.is_flonum()
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { unsigned: true, .. })
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self.kind, TypeKind::Ptr(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn ptr_or_array(&self) -> bool {
        self.is_ptr() || self.is_array()
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind, TypeKind::Func(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    /// Primitive for the purpose of register passing and inlining:
    /// void, a number, or a pointer.
    pub fn is_prim(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Void | TypeKind::Fixnum { .. } | TypeKind::Flonum(_) | TypeKind::Ptr(_)
        )
    }

    /// The pointee of a pointer or the element of an array.
    pub fn base(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Ptr(base) => Some(base),
            TypeKind::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    pub fn func_type(&self) -> Option<&FuncType> {
        match &self.kind {
            TypeKind::Func(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn struct_type(&self) -> Option<&StructType> {
        match &self.kind {
            TypeKind::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn struct_info(&self) -> Option<&StructInfo> {
        self.struct_type().and_then(|st| st.info.as_ref())
    }

    /// Size in bytes. Incomplete structs and unsized arrays report 0;
    /// callers diagnose those before asking.
    pub fn size(&self) -> usize {
        match &self.kind {
            TypeKind::Void => 1,
            TypeKind::Fixnum { kind, .. } => kind.size(),
            TypeKind::Flonum(kind) => kind.size(),
            TypeKind::Ptr(_) | TypeKind::Func(_) => POINTER_SIZE,
            TypeKind::Array { elem, len } => elem.size() * len.unwrap_or(0),
            TypeKind::Struct(st) => st.info.as_ref().map_or(0, |info| info.size),
        }
    }

    pub fn align(&self) -> usize {
        match &self.kind {
            TypeKind::Void => 1,
            TypeKind::Fixnum { kind, .. } => kind.size(),
            TypeKind::Flonum(kind) => kind.size(),
            TypeKind::Ptr(_) | TypeKind::Func(_) => POINTER_SIZE,
            TypeKind::Array { elem, .. } => elem.align(),
            TypeKind::Struct(st) => st.info.as_ref().map_or(1, |info| info.align),
        }
    }

    /// `char[]`, the type string literals decay into.
    pub fn is_char_array(&self) -> bool {
        matches!(
            &self.kind,
            TypeKind::Array { elem, .. }
                if matches!(elem.kind, TypeKind::Fixnum { kind: FixnumKind::Char, .. })
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifiers.contains(Qualifiers::CONST) {
            write!(f, "const ")?;
        }
        if self.qualifiers.contains(Qualifiers::VOLATILE) {
            write!(f, "volatile ")?;
        }
        match &self.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Fixnum { kind, unsigned } => {
                if *unsigned {
                    write!(f, "unsigned ")?;
                }
                let name = match kind {
                    FixnumKind::Char => "char",
                    FixnumKind::Short => "short",
                    FixnumKind::Int => "int",
                    FixnumKind::Long => "long",
                    FixnumKind::LongLong => "long long",
                    FixnumKind::Enum => "enum",
                };
                write!(f, "{}", name)
            }
            TypeKind::Flonum(kind) => {
                let name = match kind {
                    FlonumKind::Float => "float",
                    FlonumKind::Double => "double",
                    FlonumKind::LongDouble => "long double",
                };
                write!(f, "{}", name)
            }
            TypeKind::Ptr(base) => write!(f, "{}*", base),
            TypeKind::Array { elem, len } => match len {
                Some(n) => write!(f, "{}[{}]", elem, n),
                None => write!(f, "{}[]", elem),
            },
            TypeKind::Struct(st) => {
                let tag = if st.is_union { "union" } else { "struct" };
                match &st.name {
                    Some(name) => write!(f, "{} {}", tag, name),
                    None => write!(f, "{} <anonymous>", tag),
                }
            }
            TypeKind::Func(ft) => {
                write!(f, "{}(", ft.ret)?;
                if let Some(params) = &ft.params {
                    for (i, p) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", p)?;
                    }
                    if ft.vaargs {
                        write!(f, ", ...")?;
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// Build a fixnum type from its pieces.
pub fn get_fixnum_type(kind: FixnumKind, unsigned: bool, qualifiers: Qualifiers) -> Type {
    Type::fixnum(kind, unsigned).with_qualifiers(qualifiers)
}

/// Exact type equality, qualifiers included.
pub fn same_type(a: &Type, b: &Type) -> bool {
    a.qualifiers == b.qualifiers && same_type_without_qualifier(a, b)
}

/// Type equality ignoring the top-level qualifiers of `a` and `b` only;
/// qualifiers nested deeper still compare exactly.
pub fn same_type_without_qualifier(a: &Type, b: &Type) -> bool {
    match (&a.kind, &b.kind) {
        (TypeKind::Void, TypeKind::Void) => true,
        (
            TypeKind::Fixnum { kind: ka, unsigned: ua },
            TypeKind::Fixnum { kind: kb, unsigned: ub },
        ) => ka.rank() == kb.rank() && ua == ub,
        (TypeKind::Flonum(ka), TypeKind::Flonum(kb)) => ka.size() == kb.size(),
        (TypeKind::Ptr(pa), TypeKind::Ptr(pb)) => same_type(pa, pb),
        (TypeKind::Array { elem: ea, len: la }, TypeKind::Array { elem: eb, len: lb }) => {
            la == lb && same_type(ea, eb)
        }
        (TypeKind::Struct(sa), TypeKind::Struct(sb)) => {
            sa.is_union == sb.is_union
                && match (&sa.name, &sb.name) {
                    (Some(na), Some(nb)) => na == nb,
                    // Anonymous structs compare by body.
                    (None, None) => sa.info == sb.info,
                    _ => false,
                }
        }
        (TypeKind::Func(fa), TypeKind::Func(fb)) => {
            if !same_type(&fa.ret, &fb.ret) || fa.vaargs != fb.vaargs {
                return false;
            }
            match (&fa.params, &fb.params) {
                (Some(pa), Some(pb)) => {
                    pa.len() == pb.len() && pa.iter().zip(pb).all(|(x, y)| same_type(x, y))
                }
                (None, None) => true,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Cast legality. `zero` is true when the source expression is a literal
/// zero; `is_explicit` when the cast was written in the source.
pub fn can_cast(dst: &Type, src: &Type, zero: bool, is_explicit: bool) -> bool {
    if same_type_without_qualifier(dst, src) {
        return true;
    }
    match (&dst.kind, &src.kind) {
        // Anything can be discarded.
        (TypeKind::Void, _) => true,
        (_, TypeKind::Void) => false,
        // An array can never be a destination.
        (TypeKind::Array { .. }, _) => false,
        (TypeKind::Fixnum { .. } | TypeKind::Flonum(_), TypeKind::Fixnum { .. }) => true,
        (TypeKind::Fixnum { .. } | TypeKind::Flonum(_), TypeKind::Flonum(_)) => true,
        // Pointer to integer needs an explicit cast.
        (TypeKind::Fixnum { .. }, TypeKind::Ptr(_) | TypeKind::Array { .. } | TypeKind::Func(_)) => {
            is_explicit
        }
        (TypeKind::Ptr(_), TypeKind::Fixnum { .. }) => zero || is_explicit,
        // Pointer conversions are legal; the elaborator warns on
        // incompatible pointees.
        (TypeKind::Ptr(_), TypeKind::Ptr(_)) => true,
        // Array and function values decay.
        (TypeKind::Ptr(_), TypeKind::Array { .. }) => true,
        (TypeKind::Ptr(_), TypeKind::Func(_)) => true,
        _ => false,
    }
}

/// Array-of-T decays to pointer-to-T; other types pass through.
pub fn array_to_ptr(ty: &Type) -> Type {
    match &ty.kind {
        TypeKind::Array { elem, .. } => Type::ptr((**elem).clone()),
        _ => ty.clone(),
    }
}

/// Pointer-to-`ty`.
pub fn ptrof(ty: &Type) -> Type {
    Type::ptr(ty.clone())
}

/// Narrow `value` to `size` bytes under two's complement, then interpret
/// it with the given signedness. All constant folding goes through here.
pub fn wrap_value(value: i64, size: usize, unsigned: bool) -> i64 {
    let bits = size * 8;
    if bits >= 64 {
        return value;
    }
    let mask = (1i64 << bits) - 1;
    let v = value & mask;
    if unsigned {
        v
    } else {
        let sign = 1i64 << (bits - 1);
        (v ^ sign).wrapping_sub(sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(300, 1, true, 44; "u8 wraps")]
    #[test_case(300, 1, false, 44; "i8 positive wrap")]
    #[test_case(200, 1, false, -56; "i8 sign wrap")]
    #[test_case(200, 1, true, 200; "u8 in range")]
    #[test_case(-1, 2, true, 65535; "u16 from minus one")]
    #[test_case(0x1_0000_0001, 4, false, 1; "i32 truncates high bits")]
    #[test_case(0x8000_0000, 4, false, -0x8000_0000; "i32 sign bit")]
    #[test_case(-1, 8, true, -1; "u64 keeps bit pattern")]
    fn wrap(value: i64, size: usize, unsigned: bool, expected: i64) {
        assert_eq!(wrap_value(value, size, unsigned), expected);
    }

    #[test]
    fn sizes_and_alignment() {
        assert_eq!(Type::char_type().size(), 1);
        assert_eq!(Type::fixnum(FixnumKind::Short, false).size(), 2);
        assert_eq!(Type::int().size(), 4);
        assert_eq!(Type::long().size(), 8);
        assert_eq!(Type::ptr(Type::int()).size(), 8);
        assert_eq!(Type::array(Type::int(), Some(5)).size(), 20);
        assert_eq!(Type::array(Type::int(), Some(5)).align(), 4);
        assert_eq!(Type::flonum(FlonumKind::LongDouble).size(), 8);
    }

    #[test]
    fn qualifier_stripping_is_top_level_only() {
        let cint = Type::int().with_qualifiers(Qualifiers::CONST);
        assert!(!same_type(&cint, &Type::int()));
        assert!(same_type_without_qualifier(&cint, &Type::int()));

        // const int* vs int*: pointee qualifiers are below the top level,
        // so they still distinguish the pointers.
        let p_cint = Type::ptr(cint);
        let p_int = Type::ptr(Type::int());
        assert!(!same_type_without_qualifier(&p_cint, &p_int));
    }

    #[test_case(Type::int(), Type::double(), false, false, true; "numeric to numeric")]
    #[test_case(Type::void(), Type::int(), false, false, true; "anything to void")]
    #[test_case(Type::int(), Type::void(), false, false, false; "void to value")]
    #[test_case(Type::ptr(Type::int()), Type::int(), true, false, true; "zero to pointer")]
    #[test_case(Type::ptr(Type::int()), Type::int(), false, false, false; "nonzero int to pointer")]
    #[test_case(Type::ptr(Type::int()), Type::int(), false, true, true; "explicit int to pointer")]
    #[test_case(Type::long(), Type::ptr(Type::int()), false, true, true; "explicit pointer to int")]
    #[test_case(Type::long(), Type::ptr(Type::int()), false, false, false; "implicit pointer to int")]
    #[test_case(Type::array(Type::int(), Some(3)), Type::int(), false, true, false; "array destination")]
    #[test_case(Type::ptr(Type::void()), Type::ptr(Type::int()), false, false, true; "pointer to void pointer")]
    #[test_case(Type::ptr(Type::int()), Type::array(Type::int(), Some(3)), false, false, true; "array decay")]
    #[test_case(Type::double(), Type::ptr(Type::int()), false, true, false; "pointer to flonum")]
    fn cast_table(dst: Type, src: Type, zero: bool, explicit: bool, ok: bool) {
        assert_eq!(can_cast(&dst, &src, zero, explicit), ok);
    }

    #[test]
    fn function_type_display() {
        let ft = Type::func(Type::int(), Some(vec![Type::ptr(Type::char_type())]), true);
        assert_eq!(ft.to_string(), "int(char*, ...)");
    }
}
