//! Struct and union layout, including bit-field packing.

use serde::{Deserialize, Serialize};

use crate::types::{FixnumKind, Type, TypeKind};

/// Placement of a bit-field inside its backing integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldInfo {
    pub base_kind: FixnumKind,
    /// Bit position from the least significant bit.
    pub position: u32,
    pub width: u32,
}

impl BitFieldInfo {
    /// Unshifted mask covering `width` bits.
    pub fn mask(&self) -> i64 {
        if self.width >= 64 {
            -1
        } else {
            (1i64 << self.width) - 1
        }
    }
}

/// One struct or union member after layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: Option<String>,
    pub ty: Type,
    pub offset: usize,
    pub bitfield: Option<BitFieldInfo>,
}

/// A member as declared, before layout.
#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub name: Option<String>,
    pub ty: Type,
    /// `Some(0)` closes the current bit-field unit without declaring a member.
    pub bit_width: Option<u32>,
}

impl MemberDecl {
    pub fn plain(name: impl Into<String>, ty: Type) -> Self {
        Self { name: Some(name.into()), ty, bit_width: None }
    }

    pub fn bitfield(name: impl Into<String>, ty: Type, width: u32) -> Self {
        Self { name: Some(name.into()), ty, bit_width: Some(width) }
    }
}

/// A laid-out struct or union body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructInfo {
    pub members: Vec<MemberInfo>,
    pub is_union: bool,
    pub size: usize,
    pub align: usize,
    /// Last member is an array of unknown length.
    pub is_flexible: bool,
}

fn align_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

impl StructInfo {
    pub fn new(decls: Vec<MemberDecl>, is_union: bool) -> Self {
        let mut members = Vec::with_capacity(decls.len());
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut max_size = 0usize;
        // Open bit-field unit: (unit offset, unit size, next free bit).
        let mut unit: Option<(usize, usize, u32)> = None;
        let mut is_flexible = false;

        let count = decls.len();
        for (i, decl) in decls.into_iter().enumerate() {
            let msize = decl.ty.size();
            let malign = decl.ty.align().max(1);

            if let Some(width) = decl.bit_width {
                let base_kind = match decl.ty.kind {
                    TypeKind::Fixnum { kind, .. } => kind,
                    _ => FixnumKind::Int,
                };
                if width == 0 {
                    // Zero width closes the open unit, declaring nothing.
                    if let Some((uofs, usize_, _)) = unit.take() {
                        offset = uofs + usize_;
                    }
                    continue;
                }
                let bits = (msize * 8) as u32;
                let position = match unit {
                    Some((uofs, usz, pos)) if usz == msize && pos + width <= bits => {
                        unit = Some((uofs, usz, pos + width));
                        members.push(MemberInfo {
                            name: decl.name,
                            ty: decl.ty,
                            offset: uofs,
                            bitfield: Some(BitFieldInfo { base_kind, position: pos, width }),
                        });
                        max_align = max_align.max(malign);
                        max_size = max_size.max(msize);
                        continue;
                    }
                    _ => {
                        if let Some((uofs, usz, _)) = unit.take() {
                            offset = uofs + usz;
                        }
                        if !is_union {
                            offset = align_to(offset, malign);
                        }
                        let uofs = if is_union { 0 } else { offset };
                        unit = Some((uofs, msize, width));
                        0
                    }
                };
                max_align = max_align.max(malign);
                max_size = max_size.max(msize);
                members.push(MemberInfo {
                    name: decl.name,
                    ty: decl.ty,
                    offset: unit.map(|(o, _, _)| o).unwrap_or(0),
                    bitfield: Some(BitFieldInfo { base_kind, position, width }),
                });
                continue;
            }

            // A plain member closes any open bit-field unit.
            if let Some((uofs, usz, _)) = unit.take() {
                offset = uofs + usz;
            }

            let unsized_array =
                matches!(&decl.ty.kind, TypeKind::Array { len: None, .. });
            if unsized_array && i == count - 1 && !is_union {
                is_flexible = true;
            }

            let mofs = if is_union {
                0
            } else {
                offset = align_to(offset, malign);
                offset
            };
            members.push(MemberInfo { name: decl.name, ty: decl.ty, offset: mofs, bitfield: None });
            if !is_union {
                offset += msize;
            }
            max_align = max_align.max(malign);
            max_size = max_size.max(msize);
        }

        if let Some((uofs, usz, _)) = unit.take() {
            offset = uofs + usz;
        }

        let size = if is_union {
            align_to(max_size, max_align)
        } else {
            align_to(offset, max_align)
        };

        Self { members, is_union, size, align: max_align, is_flexible }
    }

    /// Index of a named member.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FixnumKind, Type};
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_struct_layout() {
        // struct { char c; int i; short s; }
        let info = StructInfo::new(
            vec![
                MemberDecl::plain("c", Type::char_type()),
                MemberDecl::plain("i", Type::int()),
                MemberDecl::plain("s", Type::fixnum(FixnumKind::Short, false)),
            ],
            false,
        );
        assert_eq!(info.members[0].offset, 0);
        assert_eq!(info.members[1].offset, 4);
        assert_eq!(info.members[2].offset, 8);
        assert_eq!(info.size, 12);
        assert_eq!(info.align, 4);
    }

    #[test]
    fn union_layout() {
        let info = StructInfo::new(
            vec![
                MemberDecl::plain("c", Type::char_type()),
                MemberDecl::plain("l", Type::long()),
            ],
            true,
        );
        assert_eq!(info.members[0].offset, 0);
        assert_eq!(info.members[1].offset, 0);
        assert_eq!(info.size, 8);
        assert_eq!(info.align, 8);
    }

    #[test]
    fn bitfields_share_backing_int() {
        // struct S { int a:3, b:5; }
        let info = StructInfo::new(
            vec![
                MemberDecl::bitfield("a", Type::int(), 3),
                MemberDecl::bitfield("b", Type::int(), 5),
            ],
            false,
        );
        let a = info.members[0].bitfield.unwrap();
        let b = info.members[1].bitfield.unwrap();
        assert_eq!((a.position, a.width), (0, 3));
        assert_eq!((b.position, b.width), (3, 5));
        assert_eq!(info.members[0].offset, info.members[1].offset);
        assert_eq!(info.size, 4);
    }

    #[test]
    fn overflowing_bitfield_starts_new_unit() {
        let info = StructInfo::new(
            vec![
                MemberDecl::bitfield("a", Type::int(), 30),
                MemberDecl::bitfield("b", Type::int(), 5),
            ],
            false,
        );
        assert_eq!(info.members[0].offset, 0);
        assert_eq!(info.members[1].offset, 4);
        assert_eq!(info.members[1].bitfield.unwrap().position, 0);
        assert_eq!(info.size, 8);
    }

    #[test]
    fn zero_width_closes_unit() {
        let info = StructInfo::new(
            vec![
                MemberDecl::bitfield("a", Type::int(), 3),
                MemberDecl { name: None, ty: Type::int(), bit_width: Some(0) },
                MemberDecl::bitfield("b", Type::int(), 3),
            ],
            false,
        );
        assert_eq!(info.members.len(), 2);
        assert_eq!(info.members[1].offset, 4);
        assert_eq!(info.members[1].bitfield.unwrap().position, 0);
    }

    #[test]
    fn flexible_array_member() {
        let info = StructInfo::new(
            vec![
                MemberDecl::plain("len", Type::int()),
                MemberDecl::plain("data", Type::array(Type::char_type(), None)),
            ],
            false,
        );
        assert!(info.is_flexible);
        assert_eq!(info.size, 4);
    }
}
