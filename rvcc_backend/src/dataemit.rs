//! Global data emission: .rodata / .data / .bss encoding of initializers,
//! including bit-field packing, string literals and relocations.

use log::debug;

use rvcc_ast::{
    Declaration, Expr, ExprKind, Initializer, MemberInfo, Program, Qualifiers, StructInfo, Type,
    TypeKind, UnOp, VarInfo, VarStorage, GLOBAL_SCOPE,
};
use rvcc_common::Diagnostics;

use crate::asm::{AsmStream, Section};

/// A constant address: optional symbol plus byte offset, rendered as
/// `label + offset` for the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reloc {
    label: Option<String>,
    offset: i64,
}

impl Reloc {
    fn constant(offset: i64) -> Self {
        Self { label: None, offset }
    }

    fn render(&self) -> String {
        match (&self.label, self.offset) {
            (Some(label), 0) => label.clone(),
            (Some(label), offset) if offset > 0 => format!("{}+{}", label, offset),
            (Some(label), offset) => format!("{}{}", label, offset),
            (None, offset) => offset.to_string(),
        }
    }
}

/// Evaluate an initializer expression to a link-time constant.
fn eval_reloc(expr: &Expr) -> Option<Reloc> {
    match &expr.kind {
        ExprKind::FixNum(v) => Some(Reloc::constant(*v)),
        // An array or function variable decays to its own address.
        ExprKind::Var(vref) if expr.ty.is_array() || expr.ty.is_func() => {
            Some(Reloc { label: Some(vref.name.clone()), offset: 0 })
        }
        ExprKind::Unary { op: UnOp::Ref, sub } => eval_address(sub),
        ExprKind::Unary { op: UnOp::Cast, sub } => eval_reloc(sub),
        ExprKind::Bin { op, lhs, rhs } => {
            let l = eval_reloc(lhs)?;
            let r = eval_reloc(rhs)?;
            match op {
                rvcc_ast::BinOp::Add if r.label.is_none() => {
                    let scale = elem_scale(&lhs.ty);
                    Some(Reloc { label: l.label, offset: l.offset + r.offset * scale })
                }
                rvcc_ast::BinOp::Sub if r.label.is_none() => {
                    let scale = elem_scale(&lhs.ty);
                    Some(Reloc { label: l.label, offset: l.offset - r.offset * scale })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn elem_scale(ty: &Type) -> i64 {
    if ty.ptr_or_array() {
        ty.base().map_or(1, |b| b.size().max(1)) as i64
    } else {
        1
    }
}

fn eval_address(expr: &Expr) -> Option<Reloc> {
    match &expr.kind {
        ExprKind::Var(vref) => Some(Reloc { label: Some(vref.name.clone()), offset: 0 }),
        ExprKind::Member { target, index } => {
            let base = eval_address(target)?;
            let offset = target
                .ty
                .struct_info()
                .and_then(|info| info.members.get(*index))
                .map_or(0, |m| m.offset as i64);
            Some(Reloc { label: base.label, offset: base.offset + offset })
        }
        ExprKind::Unary { op: UnOp::Deref, sub } => eval_reloc(sub),
        _ => None,
    }
}

fn escape_ascii(bytes: &[u8]) -> String {
    let mut out = String::new();
    for b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(*b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

struct DataEmitter<'a> {
    asm: &'a mut AsmStream,
    diags: &'a mut Diagnostics,
    section: Section,
}

impl<'a> DataEmitter<'a> {
    fn line(&mut self, text: String) {
        self.asm.line(self.section, text);
    }

    fn zero(&mut self, n: usize) {
        if n > 0 {
            self.line(format!("\t.zero {}", n));
        }
    }

    fn int_directive(size: usize) -> &'static str {
        match size {
            1 => ".byte",
            2 => ".half",
            4 => ".word",
            _ => ".quad",
        }
    }

    fn emit_scalar(&mut self, ty: &Type, value: &Expr) {
        match &ty.kind {
            TypeKind::Flonum(kind) => {
                let v = match &value.kind {
                    ExprKind::FloNum(v) => *v,
                    ExprKind::FixNum(v) => *v as f64,
                    _ => {
                        self.diags.error("illegal initializer", value.token.span);
                        0.0
                    }
                };
                if kind.size() == 4 {
                    self.line(format!("\t.word {}", (v as f32).to_bits()));
                } else {
                    self.line(format!("\t.quad {}", v.to_bits()));
                }
            }
            _ => {
                let size = ty.size().max(1);
                match eval_reloc(value) {
                    Some(reloc) => {
                        self.line(format!("\t{} {}", Self::int_directive(size), reloc.render()))
                    }
                    None => {
                        self.diags.error("initializer is not constant", value.token.span);
                        self.zero(size);
                    }
                }
            }
        }
    }

    fn emit_value(&mut self, ty: &Type, init: &Initializer) {
        match (&ty.kind, init) {
            (TypeKind::Array { elem, len }, Initializer::Single(expr)) => {
                // A string literal fills a char array with escaped bytes,
                // zero-padded to the declared length.
                if let ExprKind::Str(lit) = &expr.kind {
                    let total = len.unwrap_or(lit.bytes.len());
                    let used = lit.bytes.len().min(total);
                    self.line(format!("\t.ascii \"{}\"", escape_ascii(&lit.bytes[..used])));
                    self.zero(total.saturating_sub(used));
                } else {
                    self.diags.error("illegal array initializer", expr.token.span);
                    self.zero(elem.size() * len.unwrap_or(0));
                }
            }
            (TypeKind::Array { elem, len }, Initializer::Multi(items)) => {
                let total = len.unwrap_or(items.len());
                for item in items.iter().take(total) {
                    self.emit_value(elem, item);
                }
                if items.len() < total {
                    self.zero(elem.size() * (total - items.len()));
                }
            }
            (TypeKind::Struct(st), init) => {
                let Some(info) = &st.info else {
                    self.diags.error("incomplete type in initializer", rvcc_common::Span::none());
                    return;
                };
                if info.is_union {
                    self.emit_union(info, init);
                } else {
                    self.emit_struct(info, init);
                }
            }
            (_, Initializer::Single(expr)) => self.emit_scalar(ty, expr),
            (_, Initializer::Multi(items)) => {
                // Scalar braced initializer: the first element wins.
                match items.first() {
                    Some(item) => self.emit_value(ty, item),
                    None => self.zero(ty.size()),
                }
            }
        }
    }

    fn emit_struct(&mut self, info: &StructInfo, init: &Initializer) {
        let items: &[Initializer] = match init {
            Initializer::Multi(items) => items,
            Initializer::Single(_) => {
                self.diags.error("struct initializer must be braced", rvcc_common::Span::none());
                self.zero(info.size);
                return;
            }
        };

        let mut pos = 0usize;
        let mut i = 0usize;
        while i < info.members.len() {
            let member = &info.members[i];
            if member.bitfield.is_some() {
                // Coalesce every field sharing this backing unit.
                let unit_offset = member.offset;
                let unit_size = member.bitfield.unwrap().base_kind.size();
                let mut j = i;
                let mut value: i64 = 0;
                while j < info.members.len() {
                    let m = &info.members[j];
                    let Some(bf) = m.bitfield else { break };
                    if m.offset != unit_offset {
                        break;
                    }
                    value |= calc_bitfield_initial_value(&bf, items.get(j));
                    j += 1;
                }
                if pos < unit_offset {
                    self.zero(unit_offset - pos);
                }
                self.line(format!("\t{} {}", Self::int_directive(unit_size), value));
                pos = unit_offset + unit_size;
                i = j;
                continue;
            }

            if pos < member.offset {
                self.zero(member.offset - pos);
            }
            match items.get(i) {
                Some(item) => self.emit_value(&member.ty, item),
                None => self.zero(member.ty.size()),
            }
            pos = member.offset + member.ty.size();
            i += 1;
        }
        if pos < info.size {
            self.zero(info.size - pos);
        }
    }

    fn emit_union(&mut self, info: &StructInfo, init: &Initializer) {
        // The first initialized member is emitted; the rest is padding.
        let first: Option<(&MemberInfo, &Initializer)> = match init {
            Initializer::Multi(items) => {
                info.members.first().zip(items.first())
            }
            Initializer::Single(_) => {
                self.diags.error("union initializer must be braced", rvcc_common::Span::none());
                None
            }
        };
        match first {
            Some((member, item)) => {
                self.emit_value(&member.ty, item);
                let used = member.ty.size();
                if used < info.size {
                    self.zero(info.size - used);
                }
            }
            None => self.zero(info.size),
        }
    }
}

/// Pack one bit-field's initial value into its position within the
/// backing integer.
fn calc_bitfield_initial_value(
    bf: &rvcc_ast::BitFieldInfo,
    init: Option<&Initializer>,
) -> i64 {
    let value = match init {
        Some(Initializer::Single(expr)) => expr.fixnum_value().unwrap_or(0),
        _ => 0,
    };
    (value & bf.mask()) << bf.position
}

/// Choose a section and emit one global variable.
fn emit_gvar(var: &VarInfo, asm: &mut AsmStream, diags: &mut Diagnostics) {
    let section = if var.init.is_none() {
        Section::Bss
    } else if var.ty.qualifiers.contains(Qualifiers::CONST) {
        Section::Rodata
    } else {
        Section::Data
    };

    let align = var.ty.align().max(1);
    asm.line(section, String::new());
    if align > 1 {
        asm.line(section, format!("\t.balign {}", align));
    }
    if !var.storage.contains(VarStorage::STATIC) {
        asm.line(section, format!(".global {}", var.name));
    }
    asm.label(section, &var.name);

    match &var.init {
        None => asm.line(section, format!("\t.zero {}", var.ty.size().max(1))),
        Some(init) => {
            let mut emitter = DataEmitter { asm, diags, section };
            emitter.emit_value(&var.ty, init);
        }
    }
}

/// Emit every global variable of the program into its section.
pub fn emit_global_data(program: &Program, asm: &mut AsmStream, diags: &mut Diagnostics) {
    for decl in &program.decls {
        let Declaration::Var(vref) = decl else { continue };
        let Some(var) = program.scopes.var_in(GLOBAL_SCOPE, &vref.name) else { continue };
        if var.ty.is_func()
            || var.storage.contains(VarStorage::EXTERN)
            || var.storage.contains(VarStorage::ENUM_MEMBER)
        {
            continue;
        }
        debug!("emitting global `{}`", var.name);
        emit_gvar(var, asm, diags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvcc_ast::{MemberDecl, StructType, Token};

    fn asm_for(var: VarInfo) -> String {
        let mut program = Program::new();
        program.scopes.add_var(GLOBAL_SCOPE, var.clone());
        program
            .decls
            .push(Declaration::Var(rvcc_ast::VarRef::new(var.name.clone(), GLOBAL_SCOPE)));
        let mut asm = AsmStream::new();
        let mut diags = Diagnostics::new();
        emit_global_data(&program, &mut asm, &mut diags);
        assert!(diags.is_empty(), "{:?}", diags.messages);
        asm.to_string()
    }

    #[test]
    fn uninitialized_goes_to_bss() {
        let out = asm_for(VarInfo::new("g", Type::int()));
        assert!(out.contains(".bss"));
        assert!(out.contains("g:"));
        assert!(out.contains(".zero 4"));
    }

    #[test]
    fn const_scalar_goes_to_rodata() {
        let ty = Type::int().with_qualifiers(Qualifiers::CONST);
        let var = VarInfo::new("k", ty)
            .with_init(Initializer::Single(Expr::fixnum(7, Type::int(), Token::none())));
        let out = asm_for(var);
        assert!(out.contains(".rodata"));
        assert!(out.contains(".word 7"));
    }

    #[test]
    fn string_literal_is_escaped_and_padded() {
        let lit = rvcc_ast::StrLit::new("hi\n");
        let ty = Type::array(Type::char_type(), Some(8));
        let expr = Expr::new(ExprKind::Str(lit), ty.clone(), Token::none());
        let var = VarInfo::new("s", ty).with_init(Initializer::Single(expr));
        let out = asm_for(var);
        assert!(out.contains(".ascii \"hi\\012\\000\""));
        assert!(out.contains(".zero 4"), "padded to the declared length");
    }

    #[test]
    fn bitfields_coalesce_into_one_unit() {
        // struct { int a:3, b:5; } v = { 5, 7 };  => 5 | 7<<3
        let info = StructInfo::new(
            vec![
                MemberDecl::bitfield("a", Type::int(), 3),
                MemberDecl::bitfield("b", Type::int(), 5),
            ],
            false,
        );
        let ty = Type::new(TypeKind::Struct(StructType {
            name: Some("S".into()),
            is_union: false,
            info: Some(info),
        }));
        let init = Initializer::Multi(vec![
            Initializer::Single(Expr::fixnum(5, Type::int(), Token::none())),
            Initializer::Single(Expr::fixnum(7, Type::int(), Token::none())),
        ]);
        let out = asm_for(VarInfo::new("v", ty).with_init(init));
        let expected = 5 | (7 << 3);
        assert!(out.contains(&format!(".word {}", expected)));
    }

    #[test]
    fn relocation_renders_label_plus_offset() {
        // long *p = &arr[3]; with long arr[8];
        let arr_ty = Type::array(Type::long(), Some(8));
        let arr = Expr::var("arr", GLOBAL_SCOPE, arr_ty, Token::none());
        let three = Expr::fixnum(3, Type::int(), Token::none());
        let sum = Expr::bin(
            rvcc_ast::BinOp::Add,
            arr,
            three,
            Type::ptr(Type::long()),
            Token::none(),
        );
        let var = VarInfo::new("p", Type::ptr(Type::long()))
            .with_init(Initializer::Single(sum));
        let out = asm_for(var);
        assert!(out.contains(".quad arr+24"), "{}", out);
    }

    #[test]
    fn struct_members_are_padded() {
        // struct { char c; int i; } v = { 1, 2 };
        let info = StructInfo::new(
            vec![
                MemberDecl::plain("c", Type::char_type()),
                MemberDecl::plain("i", Type::int()),
            ],
            false,
        );
        let ty = Type::new(TypeKind::Struct(StructType {
            name: Some("S".into()),
            is_union: false,
            info: Some(info),
        }));
        let init = Initializer::Multi(vec![
            Initializer::Single(Expr::fixnum(1, Type::int(), Token::none())),
            Initializer::Single(Expr::fixnum(2, Type::int(), Token::none())),
        ]);
        let out = asm_for(VarInfo::new("v", ty).with_init(init));
        assert!(out.contains(".byte 1"));
        assert!(out.contains(".zero 3"));
        assert!(out.contains(".word 2"));
    }
}
