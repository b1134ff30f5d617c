//! Bit-field access lowering.
//!
//! A bit-field member occupies `(position, width)` bits of a backing
//! integer. Stores are rewritten here into comma sequences over fresh
//! temporaries so the object is evaluated once and the expression still
//! yields the stored value; reads are lowered later by the IR builder.

use rvcc_ast::types::ptrof;
use rvcc_ast::{BinOp, BitFieldInfo, Expr, ExprKind, Token, Type, UnOp, VarRef};

use crate::elaborate::Elaborator;

/// Width used to sign-extend narrow bit-fields; the target's minimum
/// register width.
pub const MIN_REG_BITS: u32 = 32;

fn fix(value: i64, ty: Type, token: &Token) -> Expr {
    Expr::fixnum(value, ty, token.clone())
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr, ty: Type, token: &Token) -> Expr {
    Expr::bin(op, lhs, rhs, ty, token.clone())
}

fn var(vref: &VarRef, ty: Type, token: &Token) -> Expr {
    Expr::var(vref.name.clone(), vref.scope, ty, token.clone())
}

/// The backing unit type: the declared base kind, read unsigned so shifts
/// stay logical.
fn unit_type(bf: &BitFieldInfo) -> Type {
    Type::fixnum(bf.base_kind, true)
}

/// `(char*)&target + offset`: the address of the backing integer of a
/// bit-field member, before the final cast to the unit pointer type.
fn unit_ptr(elab: &mut Elaborator, member: Expr, token: &Token) -> Expr {
    let ExprKind::Member { target, index } = member.kind else {
        unreachable!("bit-field access must be a member expression");
    };
    let offset = target
        .ty
        .struct_info()
        .and_then(|info| info.members.get(index))
        .map_or(0, |m| m.offset);
    let sptr = elab.make_refer(*target, token.clone());
    let cptr = Expr::cast(sptr, Type::ptr(Type::char_type()), token.clone());
    bin(
        BinOp::Add,
        cptr,
        fix(offset as i64, Type::ssize(), token),
        Type::ptr(Type::char_type()),
        token,
    )
}

/// `(*ptr & ~(mask<<pos)) | ((value & mask) << pos)`, typed as the unit.
fn insert_value(ptr: &Expr, value: Expr, bf: &BitFieldInfo, token: &Token) -> Expr {
    let unit = unit_type(bf);
    let loaded = Expr::unary(UnOp::Deref, ptr.clone(), unit.clone(), token.clone());
    let keep_mask = rvcc_ast::types::wrap_value(
        !(bf.mask() << bf.position),
        unit.size(),
        true,
    );
    let cleared = bin(BinOp::BitAnd, loaded, fix(keep_mask, unit.clone(), token), unit.clone(), token);
    let vcast = Expr::cast(value, unit.clone(), token.clone());
    let vmasked = bin(BinOp::BitAnd, vcast, fix(bf.mask(), unit.clone(), token), unit.clone(), token);
    let vshifted = bin(
        BinOp::LShift,
        vmasked,
        fix(bf.position as i64, Type::int(), token),
        unit.clone(),
        token,
    );
    bin(BinOp::BitOr, cleared, vshifted, unit, token)
}

/// Extract the member value from the loaded unit, sign-extending signed
/// fields with a shift pair over the minimum register width.
fn extract_value(ptr: &Expr, bf: &BitFieldInfo, member_ty: &Type, token: &Token) -> Expr {
    let unit = unit_type(bf);
    let loaded = Expr::unary(UnOp::Deref, ptr.clone(), unit.clone(), token.clone());
    if member_ty.is_unsigned() {
        let shifted = bin(
            BinOp::RShift,
            loaded,
            fix(bf.position as i64, Type::int(), token),
            unit.clone(),
            token,
        );
        let masked = bin(BinOp::BitAnd, shifted, fix(bf.mask(), unit.clone(), token), unit, token);
        return Expr::cast(masked, member_ty.clone(), token.clone());
    }
    let bits = ((unit.size() * 8) as u32).max(MIN_REG_BITS);
    let wide = if bits > 32 { Type::long() } else { Type::int() };
    let widened = Expr::cast(loaded, wide.clone(), token.clone());
    let up = bin(
        BinOp::LShift,
        widened,
        fix((bits - bf.position - bf.width) as i64, Type::int(), token),
        wide.clone(),
        token,
    );
    let down = bin(
        BinOp::RShift,
        up,
        fix((bits - bf.width) as i64, Type::int(), token),
        wide,
        token,
    );
    Expr::cast(down, member_ty.clone(), token.clone())
}

/// Fold expressions into a right-nested comma sequence; the value and
/// type are the last expression's.
fn comma_chain(exprs: Vec<Expr>, token: &Token) -> Expr {
    let mut iter = exprs.into_iter().rev();
    let mut acc = iter.next().expect("comma chain needs at least one expression");
    for e in iter {
        let ty = acc.ty.clone();
        acc = bin(BinOp::Comma, e, acc, ty, token);
    }
    acc
}

/// `member = rhs` on a bit-field:
/// `(ptr = &unit, val = rhs, *ptr = merged, val)`.
pub(crate) fn assign(
    elab: &mut Elaborator,
    lhs: Expr,
    rhs: Expr,
    bf: BitFieldInfo,
    token: Token,
) -> Expr {
    let member_ty = lhs.ty.clone();
    let unit = unit_type(&bf);
    let addr = unit_ptr(elab, lhs, &token);
    let addr = Expr::cast(addr, ptrof(&unit), token.clone());

    let ptr_tmp = elab.alloc_tmp(ptrof(&unit));
    let val_tmp = elab.alloc_tmp(member_ty.clone());
    let ptr_var = var(&ptr_tmp, ptrof(&unit), &token);
    let val_var = var(&val_tmp, member_ty.clone(), &token);

    let rhs = elab.make_cast(rhs, &member_ty, false);
    let bind_ptr = bin(BinOp::Assign, ptr_var.clone(), addr, ptrof(&unit), &token);
    let bind_val = bin(BinOp::Assign, val_var.clone(), rhs, member_ty.clone(), &token);
    let merged = insert_value(&ptr_var, val_var.clone(), &bf, &token);
    let store = bin(
        BinOp::Assign,
        Expr::unary(UnOp::Deref, ptr_var, unit.clone(), token.clone()),
        merged,
        unit,
        &token,
    );
    comma_chain(vec![bind_ptr, bind_val, store, val_var], &token)
}

/// `member op= rhs` on a bit-field:
/// `(ptr = &unit, val = *old op rhs, *ptr = merged, val)`.
pub(crate) fn assign_with(
    elab: &mut Elaborator,
    op: BinOp,
    lhs: Expr,
    rhs: Expr,
    bf: BitFieldInfo,
    token: Token,
) -> Expr {
    let member_ty = lhs.ty.clone();
    let unit = unit_type(&bf);
    let addr = unit_ptr(elab, lhs, &token);
    let addr = Expr::cast(addr, ptrof(&unit), token.clone());

    let ptr_tmp = elab.alloc_tmp(ptrof(&unit));
    let val_tmp = elab.alloc_tmp(member_ty.clone());
    let ptr_var = var(&ptr_tmp, ptrof(&unit), &token);
    let val_var = var(&val_tmp, member_ty.clone(), &token);

    let bind_ptr = bin(BinOp::Assign, ptr_var.clone(), addr, ptrof(&unit), &token);
    let old = extract_value(&ptr_var, &bf, &member_ty, &token);
    let new_value = elab.new_bin(op, old, rhs, token.clone());
    let new_value = elab.make_cast(new_value, &member_ty, false);
    let bind_val = bin(BinOp::Assign, val_var.clone(), new_value, member_ty.clone(), &token);
    let merged = insert_value(&ptr_var, val_var.clone(), &bf, &token);
    let store = bin(
        BinOp::Assign,
        Expr::unary(UnOp::Deref, ptr_var, unit.clone(), token.clone()),
        merged,
        unit,
        &token,
    );
    comma_chain(vec![bind_ptr, bind_val, store, val_var], &token)
}

/// `++`/`--` on a bit-field. Post forms yield the original value, pre
/// forms the updated one.
pub(crate) fn incdec(
    elab: &mut Elaborator,
    op: UnOp,
    target: Expr,
    bf: BitFieldInfo,
    token: Token,
) -> Expr {
    let member_ty = target.ty.clone();
    let unit = unit_type(&bf);
    let addr = unit_ptr(elab, target, &token);
    let addr = Expr::cast(addr, ptrof(&unit), token.clone());

    let ptr_tmp = elab.alloc_tmp(ptrof(&unit));
    let old_tmp = elab.alloc_tmp(member_ty.clone());
    let new_tmp = elab.alloc_tmp(member_ty.clone());
    let ptr_var = var(&ptr_tmp, ptrof(&unit), &token);
    let old_var = var(&old_tmp, member_ty.clone(), &token);
    let new_var = var(&new_tmp, member_ty.clone(), &token);

    let bind_ptr = bin(BinOp::Assign, ptr_var.clone(), addr, ptrof(&unit), &token);
    let old = extract_value(&ptr_var, &bf, &member_ty, &token);
    let bind_old = bin(BinOp::Assign, old_var.clone(), old, member_ty.clone(), &token);

    let delta_op = match op {
        UnOp::PreInc | UnOp::PostInc => BinOp::Add,
        _ => BinOp::Sub,
    };
    let one = fix(1, Type::int(), &token);
    let stepped = elab.new_bin(delta_op, old_var.clone(), one, token.clone());
    let stepped = elab.make_cast(stepped, &member_ty, false);
    let bind_new = bin(BinOp::Assign, new_var.clone(), stepped, member_ty.clone(), &token);

    let merged = insert_value(&ptr_var, new_var.clone(), &bf, &token);
    let store = bin(
        BinOp::Assign,
        Expr::unary(UnOp::Deref, ptr_var, unit.clone(), token.clone()),
        merged,
        unit,
        &token,
    );

    let result = match op {
        UnOp::PostInc | UnOp::PostDec => old_var,
        _ => new_var,
    };
    comma_chain(vec![bind_ptr, bind_old, bind_new, store, result], &token)
}
