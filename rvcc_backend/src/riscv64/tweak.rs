//! Pre-allocation IR rewriting for RV64 instruction forms.
//!
//! Inserts `mov` instructions where an operand is constant but the target
//! form takes no immediate (multiply, division, compares against non-zero,
//! logic ops outside the 12-bit signed range), rewrites subtraction from
//! zero into negation, and splits floating-point branches into a compare
//! that materializes a boolean followed by an integer branch, since there
//! is no flags register.

use rvcc_ir::{CcKind, CondCode, FuncIr, IrBinOp, IrInst, IrUnOp, VRegFlags, VRegId};

use super::is_im12;

/// Force a constant vreg into a real register via `mov`.
fn materialize(func: &mut FuncIr, out: &mut Vec<IrInst>, v: VRegId) -> VRegId {
    let (is_const, size, flags) = {
        let vr = func.vregs.get(v);
        (vr.is_const(), vr.size, vr.flags)
    };
    if !is_const {
        return v;
    }
    let dst = func.vregs.add(size, flags & !VRegFlags::CONST);
    out.push(IrInst::Mov { dst, src: v });
    dst
}

fn const_value(func: &FuncIr, v: VRegId) -> Option<i64> {
    let vr = func.vregs.get(v);
    vr.is_const().then_some(vr.konst)
}

fn tweak_bin(
    func: &mut FuncIr,
    out: &mut Vec<IrInst>,
    op: IrBinOp,
    dst: VRegId,
    mut lhs: VRegId,
    mut rhs: VRegId,
) {
    let flonum = func.vregs.get(dst).is_flonum();
    if flonum {
        out.push(IrInst::Bin { op, dst, lhs, rhs });
        return;
    }

    let commutative = matches!(
        op,
        IrBinOp::Add | IrBinOp::Mul | IrBinOp::BitAnd | IrBinOp::BitOr | IrBinOp::BitXor
    );
    if commutative && const_value(func, lhs).is_some() && const_value(func, rhs).is_none() {
        std::mem::swap(&mut lhs, &mut rhs);
    }

    match op {
        IrBinOp::Mul | IrBinOp::Div | IrBinOp::Mod => {
            // No immediate forms at all.
            let lhs = materialize(func, out, lhs);
            let rhs = materialize(func, out, rhs);
            out.push(IrInst::Bin { op, dst, lhs, rhs });
        }
        IrBinOp::Sub => {
            if let Some(0) = const_value(func, lhs) {
                // Subtraction from zero becomes negation.
                let rhs = materialize(func, out, rhs);
                out.push(IrInst::Un { op: IrUnOp::Neg, dst, src: rhs });
                return;
            }
            let lhs = materialize(func, out, lhs);
            if let Some(c) = const_value(func, rhs) {
                if is_im12(-c) {
                    // sub with an immediate is an addi of the negation.
                    let (size, unsigned) = {
                        let vr = func.vregs.get(rhs);
                        (vr.size, vr.is_unsigned())
                    };
                    let neg = func.vregs.add_const(-c, size, unsigned);
                    out.push(IrInst::Bin { op: IrBinOp::Add, dst, lhs, rhs: neg });
                    return;
                }
            }
            let rhs = materialize(func, out, rhs);
            out.push(IrInst::Bin { op, dst, lhs, rhs });
        }
        IrBinOp::Add | IrBinOp::BitAnd | IrBinOp::BitOr | IrBinOp::BitXor => {
            let lhs = materialize(func, out, lhs);
            let rhs = match const_value(func, rhs) {
                Some(c) if is_im12(c) => rhs,
                Some(_) => materialize(func, out, rhs),
                None => rhs,
            };
            out.push(IrInst::Bin { op, dst, lhs, rhs });
        }
        IrBinOp::LShift | IrBinOp::RShift => {
            let lhs = materialize(func, out, lhs);
            // Shift amounts have immediate forms; anything else in a reg.
            let rhs = match const_value(func, rhs) {
                Some(c) if (0..64).contains(&c) => rhs,
                Some(_) => materialize(func, out, rhs),
                None => rhs,
            };
            out.push(IrInst::Bin { op, dst, lhs, rhs });
        }
    }
}

/// Comparison operands: a constant left side swaps over; a non-zero
/// constant right side is materialized (only x0 compares for free).
fn legal_cmp_operands(
    func: &mut FuncIr,
    out: &mut Vec<IrInst>,
    cc: CondCode,
    lhs: VRegId,
    rhs: VRegId,
) -> (CondCode, VRegId, VRegId) {
    let (mut cc, mut lhs, mut rhs) = (cc, lhs, rhs);
    if const_value(func, lhs).is_some() && const_value(func, rhs).is_none() {
        std::mem::swap(&mut lhs, &mut rhs);
        cc = cc.swap();
    }
    let lhs = materialize(func, out, lhs);
    let rhs = match const_value(func, rhs) {
        Some(0) if !cc.flonum => rhs,
        Some(_) => materialize(func, out, rhs),
        None => rhs,
    };
    (cc, lhs, rhs)
}

pub(crate) fn tweak(func: &mut FuncIr) {
    for bi in 0..func.bbs.len() {
        let irs = std::mem::take(&mut func.bbs[bi].irs);
        let mut out = Vec::with_capacity(irs.len());
        for ir in irs {
            match ir {
                IrInst::Bin { op, dst, lhs, rhs } => {
                    tweak_bin(func, &mut out, op, dst, lhs, rhs);
                }
                IrInst::Un { op, dst, src } => {
                    let src = materialize(func, &mut out, src);
                    out.push(IrInst::Un { op, dst, src });
                }
                IrInst::Cond { dst, cc, lhs, rhs } => {
                    let (cc, lhs, rhs) = legal_cmp_operands(func, &mut out, cc, lhs, rhs);
                    out.push(IrInst::Cond { dst, cc, lhs, rhs });
                }
                IrInst::Jmp { cc, lhs: Some(lhs), rhs: Some(rhs), bb } if cc.flonum => {
                    // No flag register: set a boolean, then branch on it.
                    let cond = func.vregs.add(4, VRegFlags::empty());
                    out.push(IrInst::Cond { dst: cond, cc, lhs, rhs });
                    let zero = func.vregs.add_const(0, 4, false);
                    out.push(IrInst::Jmp {
                        cc: CondCode::new(CcKind::Ne, false, false),
                        lhs: Some(cond),
                        rhs: Some(zero),
                        bb,
                    });
                }
                IrInst::Jmp { cc, lhs: Some(lhs), rhs: Some(rhs), bb }
                    if cc.kind != CcKind::Any =>
                {
                    let (cc, lhs, rhs) = legal_cmp_operands(func, &mut out, cc, lhs, rhs);
                    out.push(IrInst::Jmp { cc, lhs: Some(lhs), rhs: Some(rhs), bb });
                }
                IrInst::Load { dst, addr } => {
                    let addr = materialize(func, &mut out, addr);
                    out.push(IrInst::Load { dst, addr });
                }
                IrInst::Store { addr, src } => {
                    let addr = materialize(func, &mut out, addr);
                    // A zero store reads x0 directly.
                    let src = match const_value(func, src) {
                        Some(0) => src,
                        Some(_) => materialize(func, &mut out, src),
                        None => src,
                    };
                    out.push(IrInst::Store { addr, src });
                }
                IrInst::PtrAdd { dst, base, index, scale, offset } => {
                    let base = materialize(func, &mut out, base);
                    let index = index.map(|i| materialize(func, &mut out, i));
                    out.push(IrInst::PtrAdd { dst, base, index, scale, offset });
                }
                IrInst::TJmp { value, table } => {
                    let value = materialize(func, &mut out, value);
                    out.push(IrInst::TJmp { value, table });
                }
                IrInst::Cast { dst, src, src_size, src_unsigned } => {
                    let src = materialize(func, &mut out, src);
                    out.push(IrInst::Cast { dst, src, src_size, src_unsigned });
                }
                other => out.push(other),
            }
        }
        func.bbs[bi].irs = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvcc_ir::{BBId, BasicBlock, VRegPool};

    fn func_with(irs: Vec<IrInst>, vregs: VRegPool) -> FuncIr {
        let mut bb = BasicBlock::new(".L0".into());
        bb.irs = irs;
        FuncIr {
            name: "t".into(),
            is_static: false,
            bbs: vec![bb],
            order: vec![BBId(0)],
            vregs,
            slots: Vec::new(),
            params: Vec::new(),
            call_sites: Vec::new(),
            float_consts: Vec::new(),
            ret_flonum: Some(false),
            exit_bb: BBId(0),
            frame_size: 0,
        }
    }

    #[test]
    fn multiply_immediate_is_materialized() {
        let mut pool = VRegPool::new();
        let x = pool.add(4, VRegFlags::empty());
        let c = pool.add_const(10, 4, false);
        let d = pool.add(4, VRegFlags::empty());
        let mut func = func_with(
            vec![IrInst::Bin { op: IrBinOp::Mul, dst: d, lhs: x, rhs: c }],
            pool,
        );
        tweak(&mut func);
        let irs = &func.bbs[0].irs;
        assert!(matches!(irs[0], IrInst::Mov { .. }), "constant must move to a register");
        let IrInst::Bin { op: IrBinOp::Mul, rhs, .. } = irs[1] else {
            panic!("expected multiply");
        };
        assert!(!func.vregs.get(rhs).is_const());
    }

    #[test]
    fn small_add_immediate_survives() {
        let mut pool = VRegPool::new();
        let x = pool.add(8, VRegFlags::empty());
        let c = pool.add_const(100, 8, false);
        let d = pool.add(8, VRegFlags::empty());
        let mut func = func_with(
            vec![IrInst::Bin { op: IrBinOp::Add, dst: d, lhs: x, rhs: c }],
            pool,
        );
        tweak(&mut func);
        assert_eq!(func.bbs[0].irs.len(), 1, "addi keeps its immediate");
    }

    #[test]
    fn wide_logic_immediate_is_materialized() {
        let mut pool = VRegPool::new();
        let x = pool.add(8, VRegFlags::empty());
        let c = pool.add_const(0x12345, 8, false);
        let d = pool.add(8, VRegFlags::empty());
        let mut func = func_with(
            vec![IrInst::Bin { op: IrBinOp::BitAnd, dst: d, lhs: x, rhs: c }],
            pool,
        );
        tweak(&mut func);
        assert_eq!(func.bbs[0].irs.len(), 2);
        assert!(matches!(func.bbs[0].irs[0], IrInst::Mov { .. }));
    }

    #[test]
    fn subtraction_from_zero_becomes_negation() {
        let mut pool = VRegPool::new();
        let zero = pool.add_const(0, 4, false);
        let x = pool.add(4, VRegFlags::empty());
        let d = pool.add(4, VRegFlags::empty());
        let mut func = func_with(
            vec![IrInst::Bin { op: IrBinOp::Sub, dst: d, lhs: zero, rhs: x }],
            pool,
        );
        tweak(&mut func);
        assert!(matches!(
            func.bbs[0].irs[0],
            IrInst::Un { op: IrUnOp::Neg, .. }
        ));
    }

    #[test]
    fn float_branch_splits_into_set_then_branch() {
        let mut pool = VRegPool::new();
        let a = pool.add(8, VRegFlags::FLONUM);
        let b = pool.add(8, VRegFlags::FLONUM);
        let mut func = func_with(
            vec![IrInst::Jmp {
                cc: CondCode::new(CcKind::Lt, false, true),
                lhs: Some(a),
                rhs: Some(b),
                bb: BBId(0),
            }],
            pool,
        );
        tweak(&mut func);
        let irs = &func.bbs[0].irs;
        assert!(matches!(irs[0], IrInst::Cond { cc, .. } if cc.flonum));
        assert!(matches!(irs[1], IrInst::Jmp { cc, .. } if !cc.flonum && cc.kind == CcKind::Ne));
    }
}
