//! Per-opcode RV64 emission: one handler per IR opcode, plus prologue,
//! epilogue, caller-save handling and switch-table output.

use log::debug;

use rvcc_ir::{
    CallTarget, CcKind, CondCode, FuncIr, IrBinOp, IrInst, IrUnOp, ParamStorage, VRegId,
};

use super::{
    is_im12, FLT_REGS, FP, FSCRATCH, FLT_TEMP_COUNT, INT_REGS, INT_TEMP_COUNT, SCRATCH, SCRATCH2,
};
use crate::asm::{AsmStream, Section};

struct Emitter<'a> {
    func: &'a FuncIr,
    asm: &'a mut AsmStream,
    /// Fixed save slot per caller-saved register, so nested call regions
    /// never clobber an enclosing region's saves.
    csave_slots: hashbrown::HashMap<(u8, bool), i64>,
    /// Callee-saved registers to preserve: `(class index, is-flonum, offset)`.
    callee_saves: Vec<(usize, bool, i64)>,
    local_size: i64,
    has_frame: bool,
    /// Register arguments pending for the next `call`.
    pushargs: Vec<(VRegId, usize, bool)>,
    table_counter: u32,
}

fn int_reg(idx: u8) -> &'static str {
    INT_REGS[idx as usize]
}

fn flt_reg(idx: u8) -> &'static str {
    FLT_REGS[idx as usize]
}

fn load_op(size: u8, unsigned: bool, flonum: bool) -> &'static str {
    if flonum {
        return if size == 4 { "flw" } else { "fld" };
    }
    match (size, unsigned) {
        (1, false) => "lb",
        (1, true) => "lbu",
        (2, false) => "lh",
        (2, true) => "lhu",
        // 32-bit values stay sign-extended in registers, signed or not.
        (4, _) => "lw",
        _ => "ld",
    }
}

fn store_op(size: u8, flonum: bool) -> &'static str {
    if flonum {
        return if size == 4 { "fsw" } else { "fsd" };
    }
    match size {
        1 => "sb",
        2 => "sh",
        4 => "sw",
        _ => "sd",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveKind {
    Int,
    Flt,
    /// Bit-pattern move of a variadic float into an integer register.
    FltToInt,
}

fn fsuffix(size: u8) -> &'static str {
    if size == 4 {
        "s"
    } else {
        "d"
    }
}

impl<'a> Emitter<'a> {
    fn reg(&self, v: VRegId) -> &'static str {
        let vr = self.func.vregs.get(v);
        let phys = vr.phys.expect("vreg must be allocated before emission");
        if vr.is_flonum() {
            flt_reg(phys)
        } else {
            int_reg(phys)
        }
    }

    fn konst(&self, v: VRegId) -> Option<i64> {
        let vr = self.func.vregs.get(v);
        vr.is_const().then_some(vr.konst)
    }

    /// `rd = rs + imm`, materializing immediates outside the 12-bit range.
    fn emit_addi(&mut self, rd: &str, rs: &str, imm: i64) {
        if imm == 0 {
            if rd != rs {
                self.asm.code(format!("mv {}, {}", rd, rs));
            }
            return;
        }
        if is_im12(imm) {
            self.asm.code(format!("addi {}, {}, {}", rd, rs, imm));
        } else {
            let scratch = if rd != rs { rd } else { SCRATCH };
            self.asm.code(format!("li {}, {}", scratch, imm));
            self.asm.code(format!("add {}, {}, {}", rd, rs, scratch));
        }
    }

    /// Frame-relative load with offset legalization through the
    /// destination register.
    fn emit_frame_load(&mut self, op: &str, rd: &str, offset: i64, flonum: bool) {
        if is_im12(offset) {
            self.asm.code(format!("{} {}, {}({})", op, rd, offset, FP));
            return;
        }
        let scratch = if flonum { SCRATCH } else { rd };
        self.asm.code(format!("li {}, {}", scratch, offset));
        self.asm.code(format!("add {}, {}, {}", scratch, FP, scratch));
        self.asm.code(format!("{} {}, 0({})", op, rd, scratch));
    }

    /// Frame-relative store; oversized offsets build the address in the
    /// dedicated temporary.
    fn emit_frame_store(&mut self, op: &str, rs: &str, offset: i64) {
        if is_im12(offset) {
            self.asm.code(format!("{} {}, {}({})", op, rs, offset, FP));
            return;
        }
        self.asm.code(format!("li {}, {}", SCRATCH, offset));
        self.asm.code(format!("add {}, {}, {}", SCRATCH, FP, SCRATCH));
        self.asm.code(format!("{} {}, 0({})", op, rs, SCRATCH));
    }

    fn slot_offset(&self, slot: usize) -> i64 {
        self.func.slots[slot].offset
    }

    // ---- prologue / epilogue ----

    fn emit_prologue(&mut self) {
        if self.has_frame {
            self.asm.code("addi sp, sp, -16");
            self.asm.code("sd ra, 8(sp)");
            self.asm.code(format!("sd {}, 0(sp)", FP));
            self.asm.code(format!("mv {}, sp", FP));
            if self.local_size > 0 {
                let size = self.local_size;
                if is_im12(-size) {
                    self.asm.code(format!("addi sp, sp, {}", -size));
                } else {
                    self.asm.code(format!("li {}, {}", SCRATCH, size));
                    self.asm.code(format!("sub sp, sp, {}", SCRATCH));
                }
            }
            let saves = self.callee_saves.clone();
            for (idx, flonum, offset) in saves {
                let (op, name) = if flonum {
                    ("fsd", FLT_REGS[idx])
                } else {
                    ("sd", INT_REGS[idx])
                };
                self.emit_frame_store(op, name, offset);
            }
        }
        self.emit_param_moves();
    }

    fn emit_param_moves(&mut self) {
        let params = self.func.params.clone();
        let mut moves: Vec<(&'static str, &'static str, MoveKind)> = Vec::new();
        for param in &params {
            let src: &'static str = if param.flonum {
                FLT_REGS[param.reg_index]
            } else {
                INT_REGS[param.reg_index]
            };
            match &param.storage {
                ParamStorage::Reg(vreg) => {
                    let dst = self.reg(*vreg);
                    if dst != src {
                        let kind = if param.flonum { MoveKind::Flt } else { MoveKind::Int };
                        moves.push((dst, src, kind));
                    }
                }
                ParamStorage::Frame(slot) => {
                    let offset = self.slot_offset(*slot);
                    let op = store_op(8, param.flonum);
                    self.emit_frame_store(op, src, offset);
                }
                ParamStorage::StackIncoming(_) => {}
            }
        }
        self.emit_parallel_moves(moves);
    }

    /// Emit register-to-register moves without clobbering pending sources;
    /// cycles break through the scratch register.
    fn emit_parallel_moves(&mut self, mut moves: Vec<(&'static str, &'static str, MoveKind)>) {
        while !moves.is_empty() {
            let ready = moves
                .iter()
                .position(|(dst, _, _)| !moves.iter().any(|(_, src, _)| src == dst));
            match ready {
                Some(i) => {
                    let (dst, src, kind) = moves.remove(i);
                    match kind {
                        MoveKind::Int => self.asm.code(format!("mv {}, {}", dst, src)),
                        MoveKind::Flt => self.asm.code(format!("fmv.d {}, {}", dst, src)),
                        // Variadic floats travel as bit patterns in
                        // integer argument registers.
                        MoveKind::FltToInt => {
                            self.asm.code(format!("fmv.x.d {}, {}", dst, src))
                        }
                    }
                }
                None => {
                    // Break the cycle: park one source in the scratch.
                    let (_, src, kind) = moves[0];
                    let scratch = match kind {
                        MoveKind::Flt => FSCRATCH,
                        _ => SCRATCH,
                    };
                    match kind {
                        MoveKind::Flt => {
                            self.asm.code(format!("fmv.d {}, {}", scratch, src))
                        }
                        _ => self.asm.code(format!("mv {}, {}", scratch, src)),
                    }
                    for m in moves.iter_mut() {
                        if m.1 == src {
                            m.1 = scratch;
                        }
                    }
                }
            }
        }
    }

    fn emit_epilogue(&mut self) {
        let saves = self.callee_saves.clone();
        for (idx, flonum, offset) in saves {
            let (op, name) = if flonum {
                ("fld", FLT_REGS[idx])
            } else {
                ("ld", INT_REGS[idx])
            };
            self.emit_frame_load(op, name, offset, flonum);
        }
        if self.has_frame {
            self.asm.code(format!("mv sp, {}", FP));
            self.asm.code("ld ra, 8(sp)");
            self.asm.code(format!("ld {}, 0(sp)", FP));
            self.asm.code("addi sp, sp, 16");
        }
        self.asm.code("ret");
    }

    // ---- per-opcode handlers ----

    fn emit_ir(&mut self, ir: &IrInst, next_bb: Option<&str>) {
        match ir {
            IrInst::Bofs { dst, slot } => {
                let rd = self.reg(*dst);
                let offset = self.slot_offset(*slot);
                self.emit_addi(rd, FP, offset);
            }
            IrInst::Iofs { dst, label, offset } => {
                let rd = self.reg(*dst);
                if *offset == 0 {
                    self.asm.code(format!("la {}, {}", rd, label));
                } else {
                    self.asm.code(format!("la {}, {}+{}", rd, label, offset));
                }
            }
            IrInst::Sofs { dst, offset } => {
                let rd = self.reg(*dst);
                self.emit_addi(rd, "sp", *offset);
            }
            IrInst::Load { dst, addr } => {
                let vr = self.func.vregs.get(*dst);
                let op = load_op(vr.size, vr.is_unsigned(), vr.is_flonum());
                let rd = self.reg(*dst);
                let ra = self.reg(*addr);
                self.asm.code(format!("{} {}, 0({})", op, rd, ra));
            }
            IrInst::LoadS { dst, slot } => {
                let flonum = self.func.vregs.get(*dst).is_flonum();
                let op = if flonum { "fld" } else { "ld" };
                let rd = self.reg(*dst);
                let offset = self.slot_offset(*slot);
                self.emit_frame_load(op, rd, offset, flonum);
            }
            IrInst::Store { addr, src } => {
                let ra = self.reg(*addr);
                let (size, flonum) = {
                    let vr = self.func.vregs.get(*src);
                    (vr.size, vr.is_flonum())
                };
                let rs = match self.konst(*src) {
                    Some(0) if !flonum => "zero",
                    _ => self.reg(*src),
                };
                let op = store_op(size, flonum);
                self.asm.code(format!("{} {}, 0({})", op, rs, ra));
            }
            IrInst::StoreS { slot, src } => {
                let (flonum, _) = {
                    let vr = self.func.vregs.get(*src);
                    (vr.is_flonum(), vr.size)
                };
                let op = if flonum { "fsd" } else { "sd" };
                let rs = self.reg(*src);
                let offset = self.slot_offset(*slot);
                self.emit_frame_store(op, rs, offset);
            }
            IrInst::Bin { op, dst, lhs, rhs } => self.emit_bin(*op, *dst, *lhs, *rhs),
            IrInst::Un { op, dst, src } => self.emit_un(*op, *dst, *src),
            IrInst::PtrAdd { dst, base, index, scale, offset } => {
                self.emit_ptradd(*dst, *base, *index, *scale, *offset)
            }
            IrInst::Mov { dst, src } => self.emit_mov(*dst, *src),
            IrInst::Cast { dst, src, src_size, src_unsigned } => {
                self.emit_cast(*dst, *src, *src_size, *src_unsigned)
            }
            IrInst::Cond { dst, cc, lhs, rhs } => self.emit_cond(*dst, *cc, *lhs, *rhs),
            IrInst::Jmp { cc, lhs, rhs, bb } => {
                let label = self.func.block(*bb).label.clone();
                if cc.kind == CcKind::Any {
                    if next_bb != Some(label.as_str()) {
                        self.asm.code(format!("j {}", label));
                    }
                } else {
                    self.emit_cond_branch(*cc, lhs.unwrap(), rhs.unwrap(), &label);
                }
            }
            IrInst::TJmp { value, table } => self.emit_tjmp(*value, table),
            IrInst::Precall { site } => self.emit_precall(*site),
            IrInst::Pusharg { src, index, flonum } => {
                self.pushargs.push((*src, *index, *flonum));
            }
            IrInst::Call { dst, target, site, .. } => self.emit_call(*dst, target, *site),
            IrInst::Result { src } => {
                let flonum = self.func.vregs.get(*src).is_flonum();
                if flonum {
                    let rs = self.reg(*src);
                    if rs != "fa0" {
                        self.asm.code(format!("fmv.d fa0, {}", rs));
                    }
                } else {
                    match self.konst(*src) {
                        Some(c) => self.asm.code(format!("li a0, {}", c)),
                        None => {
                            let rs = self.reg(*src);
                            if rs != "a0" {
                                self.asm.code(format!("mv a0, {}", rs));
                            }
                        }
                    }
                }
            }
            IrInst::Subsp { value } => {
                let v = *value;
                if is_im12(v) {
                    self.asm.code(format!("addi sp, sp, {}", v));
                } else {
                    self.asm.code(format!("li {}, {}", SCRATCH, v.abs()));
                    if v < 0 {
                        self.asm.code(format!("sub sp, sp, {}", SCRATCH));
                    } else {
                        self.asm.code(format!("add sp, sp, {}", SCRATCH));
                    }
                }
            }
            IrInst::Asm { template } => {
                self.asm.code(template.clone());
            }
        }
    }

    fn emit_bin(&mut self, op: IrBinOp, dst: VRegId, lhs: VRegId, rhs: VRegId) {
        let vr = self.func.vregs.get(dst);
        if vr.is_flonum() {
            let name = match op {
                IrBinOp::Add => "fadd",
                IrBinOp::Sub => "fsub",
                IrBinOp::Mul => "fmul",
                IrBinOp::Div => "fdiv",
                _ => unreachable!("no floating form for this operator"),
            };
            let suffix = fsuffix(vr.size);
            let (rd, rl, rr) = (self.reg(dst), self.reg(lhs), self.reg(rhs));
            self.asm.code(format!("{}.{} {}, {}, {}", name, suffix, rd, rl, rr));
            return;
        }

        let word = vr.size <= 4;
        let unsigned = vr.is_unsigned();
        let rd = self.reg(dst);
        let rl = self.reg(lhs);

        match op {
            IrBinOp::Add | IrBinOp::BitAnd | IrBinOp::BitOr | IrBinOp::BitXor => {
                if let Some(c) = self.konst(rhs) {
                    let name = match op {
                        IrBinOp::Add => {
                            if word {
                                "addiw"
                            } else {
                                "addi"
                            }
                        }
                        IrBinOp::BitAnd => "andi",
                        IrBinOp::BitOr => "ori",
                        _ => "xori",
                    };
                    self.asm.code(format!("{} {}, {}, {}", name, rd, rl, c));
                    return;
                }
                let rr = self.reg(rhs);
                let name = match op {
                    IrBinOp::Add => {
                        if word {
                            "addw"
                        } else {
                            "add"
                        }
                    }
                    IrBinOp::BitAnd => "and",
                    IrBinOp::BitOr => "or",
                    _ => "xor",
                };
                self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
            }
            IrBinOp::Sub => {
                let rr = self.reg(rhs);
                let name = if word { "subw" } else { "sub" };
                self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
            }
            IrBinOp::Mul => {
                let rr = self.reg(rhs);
                let name = if word { "mulw" } else { "mul" };
                self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
            }
            IrBinOp::Div => {
                let rr = self.reg(rhs);
                let name = match (word, unsigned) {
                    (true, true) => "divuw",
                    (true, false) => "divw",
                    (false, true) => "divu",
                    (false, false) => "div",
                };
                self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
            }
            IrBinOp::Mod => {
                let rr = self.reg(rhs);
                let name = match (word, unsigned) {
                    (true, true) => "remuw",
                    (true, false) => "remw",
                    (false, true) => "remu",
                    (false, false) => "rem",
                };
                self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
            }
            IrBinOp::LShift => {
                let mask = if word { 31 } else { 63 };
                match self.konst(rhs) {
                    Some(c) => {
                        let name = if word { "slliw" } else { "slli" };
                        self.asm.code(format!("{} {}, {}, {}", name, rd, rl, c & mask));
                    }
                    None => {
                        let rr = self.reg(rhs);
                        let name = if word { "sllw" } else { "sll" };
                        self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
                    }
                }
            }
            IrBinOp::RShift => {
                let mask = if word { 31 } else { 63 };
                match self.konst(rhs) {
                    Some(c) => {
                        let name = match (word, unsigned) {
                            (true, true) => "srliw",
                            (true, false) => "sraiw",
                            (false, true) => "srli",
                            (false, false) => "srai",
                        };
                        self.asm.code(format!("{} {}, {}, {}", name, rd, rl, c & mask));
                    }
                    None => {
                        let rr = self.reg(rhs);
                        let name = match (word, unsigned) {
                            (true, true) => "srlw",
                            (true, false) => "sraw",
                            (false, true) => "srl",
                            (false, false) => "sra",
                        };
                        self.asm.code(format!("{} {}, {}, {}", name, rd, rl, rr));
                    }
                }
            }
        }
    }

    fn emit_un(&mut self, op: IrUnOp, dst: VRegId, src: VRegId) {
        let vr = self.func.vregs.get(dst);
        let rd = self.reg(dst);
        if vr.is_flonum() {
            let rs = self.reg(src);
            match op {
                IrUnOp::Neg => {
                    self.asm.code(format!("fneg.{} {}, {}", fsuffix(vr.size), rd, rs))
                }
                IrUnOp::BitNot => unreachable!("no floating bitwise complement"),
            }
            return;
        }
        let rs = self.reg(src);
        match op {
            IrUnOp::Neg => {
                let name = if vr.size <= 4 { "negw" } else { "neg" };
                self.asm.code(format!("{} {}, {}", name, rd, rs));
            }
            IrUnOp::BitNot => self.asm.code(format!("not {}, {}", rd, rs)),
        }
    }

    fn emit_ptradd(
        &mut self,
        dst: VRegId,
        base: VRegId,
        index: Option<VRegId>,
        scale: usize,
        offset: i64,
    ) {
        let rd = self.reg(dst);
        let rb = self.reg(base);
        match index {
            None => self.emit_addi(rd, rb, offset),
            Some(index) => {
                let ri = self.reg(index);
                if scale == 1 {
                    self.asm.code(format!("add {}, {}, {}", rd, rb, ri));
                } else {
                    let shift = scale.trailing_zeros();
                    let scratch = if rd != rb { rd } else { SCRATCH };
                    self.asm.code(format!("slli {}, {}, {}", scratch, ri, shift));
                    self.asm.code(format!("add {}, {}, {}", rd, rb, scratch));
                }
                if offset != 0 {
                    self.emit_addi(rd, rd, offset);
                }
            }
        }
    }

    fn emit_mov(&mut self, dst: VRegId, src: VRegId) {
        let vr = self.func.vregs.get(dst);
        let rd = self.reg(dst);
        if vr.is_flonum() {
            let rs = self.reg(src);
            if rd != rs {
                self.asm.code(format!("fmv.{} {}, {}", fsuffix(vr.size), rd, rs));
            }
            return;
        }
        match self.konst(src) {
            Some(c) => self.asm.code(format!("li {}, {}", rd, c)),
            None => {
                let rs = self.reg(src);
                if rd != rs {
                    self.asm.code(format!("mv {}, {}", rd, rs));
                }
            }
        }
    }

    fn emit_cast(&mut self, dst: VRegId, src: VRegId, src_size: u8, src_unsigned: bool) {
        let dvr = self.func.vregs.get(dst);
        let svr = self.func.vregs.get(src);
        let rd = self.reg(dst);
        let rs = self.reg(src);
        match (svr.is_flonum(), dvr.is_flonum()) {
            (false, false) => {
                let dst_size = dvr.size;
                if dst_size == 8 && src_size == 4 && !src_unsigned {
                    self.asm.code(format!("sext.w {}, {}", rd, rs));
                    return;
                }
                // Shift pair over the smaller width; the source's sign
                // picks the refill.
                let small = dst_size.min(src_size);
                let bits = 64 - (small as u32) * 8;
                if bits == 0 {
                    if rd != rs {
                        self.asm.code(format!("mv {}, {}", rd, rs));
                    }
                    return;
                }
                self.asm.code(format!("slli {}, {}, {}", rd, rs, bits));
                let refill = if src_unsigned { "srli" } else { "srai" };
                self.asm.code(format!("{} {}, {}, {}", refill, rd, rd, bits));
            }
            (false, true) => {
                let from = match (src_size <= 4, src_unsigned) {
                    (true, false) => "w",
                    (true, true) => "wu",
                    (false, false) => "l",
                    (false, true) => "lu",
                };
                self.asm.code(format!("fcvt.{}.{} {}, {}", fsuffix(dvr.size), from, rd, rs));
            }
            (true, false) => {
                let to = match (dvr.size <= 4, dvr.is_unsigned()) {
                    (true, false) => "w",
                    (true, true) => "wu",
                    (false, false) => "l",
                    (false, true) => "lu",
                };
                self.asm.code(format!("fcvt.{}.{} {}, {}, rtz", to, fsuffix(src_size), rd, rs));
            }
            (true, true) => {
                if dvr.size != src_size {
                    self.asm.code(format!(
                        "fcvt.{}.{} {}, {}",
                        fsuffix(dvr.size),
                        fsuffix(src_size),
                        rd,
                        rs
                    ));
                } else if rd != rs {
                    self.asm.code(format!("fmv.{} {}, {}", fsuffix(dvr.size), rd, rs));
                }
            }
        }
    }

    fn emit_cond(&mut self, dst: VRegId, cc: CondCode, lhs: VRegId, rhs: VRegId) {
        let rd = self.reg(dst);
        if cc.flonum {
            let suffix = fsuffix(self.func.vregs.get(lhs).size);
            let rl = self.reg(lhs);
            let rr = self.reg(rhs);
            match cc.kind {
                CcKind::Eq => self.asm.code(format!("feq.{} {}, {}, {}", suffix, rd, rl, rr)),
                CcKind::Ne => {
                    self.asm.code(format!("feq.{} {}, {}, {}", suffix, rd, rl, rr));
                    self.asm.code(format!("xori {}, {}, 1", rd, rd));
                }
                CcKind::Lt => self.asm.code(format!("flt.{} {}, {}, {}", suffix, rd, rl, rr)),
                CcKind::Le => self.asm.code(format!("fle.{} {}, {}, {}", suffix, rd, rl, rr)),
                CcKind::Gt => self.asm.code(format!("flt.{} {}, {}, {}", suffix, rd, rr, rl)),
                CcKind::Ge => self.asm.code(format!("fle.{} {}, {}, {}", suffix, rd, rr, rl)),
                CcKind::Any => unreachable!(),
            }
            return;
        }

        let rl = self.reg(lhs);
        let rr = match self.konst(rhs) {
            Some(0) => "zero",
            _ => self.reg(rhs),
        };
        let slt = if cc.unsigned { "sltu" } else { "slt" };
        match cc.kind {
            CcKind::Eq | CcKind::Ne => {
                // Equality against non-zero subtracts, then compares with
                // zero.
                let operand = if rr == "zero" {
                    rl.to_string()
                } else {
                    self.asm.code(format!("sub {}, {}, {}", rd, rl, rr));
                    rd.to_string()
                };
                let set = if cc.kind == CcKind::Eq { "seqz" } else { "snez" };
                self.asm.code(format!("{} {}, {}", set, rd, operand));
            }
            CcKind::Lt => self.asm.code(format!("{} {}, {}, {}", slt, rd, rl, rr)),
            CcKind::Gt => self.asm.code(format!("{} {}, {}, {}", slt, rd, rr, rl)),
            CcKind::Le => {
                self.asm.code(format!("{} {}, {}, {}", slt, rd, rr, rl));
                self.asm.code(format!("xori {}, {}, 1", rd, rd));
            }
            CcKind::Ge => {
                self.asm.code(format!("{} {}, {}, {}", slt, rd, rl, rr));
                self.asm.code(format!("xori {}, {}, 1", rd, rd));
            }
            CcKind::Any => unreachable!(),
        }
    }

    fn emit_cond_branch(&mut self, cc: CondCode, lhs: VRegId, rhs: VRegId, label: &str) {
        debug_assert!(!cc.flonum, "floating branches are split by the tweak pass");
        let rl = self.reg(lhs);
        let rr = match self.konst(rhs) {
            Some(0) => "zero",
            _ => self.reg(rhs),
        };
        let (name, a, b) = match (cc.kind, cc.unsigned) {
            (CcKind::Eq, _) => ("beq", rl, rr),
            (CcKind::Ne, _) => ("bne", rl, rr),
            (CcKind::Lt, false) => ("blt", rl, rr),
            (CcKind::Lt, true) => ("bltu", rl, rr),
            (CcKind::Ge, false) => ("bge", rl, rr),
            (CcKind::Ge, true) => ("bgeu", rl, rr),
            // Swapped operands express le/gt.
            (CcKind::Le, false) => ("bge", rr, rl),
            (CcKind::Le, true) => ("bgeu", rr, rl),
            (CcKind::Gt, false) => ("blt", rr, rl),
            (CcKind::Gt, true) => ("bltu", rr, rl),
            (CcKind::Any, _) => unreachable!(),
        };
        self.asm.code(format!("{} {}, {}, {}", name, a, b, label));
    }

    fn emit_tjmp(&mut self, value: VRegId, table: &[rvcc_ir::BBId]) {
        let label = format!(".Ltj{}.{}", self.func.name, self.table_counter);
        self.table_counter += 1;
        let rv = self.reg(value);
        // Shift the case index by the word size, add the table base, load
        // and jump.
        self.asm.code(format!("slli {}, {}, 3", SCRATCH, rv));
        self.asm.code(format!("la {}, {}", SCRATCH2, label));
        self.asm.code(format!("add {}, {}, {}", SCRATCH, SCRATCH, SCRATCH2));
        self.asm.code(format!("ld {}, 0({})", SCRATCH, SCRATCH));
        self.asm.code(format!("jr {}", SCRATCH));

        self.asm.line(Section::Rodata, "\t.balign 8");
        self.asm.label(Section::Rodata, &label);
        for bb in table {
            let target = self.func.block(*bb).label.clone();
            self.asm.line(Section::Rodata, format!("\t.quad {}", target));
        }
    }

    fn emit_precall(&mut self, site: usize) {
        let saves = self.func.call_sites[site].caller_saved.clone();
        for (phys, flonum) in saves {
            let offset = self.csave_slots[&(phys, flonum)];
            let (op, name) = if flonum {
                ("fsd", flt_reg(phys))
            } else {
                ("sd", int_reg(phys))
            };
            self.emit_frame_store(op, name, offset);
        }
    }

    fn emit_call(&mut self, dst: Option<VRegId>, target: &CallTarget, site: usize) {
        // Bind register arguments; the parallel resolution keeps sources
        // intact until read.
        let pushargs = std::mem::take(&mut self.pushargs);
        let mut moves: Vec<(&'static str, &'static str, MoveKind)> = Vec::new();
        let mut consts: Vec<(&'static str, i64)> = Vec::new();
        for (src, index, flonum) in pushargs.iter().copied() {
            let dst_name: &'static str = if flonum { FLT_REGS[index] } else { INT_REGS[index] };
            let src_flonum = self.func.vregs.get(src).is_flonum();
            match self.konst(src) {
                Some(c) if !flonum => consts.push((dst_name, c)),
                _ => {
                    let src_name = self.reg(src);
                    if src_name != dst_name {
                        let kind = match (src_flonum, flonum) {
                            (true, false) => MoveKind::FltToInt,
                            (true, true) => MoveKind::Flt,
                            _ => MoveKind::Int,
                        };
                        moves.push((dst_name, src_name, kind));
                    }
                }
            }
        }

        // An indirect target moves to the scratch before arguments land.
        let indirect = match target {
            CallTarget::Reg(r) => {
                let rs = self.reg(*r);
                self.asm.code(format!("mv {}, {}", SCRATCH, rs));
                true
            }
            CallTarget::Label(_) => false,
        };

        self.emit_parallel_moves(moves);
        for (dst_name, c) in consts {
            self.asm.code(format!("li {}, {}", dst_name, c));
        }

        match target {
            CallTarget::Label(name) => self.asm.code(format!("call {}", name)),
            CallTarget::Reg(_) => {
                debug_assert!(indirect);
                self.asm.code(format!("jalr {}", SCRATCH));
            }
        }

        // Restore caller-saved values.
        let saves = self.func.call_sites[site].caller_saved.clone();
        for (phys, flonum) in saves {
            let offset = self.csave_slots[&(phys, flonum)];
            let (op, name) = if flonum {
                ("fld", flt_reg(phys))
            } else {
                ("ld", int_reg(phys))
            };
            self.emit_frame_load(op, name, offset, flonum);
        }

        if let Some(dst) = dst {
            let vr = self.func.vregs.get(dst);
            let rd = self.reg(dst);
            if vr.is_flonum() {
                if rd != "fa0" {
                    self.asm.code(format!("fmv.d {}, fa0", rd));
                }
            } else if rd != "a0" {
                self.asm.code(format!("mv {}, a0", rd));
            }
        }
    }
}

fn align_down(value: i64, align: i64) -> i64 {
    value & !(align - 1)
}

/// Resolve frame offsets: callee-save area, caller-save area, local and
/// spill slots, all below the frame pointer; incoming stack parameters
/// above the saved `ra`/`fp` pair.
#[allow(clippy::type_complexity)]
fn layout_frame(
    func: &mut FuncIr,
) -> (Vec<(usize, bool, i64)>, hashbrown::HashMap<(u8, bool), i64>, i64, bool) {
    let mut used_callee: Vec<(usize, bool)> = Vec::new();
    for (_, vr) in func.vregs.iter() {
        let Some(phys) = vr.phys else { continue };
        let phys = phys as usize;
        let flonum = vr.is_flonum();
        let (temp_count, phys_count) = if flonum {
            (FLT_TEMP_COUNT, super::FLT_PHYS_COUNT)
        } else {
            (INT_TEMP_COUNT, super::INT_PHYS_COUNT)
        };
        if phys >= temp_count && phys < phys_count && !used_callee.contains(&(phys, flonum)) {
            used_callee.push((phys, flonum));
        }
    }
    used_callee.sort();

    let mut offset = 0i64;
    let mut callee_saves = Vec::with_capacity(used_callee.len());
    for (phys, flonum) in used_callee {
        offset -= 8;
        callee_saves.push((phys, flonum, offset));
    }

    // One fixed slot per caller-saved register that any call site saves.
    let mut csave_slots: hashbrown::HashMap<(u8, bool), i64> = hashbrown::HashMap::new();
    for site in &func.call_sites {
        for key in &site.caller_saved {
            if !csave_slots.contains_key(key) {
                offset -= 8;
                csave_slots.insert(*key, offset);
            }
        }
    }

    for slot in &mut func.slots {
        if let Some(incoming) = slot.incoming_offset {
            slot.offset = 16 + incoming;
            continue;
        }
        offset = align_down(offset - slot.size as i64, slot.align.max(1) as i64);
        slot.offset = offset;
    }

    let local_size = (-offset + 15) & !15;
    let has_frame = local_size > 0
        || func.has_calls()
        || !callee_saves.is_empty()
        || func.slots.iter().any(|s| s.incoming_offset.is_some());
    func.frame_size = if has_frame { local_size + 16 } else { 0 };
    (callee_saves, csave_slots, local_size, has_frame)
}

pub(crate) fn emit_function(func: &mut FuncIr, asm: &mut AsmStream) {
    debug!("emitting `{}`", func.name);
    let (callee_saves, csave_slots, local_size, has_frame) = layout_frame(func);

    asm.line(Section::Text, "");
    if !func.is_static {
        asm.line(Section::Text, format!(".global {}", func.name));
    }
    asm.label(Section::Text, &func.name);

    let exit_reachable = func.exit_reachable();
    let order = func.order.clone();
    let mut emitter = Emitter {
        func,
        asm,
        csave_slots,
        callee_saves,
        local_size,
        has_frame,
        pushargs: Vec::new(),
        table_counter: 0,
    };
    emitter.emit_prologue();

    for (i, id) in order.iter().enumerate() {
        let label = emitter.func.block(*id).label.clone();
        if i > 0 {
            emitter.asm.label(Section::Text, &label);
        }
        let next_label = order
            .get(i + 1)
            .map(|n| emitter.func.block(*n).label.clone());
        let irs = emitter.func.block(*id).irs.clone();
        for ir in &irs {
            emitter.emit_ir(ir, next_label.as_deref());
        }
        if *id == emitter.func.exit_bb && exit_reachable {
            emitter.emit_epilogue();
        }
    }

    // Floating literals promoted to rodata.
    for fc in &emitter.func.float_consts {
        emitter.asm.line(Section::Rodata, format!("\t.balign {}", fc.size));
        emitter.asm.label(Section::Rodata, &fc.label);
        if fc.size == 4 {
            emitter.asm.line(Section::Rodata, format!("\t.long {}", fc.bits as u32));
        } else {
            emitter.asm.line(Section::Rodata, format!("\t.quad {}", fc.bits));
        }
    }
}
