//! IR instructions, basic blocks and the per-function IR container.

use indexmap::IndexSet;
use smallvec::SmallVec;
use std::fmt;

use rvcc_ast::BinOp;

use crate::vreg::{VRegId, VRegPool};

/// Index of a basic block in its function's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBId(pub u32);

impl fmt::Display for BBId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcKind {
    /// Unconditional.
    Any,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A condition code: comparison kind plus operand class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondCode {
    pub kind: CcKind,
    pub unsigned: bool,
    pub flonum: bool,
}

impl CondCode {
    pub const ANY: CondCode = CondCode { kind: CcKind::Any, unsigned: false, flonum: false };

    pub fn new(kind: CcKind, unsigned: bool, flonum: bool) -> Self {
        Self { kind, unsigned, flonum }
    }

    pub fn from_binop(op: BinOp, unsigned: bool, flonum: bool) -> Self {
        let kind = match op {
            BinOp::Eq => CcKind::Eq,
            BinOp::Ne => CcKind::Ne,
            BinOp::Lt => CcKind::Lt,
            BinOp::Le => CcKind::Le,
            BinOp::Gt => CcKind::Gt,
            BinOp::Ge => CcKind::Ge,
            _ => unreachable!("not a comparison operator"),
        };
        Self::new(kind, unsigned, flonum)
    }

    /// The code taken when the branch sense is inverted.
    pub fn negate(self) -> Self {
        let kind = match self.kind {
            CcKind::Any => CcKind::Any,
            CcKind::Eq => CcKind::Ne,
            CcKind::Ne => CcKind::Eq,
            CcKind::Lt => CcKind::Ge,
            CcKind::Ge => CcKind::Lt,
            CcKind::Le => CcKind::Gt,
            CcKind::Gt => CcKind::Le,
        };
        Self { kind, ..self }
    }

    /// The code for swapped operands.
    pub fn swap(self) -> Self {
        let kind = match self.kind {
            CcKind::Lt => CcKind::Gt,
            CcKind::Gt => CcKind::Lt,
            CcKind::Le => CcKind::Ge,
            CcKind::Ge => CcKind::Le,
            other => other,
        };
        Self { kind, ..self }
    }
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            CcKind::Any => "any",
            CcKind::Eq => "eq",
            CcKind::Ne => "ne",
            CcKind::Lt => "lt",
            CcKind::Le => "le",
            CcKind::Gt => "gt",
            CcKind::Ge => "ge",
        };
        write!(f, "{}", name)?;
        if self.unsigned {
            write!(f, "u")?;
        }
        if self.flonum {
            write!(f, ".f")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrBinOp {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrUnOp {
    Neg,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Label(String),
    Reg(VRegId),
}

/// A three-address instruction. Sizes and signedness come from the
/// destination vreg unless an operand-specific field says otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum IrInst {
    /// Frame-slot address into `dst`.
    Bofs { dst: VRegId, slot: usize },
    /// Global label address (plus byte offset) into `dst`.
    Iofs { dst: VRegId, label: String, offset: i64 },
    /// Stack-pointer-relative address, for outgoing call arguments.
    Sofs { dst: VRegId, offset: i64 },
    Load { dst: VRegId, addr: VRegId },
    /// Reload of a spilled vreg from its slot.
    LoadS { dst: VRegId, slot: usize },
    Store { addr: VRegId, src: VRegId },
    /// Writeback of a spilled vreg to its slot.
    StoreS { slot: usize, src: VRegId },
    Bin { op: IrBinOp, dst: VRegId, lhs: VRegId, rhs: VRegId },
    Un { op: IrUnOp, dst: VRegId, src: VRegId },
    /// `dst = base + index*scale + offset`; scale is a power of two <= 8.
    PtrAdd { dst: VRegId, base: VRegId, index: Option<VRegId>, scale: usize, offset: i64 },
    Mov { dst: VRegId, src: VRegId },
    Cast { dst: VRegId, src: VRegId, src_size: u8, src_unsigned: bool },
    /// Materialize `lhs cc rhs` as 0/1 in `dst`.
    Cond { dst: VRegId, cc: CondCode, lhs: VRegId, rhs: VRegId },
    /// Branch to `bb`; unconditional when `cc` is `Any`.
    Jmp { cc: CondCode, lhs: Option<VRegId>, rhs: Option<VRegId>, bb: BBId },
    /// Indirect jump through a case-indexed table emitted into rodata.
    TJmp { value: VRegId, table: Vec<BBId> },
    /// Start of a call region; indexes the function's call-site list.
    Precall { site: usize },
    /// A register argument, already evaluated, bound to parameter `index`.
    Pusharg { src: VRegId, index: usize, flonum: bool },
    Call {
        dst: Option<VRegId>,
        target: CallTarget,
        total_args: usize,
        reg_args: usize,
        vaargs: bool,
        site: usize,
    },
    /// Move the return value into the return register.
    Result { src: VRegId },
    /// Adjust the stack pointer by a constant (negative grows).
    Subsp { value: i64 },
    Asm { template: String },
}

impl IrInst {
    /// Virtual registers read by this instruction.
    pub fn srcs(&self) -> SmallVec<[VRegId; 2]> {
        let mut out = SmallVec::new();
        match self {
            IrInst::Load { addr, .. } => out.push(*addr),
            IrInst::Store { addr, src } => {
                out.push(*addr);
                out.push(*src);
            }
            IrInst::StoreS { src, .. } => out.push(*src),
            IrInst::Bin { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            IrInst::Un { src, .. } => out.push(*src),
            IrInst::PtrAdd { base, index, .. } => {
                out.push(*base);
                if let Some(index) = index {
                    out.push(*index);
                }
            }
            IrInst::Mov { src, .. } => out.push(*src),
            IrInst::Cast { src, .. } => out.push(*src),
            IrInst::Cond { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            IrInst::Jmp { lhs, rhs, .. } => {
                if let Some(lhs) = lhs {
                    out.push(*lhs);
                }
                if let Some(rhs) = rhs {
                    out.push(*rhs);
                }
            }
            IrInst::TJmp { value, .. } => out.push(*value),
            IrInst::Pusharg { src, .. } => out.push(*src),
            IrInst::Call { target: CallTarget::Reg(r), .. } => out.push(*r),
            IrInst::Result { src } => out.push(*src),
            _ => {}
        }
        out
    }

    /// Virtual register written by this instruction.
    pub fn dst(&self) -> Option<VRegId> {
        match self {
            IrInst::Bofs { dst, .. }
            | IrInst::Iofs { dst, .. }
            | IrInst::Sofs { dst, .. }
            | IrInst::Load { dst, .. }
            | IrInst::LoadS { dst, .. }
            | IrInst::Bin { dst, .. }
            | IrInst::Un { dst, .. }
            | IrInst::PtrAdd { dst, .. }
            | IrInst::Mov { dst, .. }
            | IrInst::Cast { dst, .. }
            | IrInst::Cond { dst, .. } => Some(*dst),
            IrInst::Call { dst, .. } => *dst,
            _ => None,
        }
    }

    /// Rewrite one source operand.
    pub fn replace_src(&mut self, from: VRegId, to: VRegId) {
        let patch = |r: &mut VRegId| {
            if *r == from {
                *r = to;
            }
        };
        match self {
            IrInst::Load { addr, .. } => patch(addr),
            IrInst::Store { addr, src } => {
                patch(addr);
                patch(src);
            }
            IrInst::StoreS { src, .. } => patch(src),
            IrInst::Bin { lhs, rhs, .. } => {
                patch(lhs);
                patch(rhs);
            }
            IrInst::Un { src, .. } => patch(src),
            IrInst::PtrAdd { base, index, .. } => {
                patch(base);
                if let Some(index) = index {
                    patch(index);
                }
            }
            IrInst::Mov { src, .. } => patch(src),
            IrInst::Cast { src, .. } => patch(src),
            IrInst::Cond { lhs, rhs, .. } => {
                patch(lhs);
                patch(rhs);
            }
            IrInst::Jmp { lhs, rhs, .. } => {
                if let Some(lhs) = lhs {
                    patch(lhs);
                }
                if let Some(rhs) = rhs {
                    patch(rhs);
                }
            }
            IrInst::TJmp { value, .. } => patch(value),
            IrInst::Pusharg { src, .. } => patch(src),
            IrInst::Call { target: CallTarget::Reg(r), .. } => patch(r),
            IrInst::Result { src } => patch(src),
            _ => {}
        }
    }

    pub fn replace_dst(&mut self, to: VRegId) {
        match self {
            IrInst::Bofs { dst, .. }
            | IrInst::Iofs { dst, .. }
            | IrInst::Sofs { dst, .. }
            | IrInst::Load { dst, .. }
            | IrInst::LoadS { dst, .. }
            | IrInst::Bin { dst, .. }
            | IrInst::Un { dst, .. }
            | IrInst::PtrAdd { dst, .. }
            | IrInst::Mov { dst, .. }
            | IrInst::Cast { dst, .. }
            | IrInst::Cond { dst, .. } => *dst = to,
            IrInst::Call { dst, .. } => *dst = Some(to),
            _ => {}
        }
    }
}

impl fmt::Display for IrInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrInst::Bofs { dst, slot } => write!(f, "  {} = bofs slot{}", dst, slot),
            IrInst::Iofs { dst, label, offset } => {
                write!(f, "  {} = iofs {}+{}", dst, label, offset)
            }
            IrInst::Sofs { dst, offset } => write!(f, "  {} = sofs {}", dst, offset),
            IrInst::Load { dst, addr } => write!(f, "  {} = load [{}]", dst, addr),
            IrInst::LoadS { dst, slot } => write!(f, "  {} = load_s slot{}", dst, slot),
            IrInst::Store { addr, src } => write!(f, "  store [{}] = {}", addr, src),
            IrInst::StoreS { slot, src } => write!(f, "  store_s slot{} = {}", slot, src),
            IrInst::Bin { op, dst, lhs, rhs } => {
                let name = match op {
                    IrBinOp::Add => "add",
                    IrBinOp::Sub => "sub",
                    IrBinOp::Mul => "mul",
                    IrBinOp::Div => "div",
                    IrBinOp::Mod => "mod",
                    IrBinOp::BitAnd => "band",
                    IrBinOp::BitOr => "bor",
                    IrBinOp::BitXor => "bxor",
                    IrBinOp::LShift => "shl",
                    IrBinOp::RShift => "shr",
                };
                write!(f, "  {} = {} {} {}", dst, name, lhs, rhs)
            }
            IrInst::Un { op, dst, src } => {
                let name = match op {
                    IrUnOp::Neg => "neg",
                    IrUnOp::BitNot => "bnot",
                };
                write!(f, "  {} = {} {}", dst, name, src)
            }
            IrInst::PtrAdd { dst, base, index, scale, offset } => {
                write!(f, "  {} = ptradd {}", dst, base)?;
                if let Some(index) = index {
                    write!(f, " + {}*{}", index, scale)?;
                }
                write!(f, " + {}", offset)
            }
            IrInst::Mov { dst, src } => write!(f, "  {} = mov {}", dst, src),
            IrInst::Cast { dst, src, src_size, .. } => {
                write!(f, "  {} = cast {} (from {} bytes)", dst, src, src_size)
            }
            IrInst::Cond { dst, cc, lhs, rhs } => {
                write!(f, "  {} = cond {} {} {}", dst, cc, lhs, rhs)
            }
            IrInst::Jmp { cc, lhs, rhs, bb } => {
                if cc.kind == CcKind::Any {
                    write!(f, "  jmp {}", bb)
                } else {
                    write!(
                        f,
                        "  jmp.{} {} {} {}",
                        cc,
                        lhs.map(|v| v.to_string()).unwrap_or_default(),
                        rhs.map(|v| v.to_string()).unwrap_or_default(),
                        bb
                    )
                }
            }
            IrInst::TJmp { value, table } => {
                write!(f, "  tjmp {} [", value)?;
                for (i, bb) in table.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", bb)?;
                }
                write!(f, "]")
            }
            IrInst::Precall { site } => write!(f, "  precall #{}", site),
            IrInst::Pusharg { src, index, flonum } => {
                write!(f, "  pusharg {} -> {}{}", src, if *flonum { "fa" } else { "a" }, index)
            }
            IrInst::Call { dst, target, .. } => {
                write!(f, "  ")?;
                if let Some(dst) = dst {
                    write!(f, "{} = ", dst)?;
                }
                match target {
                    CallTarget::Label(label) => write!(f, "call {}", label),
                    CallTarget::Reg(r) => write!(f, "call [{}]", r),
                }
            }
            IrInst::Result { src } => write!(f, "  result {}", src),
            IrInst::Subsp { value } => write!(f, "  subsp {}", value),
            IrInst::Asm { template } => write!(f, "  asm \"{}\"", template),
        }
    }
}

/// A basic block: label, straight-line instructions, and liveness sets
/// computed by the allocator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: String,
    pub irs: Vec<IrInst>,
    /// Successor blocks, filled by `FuncIr::compute_succs`.
    pub succs: SmallVec<[BBId; 2]>,
    pub in_regs: IndexSet<VRegId>,
    pub out_regs: IndexSet<VRegId>,
}

impl BasicBlock {
    pub fn new(label: String) -> Self {
        Self { label, ..Self::default() }
    }

    /// Control never falls out of the bottom of this block.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self.irs.last(),
            Some(IrInst::Jmp { cc: CondCode { kind: CcKind::Any, .. }, .. })
                | Some(IrInst::TJmp { .. })
        )
    }
}

/// A frame slot for a local, a spilled vreg or a stack-passed parameter.
/// Offsets are assigned by the backend during frame layout.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    pub size: usize,
    pub align: usize,
    pub offset: i64,
    /// Set for incoming stack parameters: byte offset above the frame
    /// pointer instead of a local slot.
    pub incoming_offset: Option<i64>,
}

/// One call site; the allocator records which caller-saved registers are
/// live across it.
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    pub stack_args_size: usize,
    /// `(physical index, is-flonum)` pairs to save around the call.
    pub caller_saved: Vec<(u8, bool)>,
}

#[derive(Debug, Clone)]
pub enum ParamStorage {
    /// Register parameter captured into a vreg.
    Reg(VRegId),
    /// Register parameter spilled to a frame slot (address taken).
    Frame(usize),
    /// Passed on the caller's stack; the slot carries the incoming offset.
    StackIncoming(usize),
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Index within its register class (integer or floating).
    pub reg_index: usize,
    pub flonum: bool,
    pub size: u8,
    pub storage: ParamStorage,
}

/// A floating-point literal promoted to rodata.
#[derive(Debug, Clone)]
pub struct FloatConst {
    pub label: String,
    pub bits: u64,
    pub size: u8,
}

/// The IR of one function.
#[derive(Debug, Clone)]
pub struct FuncIr {
    pub name: String,
    pub is_static: bool,
    pub bbs: Vec<BasicBlock>,
    /// Emission order; fallthrough goes to the next entry.
    pub order: Vec<BBId>,
    pub vregs: VRegPool,
    pub slots: Vec<FrameSlot>,
    pub params: Vec<ParamInfo>,
    pub call_sites: Vec<CallSite>,
    pub float_consts: Vec<FloatConst>,
    /// Return value class, `None` for void.
    pub ret_flonum: Option<bool>,
    /// Exit block holding the epilogue.
    pub exit_bb: BBId,
    /// Frame byte size, assigned by the backend.
    pub frame_size: i64,
}

impl FuncIr {
    pub fn block(&self, id: BBId) -> &BasicBlock {
        &self.bbs[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BBId) -> &mut BasicBlock {
        &mut self.bbs[id.0 as usize]
    }

    pub fn has_calls(&self) -> bool {
        !self.call_sites.is_empty()
    }

    /// Recompute successor links from terminators and fallthrough order.
    pub fn compute_succs(&mut self) {
        for idx in 0..self.order.len() {
            let id = self.order[idx];
            let fallthrough = self.order.get(idx + 1).copied();
            let mut succs: SmallVec<[BBId; 2]> = SmallVec::new();
            let mut falls = true;
            for ir in &self.bbs[id.0 as usize].irs {
                match ir {
                    IrInst::Jmp { cc, bb, .. } => {
                        if !succs.contains(bb) {
                            succs.push(*bb);
                        }
                        if cc.kind == CcKind::Any {
                            falls = false;
                        }
                    }
                    IrInst::TJmp { table, .. } => {
                        for bb in table {
                            if !succs.contains(bb) {
                                succs.push(*bb);
                            }
                        }
                        falls = false;
                    }
                    _ => {}
                }
            }
            if falls {
                if let Some(next) = fallthrough {
                    if !succs.contains(&next) {
                        succs.push(next);
                    }
                }
            }
            self.bbs[id.0 as usize].succs = succs;
        }
    }

    /// The exit block is live iff some path reaches the epilogue.
    pub fn exit_reachable(&self) -> bool {
        let exit = self.exit_bb;
        self.order.iter().enumerate().any(|(i, id)| {
            if *id == exit {
                // Reachable by fallthrough from a live predecessor.
                i == 0
                    || self
                        .order
                        .get(i - 1)
                        .map_or(false, |prev| !self.block(*prev).ends_flow())
            } else {
                self.block(*id).succs.contains(&exit)
            }
        })
    }
}

impl fmt::Display for FuncIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} {{", self.name)?;
        for id in &self.order {
            let bb = self.block(*id);
            writeln!(f, "{}:", bb.label)?;
            for ir in &bb.irs {
                writeln!(f, "{}", ir)?;
            }
        }
        write!(f, "}}")
    }
}
