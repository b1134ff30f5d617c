//! Machine-independent three-address IR for the rvcc compiler.
//!
//! Expressions lower to instructions over virtual registers inside a graph
//! of basic blocks; the register allocator then binds virtual registers to
//! physical ones (or spill slots) for the target emitter to read.

pub mod builder;
pub mod inst;
pub mod regalloc;
pub mod vreg;

pub use builder::{BuildConfig, IrBuilder};
pub use inst::{
    BBId, BasicBlock, CallSite, CallTarget, CcKind, CondCode, FloatConst, FrameSlot, FuncIr,
    IrBinOp, IrInst, IrUnOp, ParamInfo, ParamStorage,
};
pub use regalloc::{alloc_registers, RegAllocSettings, RegClassSettings};
pub use vreg::{VReg, VRegFlags, VRegId, VRegPool};
