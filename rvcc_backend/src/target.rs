//! The target abstraction.
//!
//! Register tables, calling conventions, immediate ranges and per-opcode
//! emitters live behind this trait, chosen at function-emission time, so
//! adding a target does not branch the core.

use rvcc_ir::{BuildConfig, FuncIr, RegAllocSettings};

use crate::asm::AsmStream;

pub trait TargetIsa {
    fn name(&self) -> &'static str;

    /// Lowering knobs for the IR builder.
    fn build_config(&self) -> BuildConfig;

    /// Register pools for the allocator.
    fn alloc_settings(&self) -> RegAllocSettings;

    /// Per-class masks of registers this function implicitly occupies
    /// (frame pointer, platform-reserved registers).
    fn extra_occupied(&self, func: &FuncIr) -> (u64, u64);

    /// Rewrite the IR in place for target constraints before allocation:
    /// materialize immediates the instruction forms cannot encode, turn
    /// subtraction from zero into negation, split floating branches.
    fn tweak(&self, func: &mut FuncIr);

    /// Emit one allocated function as assembly text.
    fn emit_function(&self, func: &mut FuncIr, asm: &mut AsmStream);
}
