//! Target lowering for the rvcc compiler.
//!
//! The IR is rewritten in place for target constraints ("tweak"), run
//! through the register allocator, and then emitted as assembly text, one
//! handler per IR opcode. Global data is encoded separately into the
//! .rodata/.data/.bss sections.

pub mod asm;
pub mod dataemit;
pub mod riscv64;
pub mod target;

pub use asm::{AsmStream, Section};
pub use dataemit::emit_global_data;
pub use riscv64::Riscv64;
pub use target::TargetIsa;
