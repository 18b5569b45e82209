//! Low-level IR for the kiln JIT back end.
//!
//! The LIR is machine-shaped but register-abstract: instructions carry
//! tagged operands whose register payloads are virtual before register
//! allocation and physical after it. A [`CompilationUnit`] owns the basic
//! block arena, the variable table, the stack frame, and the LIR position
//! map; blocks reference each other by [`BlockId`] index only.

pub mod bitset;
pub mod block;
pub mod cu;
pub mod display;
pub mod error;
pub mod eval;
pub mod frame;
pub mod insn;
pub mod types;

pub use bitset::BitSet;
pub use block::{BasicBlock, BlockId, ResolutionBlock};
pub use cu::CompilationUnit;
pub use error::CompileError;
pub use frame::{StackFrame, MAX_SPILL_SLOTS};
pub use insn::{Insn, InsnFlags, Opcode, Operand, Reg};
pub use types::{MachDesc, MachReg, RegClass, SlotId, VReg, VarInfo, VmType};
