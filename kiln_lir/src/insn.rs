//! LIR instructions: opcodes, operands, and use/def classification.

use smallvec::SmallVec;

use crate::block::BlockId;
use crate::types::{MachReg, SlotId, VReg, VmType};

/// A register operand payload. Virtual before allocation, machine after
/// operand rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Virt(VReg),
    Mach(MachReg),
}

impl Reg {
    pub fn as_virt(self) -> Option<VReg> {
        match self {
            Reg::Virt(v) => Some(v),
            Reg::Mach(_) => None,
        }
    }

    pub fn as_mach(self) -> Option<MachReg> {
        match self {
            Reg::Mach(r) => Some(r),
            Reg::Virt(_) => None,
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Reg(Reg),
    Imm(i64),
    /// Memory at `base + disp`.
    MemBase { base: Reg, disp: i32 },
    /// Memory at `base + (index << shift)`.
    MemIndex { base: Reg, index: Reg, shift: u8 },
    /// A stack frame slot.
    MemLocal(SlotId),
    /// A branch target.
    Block(BlockId),
    /// An absolute call target address.
    Rel(u64),
}

impl Operand {
    /// Registers read when this operand is addressed (base/index registers)
    /// or used/defined as a plain register.
    pub fn each_reg(&self, f: &mut impl FnMut(Reg)) {
        match *self {
            Operand::Reg(r) => f(r),
            Operand::MemBase { base, .. } => f(base),
            Operand::MemIndex { base, index, .. } => {
                f(base);
                f(index);
            }
            Operand::None
            | Operand::Imm(_)
            | Operand::MemLocal(_)
            | Operand::Block(_)
            | Operand::Rel(_) => {}
        }
    }

    /// Mutable variant of [`each_reg`], for passes that rewrite register
    /// payloads in place (SSA renaming, variable table compaction).
    ///
    /// [`each_reg`]: Operand::each_reg
    pub fn each_reg_mut(&mut self, f: &mut impl FnMut(&mut Reg)) {
        match self {
            Operand::Reg(r) => f(r),
            Operand::MemBase { base, .. } => f(base),
            Operand::MemIndex { base, index, .. } => {
                f(base);
                f(index);
            }
            Operand::None
            | Operand::Imm(_)
            | Operand::MemLocal(_)
            | Operand::Block(_)
            | Operand::Rel(_) => {}
        }
    }
}

/// LIR opcodes.
///
/// Arithmetic is two-address: `dst := dst op src`. Branch targets live in
/// the `dst` operand; conditional branches test the flags left by the most
/// recent `Cmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    MovImmReg,
    MovRegReg,
    /// Load from a stack slot (also the reload instruction).
    MovLocalReg,
    /// Store to a stack slot (also the spill instruction).
    MovRegLocal,
    MovBaseReg,
    MovRegBase,
    MovIndexReg,
    MovRegIndex,
    /// Slot-to-slot copy, used only by data-flow resolution.
    CopySlot,
    Add,
    Sub,
    Mul,
    /// `dst := dst / src`; `dst` must be a variable pinned to the machine
    /// division register.
    Div,
    /// `src := -src`.
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Cmp,
    Br,
    BrEq,
    BrNe,
    BrLt,
    BrGe,
    /// `src` is the target; `dst` optionally names the pinned variable
    /// receiving the return value, so its fixed interval covers the call.
    Call,
    Push,
    Ret,
    /// SSA phi; sources are in `Insn::phi_srcs`, one per non-EH predecessor.
    Phi,
    /// Marker: spill all caller-saved registers before the following call.
    SaveCallerRegs,
    /// Marker: reload caller-saved registers after a call returning `ty`
    /// (`None` for void), skipping the return value register.
    RestoreCallerRegs(Option<VmType>),
    /// Trap unless `0 <= src < dst`.
    BoundsCheck,
}

/// Static use/def classification of an opcode's two operand slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsnFlags {
    pub use_src: bool,
    pub use_dst: bool,
    pub def_src: bool,
    pub def_dst: bool,
}

const fn flags(use_src: bool, use_dst: bool, def_src: bool, def_dst: bool) -> InsnFlags {
    InsnFlags {
        use_src,
        use_dst,
        def_src,
        def_dst,
    }
}

impl Opcode {
    /// Total use/def classification. Exhaustive by construction; adding an
    /// opcode without classifying it fails to compile.
    pub fn insn_flags(&self) -> InsnFlags {
        match self {
            Opcode::MovImmReg => flags(false, false, false, true),
            Opcode::MovRegReg => flags(true, false, false, true),
            Opcode::MovLocalReg => flags(true, false, false, true),
            Opcode::MovRegLocal => flags(true, false, false, false),
            Opcode::MovBaseReg => flags(true, false, false, true),
            Opcode::MovRegBase => flags(true, true, false, false),
            Opcode::MovIndexReg => flags(true, false, false, true),
            Opcode::MovRegIndex => flags(true, true, false, false),
            Opcode::CopySlot => flags(true, false, false, false),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Sar => flags(true, true, false, true),
            Opcode::Neg => flags(true, false, true, false),
            Opcode::Cmp => flags(true, true, false, false),
            // An unconditional branch may jump through memory; the target
            // operand's address registers are then read.
            Opcode::Br | Opcode::BrEq | Opcode::BrNe | Opcode::BrLt | Opcode::BrGe => {
                flags(false, true, false, false)
            }
            Opcode::Call => flags(true, false, false, true),
            Opcode::Push => flags(true, false, false, false),
            Opcode::Ret => flags(false, false, false, false),
            Opcode::Phi => flags(false, false, false, true),
            Opcode::SaveCallerRegs | Opcode::RestoreCallerRegs(_) => {
                flags(false, false, false, false)
            }
            Opcode::BoundsCheck => flags(true, true, false, false),
        }
    }
}

/// A single LIR instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    pub op: Opcode,
    pub src: Operand,
    pub dst: Operand,
    /// Phi sources, one per non-EH predecessor of the owning block.
    /// Empty for everything but `Opcode::Phi`.
    pub phi_srcs: Vec<Operand>,
    /// Bytecode offset this instruction was selected from.
    pub bc_offset: u32,
    /// Set on copies inserted by SSA deconstruction so later SSA passes do
    /// not reprocess them.
    pub ssa_added: bool,
}

impl Insn {
    pub fn new(op: Opcode, src: Operand, dst: Operand) -> Insn {
        Insn {
            op,
            src,
            dst,
            phi_srcs: Vec::new(),
            bc_offset: 0,
            ssa_added: false,
        }
    }

    pub fn mov_imm(value: i64, dst: Reg) -> Insn {
        Insn::new(Opcode::MovImmReg, Operand::Imm(value), Operand::Reg(dst))
    }

    pub fn mov_reg(src: Reg, dst: Reg) -> Insn {
        Insn::new(Opcode::MovRegReg, Operand::Reg(src), Operand::Reg(dst))
    }

    /// Reload: load a stack slot into a machine register.
    pub fn reload(slot: SlotId, dst: MachReg) -> Insn {
        Insn::new(
            Opcode::MovLocalReg,
            Operand::MemLocal(slot),
            Operand::Reg(Reg::Mach(dst)),
        )
    }

    /// Spill: store a machine register to a stack slot.
    pub fn spill(src: MachReg, slot: SlotId) -> Insn {
        Insn::new(
            Opcode::MovRegLocal,
            Operand::Reg(Reg::Mach(src)),
            Operand::MemLocal(slot),
        )
    }

    pub fn copy_slot(src: SlotId, dst: SlotId) -> Insn {
        Insn::new(
            Opcode::CopySlot,
            Operand::MemLocal(src),
            Operand::MemLocal(dst),
        )
    }

    pub fn jump(target: BlockId) -> Insn {
        Insn::new(Opcode::Br, Operand::None, Operand::Block(target))
    }

    pub fn ret() -> Insn {
        Insn::new(Opcode::Ret, Operand::None, Operand::None)
    }

    /// A phi defining `dst` with `nr_preds` sources, each initially naming
    /// `dst` itself (renaming patches them).
    pub fn phi(dst: VReg, nr_preds: usize) -> Insn {
        let mut insn = Insn::new(Opcode::Phi, Operand::None, Operand::Reg(Reg::Virt(dst)));
        insn.phi_srcs = vec![Operand::Reg(Reg::Virt(dst)); nr_preds];
        insn
    }

    pub fn with_bc_offset(mut self, bc_offset: u32) -> Insn {
        self.bc_offset = bc_offset;
        self
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.op,
            Opcode::Br | Opcode::BrEq | Opcode::BrNe | Opcode::BrLt | Opcode::BrGe
        )
    }

    /// Direct branch target, if this is a branch to a block.
    pub fn branch_target(&self) -> Option<BlockId> {
        if !self.is_branch() {
            return None;
        }
        match self.dst {
            Operand::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Branches and returns: control leaves the block here, so nothing may
    /// be inserted after one.
    pub fn is_terminator(&self) -> bool {
        self.is_branch() || self.op == Opcode::Ret
    }

    /// An unconditional jump through memory (e.g. a lowered table switch).
    /// Its target cannot be retargeted by edge splitting.
    pub fn is_jmp_mem(&self) -> bool {
        self.op == Opcode::Br
            && matches!(
                self.dst,
                Operand::MemBase { .. } | Operand::MemIndex { .. }
            )
    }

    /// Virtual registers this instruction reads.
    pub fn uses(&self) -> SmallVec<[VReg; 4]> {
        let mut out = SmallVec::new();
        let mut push = |r: Reg| {
            if let Reg::Virt(v) = r {
                out.push(v);
            }
        };
        if self.op == Opcode::Phi {
            for src in &self.phi_srcs {
                src.each_reg(&mut push);
            }
            return out;
        }
        let fl = self.op.insn_flags();
        if fl.use_src {
            self.src.each_reg(&mut push);
        }
        if fl.use_dst {
            self.dst.each_reg(&mut push);
        }
        // Address registers of a written memory operand are still reads.
        if fl.def_dst && !fl.use_dst {
            if let Operand::MemBase { .. } | Operand::MemIndex { .. } = self.dst {
                self.dst.each_reg(&mut push);
            }
        }
        out
    }

    /// Virtual registers this instruction writes. Only a plain register
    /// operand is a definition; a written memory operand defines nothing.
    pub fn defs(&self) -> SmallVec<[VReg; 2]> {
        let mut out = SmallVec::new();
        let fl = self.op.insn_flags();
        if fl.def_src {
            if let Operand::Reg(Reg::Virt(v)) = self.src {
                out.push(v);
            }
        }
        if fl.def_dst {
            if let Operand::Reg(Reg::Virt(v)) = self.dst {
                out.push(v);
            }
        }
        out
    }
}
