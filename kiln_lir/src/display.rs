//! Human-readable LIR dumps.

use std::fmt;

use crate::cu::CompilationUnit;
use crate::insn::{Insn, Opcode, Operand, Reg};

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Virt(v) => write!(f, "{v}"),
            Reg::Mach(r) => write!(f, "{r}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => write!(f, "_"),
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(v) => write!(f, "${v}"),
            Operand::MemBase { base, disp } => write!(f, "{disp}({base})"),
            Operand::MemIndex { base, index, shift } => {
                write!(f, "({base}, {index}, {})", 1u32 << shift)
            }
            Operand::MemLocal(slot) => write!(f, "{slot}"),
            Operand::Block(b) => write!(f, "{b}"),
            Operand::Rel(addr) => write!(f, "@{addr:#x}"),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::MovImmReg | Opcode::MovRegReg | Opcode::MovLocalReg
            | Opcode::MovRegLocal | Opcode::MovBaseReg | Opcode::MovRegBase
            | Opcode::MovIndexReg | Opcode::MovRegIndex => "mov",
            Opcode::CopySlot => "copyslot",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Neg => "neg",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Sar => "sar",
            Opcode::Cmp => "cmp",
            Opcode::Br => "jmp",
            Opcode::BrEq => "je",
            Opcode::BrNe => "jne",
            Opcode::BrLt => "jl",
            Opcode::BrGe => "jge",
            Opcode::Call => "call",
            Opcode::Push => "push",
            Opcode::Ret => "ret",
            Opcode::Phi => "phi",
            Opcode::SaveCallerRegs => "save_caller_regs",
            Opcode::RestoreCallerRegs(_) => "restore_caller_regs",
            Opcode::BoundsCheck => "boundscheck",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == Opcode::Phi {
            write!(f, "phi {} <-", self.dst)?;
            for src in &self.phi_srcs {
                write!(f, " {src}")?;
            }
            return Ok(());
        }
        match (&self.src, &self.dst) {
            (Operand::None, Operand::None) => write!(f, "{}", self.op),
            (Operand::None, dst) => write!(f, "{} {dst}", self.op),
            (src, Operand::None) => write!(f, "{} {src}", self.op),
            (src, dst) => write!(f, "{} {src}, {dst}", self.op),
        }
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            write!(f, "bb{i}:")?;
            if block.is_eh {
                write!(f, " (eh)")?;
            }
            write!(f, " preds [")?;
            for (k, p) in block.preds.iter().enumerate() {
                if k > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{p}")?;
            }
            writeln!(f, "]")?;
            for insn in &block.insns {
                writeln!(f, "    {insn}")?;
            }
            for (k, res) in block.resolution.iter().enumerate() {
                if res.insns.is_empty() {
                    continue;
                }
                writeln!(f, "  resolution -> {}:", block.succs[k])?;
                for insn in &res.insns {
                    writeln!(f, "    {insn}")?;
                }
            }
        }
        Ok(())
    }
}
