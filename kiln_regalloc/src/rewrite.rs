//! Operand rewriting: replace every virtual register operand with the
//! machine register of the interval child covering its position.
//!
//! Inputs are looked up at the instruction position, outputs one past it;
//! a read-modify-write operand belongs to the child covering the read.

use kiln_lir::{CompileError, CompilationUnit, Opcode, Operand, Reg, VReg};

use crate::interval::Intervals;

pub fn rewrite_operands(
    cu: &mut CompilationUnit,
    intervals: &Intervals,
) -> Result<(), CompileError> {
    for block in &mut cu.blocks {
        let mut pos = block.start_insn;
        for insn in &mut block.insns {
            if insn.op == Opcode::Phi {
                return Err(CompileError::MalformedCfg(
                    "phi instruction reached register allocation",
                ));
            }
            let fl = insn.op.insn_flags();
            rewrite_operand(&mut insn.src, fl.use_src, pos, intervals)?;
            rewrite_operand(&mut insn.dst, fl.use_dst || !fl.def_dst, pos, intervals)?;
            pos += 2;
        }
    }
    Ok(())
}

/// `is_read` selects the lookup position: reads (and read-modify-writes)
/// resolve at the instruction position, pure writes one past it. Address
/// registers inside memory operands are always reads.
fn rewrite_operand(
    operand: &mut Operand,
    is_read: bool,
    pos: u32,
    intervals: &Intervals,
) -> Result<(), CompileError> {
    match operand {
        Operand::Reg(r) => {
            let lookup = if is_read { pos } else { pos + 1 };
            map_reg(r, lookup, intervals)
        }
        Operand::MemBase { base, .. } => map_reg(base, pos, intervals),
        Operand::MemIndex { base, index, .. } => {
            map_reg(base, pos, intervals)?;
            map_reg(index, pos, intervals)
        }
        Operand::None
        | Operand::Imm(_)
        | Operand::MemLocal(_)
        | Operand::Block(_)
        | Operand::Rel(_) => Ok(()),
    }
}

fn map_reg(r: &mut Reg, pos: u32, intervals: &Intervals) -> Result<(), CompileError> {
    let Reg::Virt(v) = *r else {
        return Ok(());
    };
    *r = Reg::Mach(assigned_reg(v, pos, intervals)?);
    Ok(())
}

fn assigned_reg(
    v: VReg,
    pos: u32,
    intervals: &Intervals,
) -> Result<kiln_lir::MachReg, CompileError> {
    let Some(child) = intervals.child_covering(v, pos) else {
        return Err(CompileError::MalformedInterval(
            "operand position outside its variable's intervals",
        ));
    };
    intervals[child].reg.ok_or(CompileError::MalformedInterval(
        "operand covered by an interval without a register",
    ))
}
