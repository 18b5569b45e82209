//! Caller-saved register preservation around calls.
//!
//! Instruction selection brackets every call with `SaveCallerRegs` and
//! `RestoreCallerRegs(ty)` markers. This pass materializes them: each
//! caller-saved register is stored to its clobber slot before the save
//! marker and loaded back after the restore marker, except the register
//! carrying the call's return value.

use log::debug;

use kiln_lir::{BlockId, CompileError, CompilationUnit, Insn, MachDesc, Opcode};

use crate::spill_reload::apply_insertions;

pub fn insert_clobber_saves(
    cu: &mut CompilationUnit,
    desc: &MachDesc,
) -> Result<(), CompileError> {
    let mut markers: Vec<(BlockId, usize, Opcode)> = Vec::new();
    for (bi, block) in cu.blocks.iter().enumerate() {
        for (idx, insn) in block.insns.iter().enumerate() {
            match insn.op {
                Opcode::SaveCallerRegs | Opcode::RestoreCallerRegs(_) => {
                    markers.push((BlockId(bi as u32), idx, insn.op));
                }
                _ => {}
            }
        }
    }
    if markers.is_empty() {
        return Ok(());
    }

    let mut inserts: Vec<(BlockId, usize, Insn)> = Vec::new();
    for (bb, idx, op) in markers {
        match op {
            Opcode::SaveCallerRegs => {
                for &reg in &desc.caller_saved {
                    let slot = cu.frame.clobber_slot(reg, desc.reg_class(reg))?;
                    inserts.push((bb, idx, Insn::spill(reg, slot)));
                }
            }
            Opcode::RestoreCallerRegs(ty) => {
                for &reg in &desc.caller_saved {
                    if desc.is_return_reg(reg, ty) {
                        continue;
                    }
                    let slot = cu.frame.clobber_slot(reg, desc.reg_class(reg))?;
                    inserts.push((bb, idx + 1, Insn::reload(slot, reg)));
                }
            }
            _ => unreachable!(),
        }
    }
    debug!("clobber saves: {} insertions", inserts.len());
    apply_insertions(cu, inserts);
    Ok(())
}
