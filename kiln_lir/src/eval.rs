//! A small LIR interpreter.
//!
//! Executes a compilation unit directly (virtual or machine registers,
//! stack slots, resolution blocks, phis) so tests can compare program
//! behavior before and after a transformation without emitting machine
//! code. Not part of the compilation pipeline.

use std::collections::HashMap;

use crate::block::BlockId;
use crate::cu::CompilationUnit;
use crate::insn::{Opcode, Operand, Reg};
use crate::types::MachDesc;

/// Value written into caller-saved registers at calls when a machine
/// description is supplied, so surviving values must really go through
/// their clobber slots.
pub const CLOBBER_PATTERN: i64 = 0x5EAD_5EAD_5EAD_5EAD_u64 as i64;

const STEP_LIMIT: usize = 1_000_000;

/// Run `cu` from its entry block to the first `ret`. Returns the final
/// stack slot contents; tests read results out of local slots.
///
/// With `desc` supplied, every `call` overwrites the caller-saved registers
/// with [`CLOBBER_PATTERN`].
pub fn run(cu: &CompilationUnit, desc: Option<&MachDesc>) -> Result<Vec<i64>, String> {
    let mut regs: HashMap<Reg, i64> = HashMap::new();
    let mut slots = vec![0i64; cu.frame.nr_slots() as usize];
    let mut cmp: (i64, i64) = (0, 0);
    let mut pushed: Vec<i64> = Vec::new();
    let mut cur = cu.entry;
    let mut prev: Option<BlockId> = None;
    let mut steps = 0usize;

    'blocks: loop {
        let block = cu.block(cur);
        let mut idx = 0;

        // Phis read their sources in parallel before any other
        // instruction in the block executes.
        if block.insns.first().is_some_and(|i| i.op == Opcode::Phi) {
            let from = prev.ok_or("phi in entry block")?;
            let pred_pos = block
                .preds
                .iter()
                .filter(|&&p| !cu.bb_is_eh(p))
                .position(|&p| p == from)
                .ok_or("phi predecessor not found")?;
            let mut writes = Vec::new();
            while idx < block.insns.len() && block.insns[idx].op == Opcode::Phi {
                let insn = &block.insns[idx];
                let src = insn
                    .phi_srcs
                    .get(pred_pos)
                    .ok_or("phi source count mismatch")?;
                writes.push((insn.dst, read(src, &regs, &slots)?));
                idx += 1;
            }
            for (dst, val) in writes {
                write(&dst, val, &mut regs, &mut slots)?;
            }
        }

        while idx < block.insns.len() {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err("step limit exceeded".into());
            }
            let insn = &block.insns[idx];
            idx += 1;
            match insn.op {
                Opcode::MovImmReg
                | Opcode::MovRegReg
                | Opcode::MovLocalReg
                | Opcode::MovRegLocal
                | Opcode::MovBaseReg
                | Opcode::MovRegBase
                | Opcode::MovIndexReg
                | Opcode::MovRegIndex
                | Opcode::CopySlot => {
                    let val = read(&insn.src, &regs, &slots)?;
                    write(&insn.dst, val, &mut regs, &mut slots)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div
                | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl
                | Opcode::Sar => {
                    let a = read(&insn.dst, &regs, &slots)?;
                    let b = read(&insn.src, &regs, &slots)?;
                    let val = match insn.op {
                        Opcode::Add => a.wrapping_add(b),
                        Opcode::Sub => a.wrapping_sub(b),
                        Opcode::Mul => a.wrapping_mul(b),
                        Opcode::Div => {
                            if b == 0 {
                                return Err("division by zero".into());
                            }
                            a.wrapping_div(b)
                        }
                        Opcode::And => a & b,
                        Opcode::Or => a | b,
                        Opcode::Xor => a ^ b,
                        Opcode::Shl => a.wrapping_shl(b as u32),
                        Opcode::Sar => a.wrapping_shr(b as u32),
                        _ => unreachable!(),
                    };
                    write(&insn.dst, val, &mut regs, &mut slots)?;
                }
                Opcode::Neg => {
                    let val = read(&insn.src, &regs, &slots)?;
                    write(&insn.src, val.wrapping_neg(), &mut regs, &mut slots)?;
                }
                Opcode::Cmp => {
                    cmp = (
                        read(&insn.dst, &regs, &slots)?,
                        read(&insn.src, &regs, &slots)?,
                    );
                }
                Opcode::Br | Opcode::BrEq | Opcode::BrNe | Opcode::BrLt
                | Opcode::BrGe => {
                    let target = insn
                        .branch_target()
                        .ok_or("jump through memory is not interpretable")?;
                    let taken = match insn.op {
                        Opcode::Br => true,
                        Opcode::BrEq => cmp.0 == cmp.1,
                        Opcode::BrNe => cmp.0 != cmp.1,
                        Opcode::BrLt => cmp.0 < cmp.1,
                        Opcode::BrGe => cmp.0 >= cmp.1,
                        _ => unreachable!(),
                    };
                    let edge = if taken {
                        block.succ_index(target).ok_or("branch target not a successor")?
                    } else {
                        block
                            .succs
                            .iter()
                            .position(|&s| s != target)
                            .ok_or("no fallthrough successor")?
                    };
                    let next = block.succs[edge];
                    exec_resolution(cu, cur, edge, &mut regs, &mut slots)?;
                    prev = Some(cur);
                    cur = next;
                    continue 'blocks;
                }
                Opcode::Call => {
                    if let Some(desc) = desc {
                        for &r in &desc.caller_saved {
                            regs.insert(Reg::Mach(r), CLOBBER_PATTERN);
                        }
                    }
                    pushed.clear();
                }
                Opcode::Push => {
                    let val = read(&insn.src, &regs, &slots)?;
                    pushed.push(val);
                }
                Opcode::Ret => return Ok(slots),
                Opcode::Phi => return Err("phi after non-phi instruction".into()),
                Opcode::SaveCallerRegs | Opcode::RestoreCallerRegs(_) => {}
                Opcode::BoundsCheck => {
                    let index = read(&insn.src, &regs, &slots)?;
                    let bound = read(&insn.dst, &regs, &slots)?;
                    if index < 0 || index >= bound {
                        return Err(format!("bounds check failed: {index} not in 0..{bound}"));
                    }
                }
            }
        }

        // Fell off the end of the block.
        if block.succs.len() != 1 {
            return Err(format!("block {cur} has no terminator"));
        }
        exec_resolution(cu, cur, 0, &mut regs, &mut slots)?;
        prev = Some(cur);
        cur = block.succs[0];
    }
}

fn exec_resolution(
    cu: &CompilationUnit,
    bb: BlockId,
    edge: usize,
    regs: &mut HashMap<Reg, i64>,
    slots: &mut Vec<i64>,
) -> Result<(), String> {
    let block = cu.block(bb);
    for insn in &block.resolution[edge].insns {
        let val = read(&insn.src, regs, slots)?;
        write(&insn.dst, val, regs, slots)?;
    }
    Ok(())
}

fn read(op: &Operand, regs: &HashMap<Reg, i64>, slots: &[i64]) -> Result<i64, String> {
    match *op {
        Operand::Reg(r) => Ok(regs.get(&r).copied().unwrap_or(0)),
        Operand::Imm(v) => Ok(v),
        Operand::MemLocal(slot) => slots
            .get(slot.0 as usize)
            .copied()
            .ok_or_else(|| format!("slot {} out of frame", slot.0)),
        Operand::MemBase { .. } | Operand::MemIndex { .. } => {
            Err("memory operand is not interpretable".into())
        }
        Operand::None | Operand::Block(_) | Operand::Rel(_) => {
            Err(format!("read of non-value operand {op}"))
        }
    }
}

fn write(
    op: &Operand,
    val: i64,
    regs: &mut HashMap<Reg, i64>,
    slots: &mut [i64],
) -> Result<(), String> {
    match *op {
        Operand::Reg(r) => {
            regs.insert(r, val);
            Ok(())
        }
        Operand::MemLocal(slot) => {
            let cell = slots
                .get_mut(slot.0 as usize)
                .ok_or_else(|| format!("slot {} out of frame", slot.0))?;
            *cell = val;
            Ok(())
        }
        _ => Err(format!("write to non-value operand {op}")),
    }
}
