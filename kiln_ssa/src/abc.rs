//! Array bounds check elimination: drop checks whose index and bound are
//! both compile-time constants in range. Most effective right after copy
//! propagation, when index operands reach back to their defining loads.

use log::debug;

use kiln_lir::{BlockId, CompilationUnit, Opcode, Operand, Reg};

use crate::ssa::{self, AddOns};

pub fn remove_bounds_checks(cu: &mut CompilationUnit, add_ons: &mut AddOns) {
    // Single assignment makes the constant map global.
    let mut consts: Vec<Option<i64>> = vec![None; cu.nr_vars()];
    for bi in 0..cu.blocks.len() {
        if cu.bb_is_eh(BlockId(bi as u32)) {
            continue;
        }
        for insn in &cu.blocks[bi].insns {
            if insn.op != Opcode::MovImmReg {
                continue;
            }
            if let (Operand::Imm(val), Operand::Reg(Reg::Virt(d))) = (insn.src, insn.dst) {
                if !cu.var(d).is_fixed() {
                    consts[d.index()] = Some(val);
                }
            }
        }
    }
    let value = |op: Operand| -> Option<i64> {
        match op {
            Operand::Imm(v) => Some(v),
            Operand::Reg(Reg::Virt(v)) => consts[v.index()],
            _ => None,
        }
    };
    let mut dead: Vec<Vec<bool>> = cu
        .blocks
        .iter()
        .map(|b| vec![false; b.insns.len()])
        .collect();
    let mut removed = 0usize;
    for bi in 0..cu.blocks.len() {
        if cu.bb_is_eh(BlockId(bi as u32)) {
            continue;
        }
        for (idx, insn) in cu.blocks[bi].insns.iter().enumerate() {
            if insn.op != Opcode::BoundsCheck {
                continue;
            }
            let (Some(index), Some(bound)) = (value(insn.src), value(insn.dst)) else {
                continue;
            };
            if 0 <= index && index < bound {
                dead[bi][idx] = true;
                removed += 1;
            }
        }
    }
    if removed == 0 {
        return;
    }
    ssa::sweep_dead(cu, add_ons, &dead);
    debug!("bounds check removal dropped {removed} checks");
}
