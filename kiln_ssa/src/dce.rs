//! Dead code elimination on SSA form: delete definitions whose value is
//! never read, cascading through the operands the deleted instruction used.

use log::debug;

use kiln_lir::{CompilationUnit, VReg};

use crate::ssa::{self, AddOns};

/// Instructions with side effects never qualify: stores and bounds checks
/// define nothing, and calls and divisions define pinned variables, which
/// are exempt.
pub fn eliminate_dead_code(cu: &mut CompilationUnit, add_ons: &mut AddOns) {
    let nr_vars = cu.nr_vars();
    let mut use_count = vec![0u32; nr_vars];
    let mut def_site: Vec<Option<(usize, usize)>> = vec![None; nr_vars];
    for bi in 0..cu.blocks.len() {
        for (idx, insn) in cu.blocks[bi].insns.iter().enumerate() {
            ssa::each_use(insn, &mut |v| use_count[v.index()] += 1);
            if let Some(a) = add_ons[bi][idx] {
                use_count[a.index()] += 1;
            }
            for v in insn.defs() {
                def_site[v.index()] = Some((bi, idx));
            }
        }
    }

    let mut dead: Vec<Vec<bool>> = cu
        .blocks
        .iter()
        .map(|b| vec![false; b.insns.len()])
        .collect();
    let mut worklist: Vec<VReg> = (0..nr_vars as u32).map(VReg).collect();
    let mut removed = 0usize;
    while let Some(v) = worklist.pop() {
        if use_count[v.index()] != 0 || cu.var(v).is_fixed() {
            continue;
        }
        let Some((bi, idx)) = def_site[v.index()].take() else {
            continue;
        };
        if dead[bi][idx] {
            continue;
        }
        dead[bi][idx] = true;
        removed += 1;
        let insn = &cu.blocks[bi].insns[idx];
        ssa::each_use(insn, &mut |u| {
            use_count[u.index()] -= 1;
            if use_count[u.index()] == 0 {
                worklist.push(u);
            }
        });
        if let Some(a) = add_ons[bi][idx] {
            use_count[a.index()] -= 1;
            if use_count[a.index()] == 0 {
                worklist.push(a);
            }
        }
    }
    if removed == 0 {
        return;
    }
    ssa::sweep_dead(cu, add_ons, &dead);
    debug!("dce removed {removed} instructions");
}
