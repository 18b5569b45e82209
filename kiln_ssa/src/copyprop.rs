//! Copy propagation on SSA form: forward each plain register copy's source
//! through its uses so the copy itself falls to dead code elimination.

use log::debug;

use kiln_lir::{BlockId, CompilationUnit, Opcode, Operand, Reg, VReg};

use crate::ssa::{self, AddOns};

/// Rewrite every use reached by a chain of `mov reg, reg` copies to the
/// chain's root. Pinned variables are exempt on either side: their names
/// carry calling-convention meaning. Phi destinations are definitions and
/// are never rewritten; phi sources are.
pub fn propagate_copies(cu: &mut CompilationUnit, add_ons: &mut AddOns) {
    let mut copy_src: Vec<Option<VReg>> = vec![None; cu.nr_vars()];
    for bi in 0..cu.blocks.len() {
        // Handler blocks are not in SSA form; a name may have several
        // definitions there.
        if cu.bb_is_eh(BlockId(bi as u32)) {
            continue;
        }
        for insn in &cu.blocks[bi].insns {
            if insn.op != Opcode::MovRegReg {
                continue;
            }
            let (Operand::Reg(Reg::Virt(s)), Operand::Reg(Reg::Virt(d))) = (insn.src, insn.dst)
            else {
                continue;
            };
            if cu.var(s).is_fixed() || cu.var(d).is_fixed() {
                continue;
            }
            copy_src[d.index()] = Some(s);
        }
    }
    if copy_src.iter().all(|c| c.is_none()) {
        return;
    }
    let root = |mut v: VReg| {
        while let Some(s) = copy_src[v.index()] {
            v = s;
        }
        v
    };
    let mut rewritten = 0usize;
    for bi in 0..cu.blocks.len() {
        if cu.bb_is_eh(BlockId(bi as u32)) {
            continue;
        }
        for idx in 0..cu.blocks[bi].insns.len() {
            ssa::rewrite_uses(&mut cu.blocks[bi].insns[idx], &mut |r: &mut Reg| {
                if let Reg::Virt(v) = *r {
                    let n = root(v);
                    if n != v {
                        *r = Reg::Virt(n);
                        rewritten += 1;
                    }
                }
            });
            if let Some(a) = add_ons[bi][idx] {
                add_ons[bi][idx] = Some(root(a));
            }
        }
    }
    debug!("copy propagation rewrote {rewritten} uses");
}
