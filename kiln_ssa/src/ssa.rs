//! SSA construction and deconstruction.
//!
//! Construction zero-initializes every variable at entry, places pruned
//! phis on dominance frontiers, and renames over the dominator tree with
//! one name stack per original variable. Two-address instructions read and
//! write the same operand; the read half keeps its name in a side table
//! ([`AddOns`]) and is materialized as a copy right before deconstruction.
//! Pinned variables keep their identity throughout: defining one renames it
//! to itself, so phis and copies over pinned variables collapse to no-ops.
//!
//! Exception handler blocks sit outside the DFS-reachable flow and are
//! renamed separately without versioning: every occurrence of a variable in
//! handler code shares one lazily created name.

use log::{debug, trace};
use smallvec::SmallVec;

use kiln_lir::{
    BitSet, BlockId, CompilationUnit, CompileError, Insn, Opcode, Operand, Reg, VReg,
};

/// Renamed read half of two-address instructions, indexed by block then
/// instruction. Kept parallel to the instruction lists from renaming until
/// the copy insertion pass consumes it.
pub type AddOns = Vec<Vec<Option<VReg>>>;

/// Per-block predecessor bookkeeping used by phi placement and renaming:
/// the non-EH predecessor count (one phi source each) and, for every
/// successor edge, this block's index among that successor's non-EH
/// predecessors.
pub fn init_ssa(cu: &mut CompilationUnit) {
    for bi in 0..cu.blocks.len() {
        let bb = BlockId(bi as u32);
        let n = cu.blocks[bi]
            .preds
            .iter()
            .filter(|&&p| !cu.bb_is_eh(p))
            .count() as u32;
        let mut positions = Vec::with_capacity(cu.blocks[bi].succs.len());
        for k in 0..cu.blocks[bi].succs.len() {
            let succ = cu.blocks[bi].succs[k];
            let mut pos = 0u32;
            for &p in &cu.blocks[succ.index()].preds {
                if cu.bb_is_eh(p) {
                    continue;
                }
                if p == bb {
                    break;
                }
                pos += 1;
            }
            positions.push(pos);
        }
        cu.blocks[bi].nr_preds_no_eh = n;
        cu.blocks[bi].positions_as_predecessor = positions;
    }
}

/// Build SSA form: entry initializers, pruned phi placement, renaming over
/// the dominator tree, then the separate handler-block renaming. Requires
/// liveness, dominance and [`init_ssa`]. Returns the read-half side table
/// for [`ssa_to_lir`].
pub fn lir_to_ssa(cu: &mut CompilationUnit) -> Result<AddOns, CompileError> {
    let nr_orig = cu.nr_vars();
    insert_init_insns(cu);
    analyze_defs(cu);
    insert_phi_insns(cu);
    let mut add_ons: AddOns = cu
        .blocks
        .iter()
        .map(|b| vec![None; b.insns.len()])
        .collect();
    let mut names: Vec<Vec<VReg>> = vec![Vec::new(); nr_orig];
    rename_variables(cu, &mut names, &mut add_ons)?;
    rename_eh_blocks(cu, &mut names);
    debug!("ssa renaming grew the variable table to {}", cu.nr_vars());
    Ok(add_ons)
}

/// Define every variable at the top of the entry block so a name exists on
/// all paths into renaming. Initializers whose version is never read fall
/// to dead code elimination.
fn insert_init_insns(cu: &mut CompilationUnit) {
    let mut inits: Vec<Insn> = Vec::new();
    for (i, info) in cu.vars.iter().enumerate() {
        if info.is_fixed() {
            continue;
        }
        inits.push(Insn::mov_imm(0, Reg::Virt(VReg(i as u32))));
    }
    if inits.is_empty() {
        return;
    }
    let entry = cu.entry.index();
    let old = std::mem::take(&mut cu.blocks[entry].insns);
    inits.extend(old);
    cu.blocks[entry].insns = inits;
}

/// Recompute each block's `def_set` after the entry initializers went in.
fn analyze_defs(cu: &mut CompilationUnit) {
    let nr_vars = cu.nr_vars();
    for block in &mut cu.blocks {
        block.def_set = BitSet::new(nr_vars);
        for i in 0..block.insns.len() {
            for v in block.insns[i].defs() {
                block.def_set.set(v.index());
            }
        }
    }
}

/// Place phis on the iterated dominance frontier of each variable's
/// definition blocks, pruned to joins where the variable is live on entry.
/// The `inserted`/`work` markers carry the variable id so they never need
/// clearing between variables.
fn insert_phi_insns(cu: &mut CompilationUnit) {
    let nr_blocks = cu.nr_blocks();
    let nr_vars = cu.nr_vars() as u32;
    const NONE: u32 = u32::MAX;
    let mut inserted = vec![NONE; nr_blocks];
    let mut work = vec![NONE; nr_blocks];
    let mut workset = BitSet::new(nr_blocks);
    for v in 0..nr_vars {
        workset.clear_all();
        for bi in 0..cu.blocks.len() {
            if cu.bb_is_eh(BlockId(bi as u32)) {
                continue;
            }
            if cu.blocks[bi].def_set.get(v as usize) {
                let dfn = cu.blocks[bi].dfn as usize;
                workset.set(dfn);
                work[dfn] = v;
            }
        }
        loop {
            let Some(ndx) = workset.iter_ones().next() else {
                break;
            };
            workset.clear(ndx);
            let bb = cu.dfs_order[ndx];
            let frontier: Vec<usize> = cu.blocks[bb.index()].dom_frontier.iter_ones().collect();
            for d in frontier {
                if inserted[d] == v {
                    continue;
                }
                inserted[d] = v;
                let target = cu.dfs_order[d];
                if !cu.blocks[target.index()].live_in.get(v as usize) {
                    continue; // dead on entry: pruned
                }
                let nr_preds = cu.blocks[target.index()].nr_preds_no_eh as usize;
                cu.blocks[target.index()]
                    .insns
                    .insert(0, Insn::phi(VReg(v), nr_preds));
                trace!("phi for v{v} in {target}");
                if work[d] != v {
                    work[d] = v;
                    workset.set(d);
                }
            }
        }
    }
}

struct Frame {
    bb: BlockId,
    child: usize,
    /// Stacks this scope pushed, one entry per push.
    changed: Vec<u32>,
}

/// Rename over the dominator tree with an explicit frame stack; each
/// frame's pushes pop when its scope exits.
fn rename_variables(
    cu: &mut CompilationUnit,
    names: &mut [Vec<VReg>],
    add_ons: &mut AddOns,
) -> Result<(), CompileError> {
    let entry = cu.entry;
    let changed = rename_block(cu, entry, names, add_ons)?;
    let mut stack = vec![Frame {
        bb: entry,
        child: 0,
        changed,
    }];
    while !stack.is_empty() {
        let top = stack.len() - 1;
        let bb = stack[top].bb;
        let child = stack[top].child;
        if child < cu.blocks[bb.index()].dom_successors.len() {
            stack[top].child += 1;
            let c = cu.blocks[bb.index()].dom_successors[child];
            let changed = rename_block(cu, c, names, add_ons)?;
            stack.push(Frame {
                bb: c,
                child: 0,
                changed,
            });
        } else if let Some(frame) = stack.pop() {
            for v in frame.changed {
                names[v as usize].pop();
            }
        }
    }
    Ok(())
}

fn rename_block(
    cu: &mut CompilationUnit,
    bb: BlockId,
    names: &mut [Vec<VReg>],
    add_ons: &mut AddOns,
) -> Result<Vec<u32>, CompileError> {
    let mut changed: Vec<u32> = Vec::new();
    if bb == cu.entry {
        // Pinned variables are their own name on every path.
        for i in 0..names.len() {
            if cu.vars[i].is_fixed() {
                names[i].push(VReg(i as u32));
                changed.push(i as u32);
            }
        }
    }
    for idx in 0..cu.blocks[bb.index()].insns.len() {
        rename_insn(cu, bb, idx, names, &mut changed, add_ons)?;
    }
    // Patch this block's slot in each successor's phis. A slot holding a
    // renamed (fresh) variable was already patched through another edge.
    let succs: Vec<(BlockId, usize)> = {
        let b = &cu.blocks[bb.index()];
        b.succs
            .iter()
            .zip(&b.positions_as_predecessor)
            .map(|(&s, &p)| (s, p as usize))
            .collect()
    };
    for (succ, pos) in succs {
        for idx in 0..cu.blocks[succ.index()].insns.len() {
            if cu.blocks[succ.index()].insns[idx].op != Opcode::Phi {
                break;
            }
            let slot = cu.blocks[succ.index()].insns[idx].phi_srcs[pos];
            if let Operand::Reg(Reg::Virt(v)) = slot {
                if v.index() < names.len() {
                    let n = top_name(names, v)?;
                    cu.blocks[succ.index()].insns[idx].phi_srcs[pos] =
                        Operand::Reg(Reg::Virt(n));
                }
            }
        }
    }
    Ok(changed)
}

fn top_name(names: &[Vec<VReg>], v: VReg) -> Result<VReg, CompileError> {
    names[v.index()]
        .last()
        .copied()
        .ok_or(CompileError::UninitializedVar(v.0))
}

fn rename_insn(
    cu: &mut CompilationUnit,
    bb: BlockId,
    idx: usize,
    names: &mut [Vec<VReg>],
    changed: &mut Vec<u32>,
    add_ons: &mut AddOns,
) -> Result<(), CompileError> {
    let (op, fl, rmw_src, rmw_dst) = {
        let insn = &cu.blocks[bb.index()].insns[idx];
        let fl = insn.op.insn_flags();
        (
            insn.op,
            fl,
            fl.use_src && fl.def_src && matches!(insn.src, Operand::Reg(_)),
            fl.use_dst && fl.def_dst && matches!(insn.dst, Operand::Reg(_)),
        )
    };

    // Phi sources are patched from the predecessors, never here.
    if op != Opcode::Phi {
        let mut missing: Option<VReg> = None;
        {
            let insn = &mut cu.blocks[bb.index()].insns[idx];
            let mut rename = |r: &mut Reg| {
                if let Reg::Virt(v) = *r {
                    match names[v.index()].last() {
                        Some(&n) => *r = Reg::Virt(n),
                        None => missing = Some(v),
                    }
                }
            };
            if fl.use_src && !rmw_src {
                insn.src.each_reg_mut(&mut rename);
            }
            if fl.use_dst && !rmw_dst {
                insn.dst.each_reg_mut(&mut rename);
            }
            // Address registers of a written memory operand are reads.
            if fl.def_dst && !fl.use_dst {
                if let Operand::MemBase { .. } | Operand::MemIndex { .. } = insn.dst {
                    insn.dst.each_reg_mut(&mut rename);
                }
            }
        }
        if let Some(v) = missing {
            return Err(CompileError::UninitializedVar(v.0));
        }
        // The read half of a two-address operand keeps its name aside; the
        // operand itself will carry the definition.
        if rmw_dst {
            if let Operand::Reg(Reg::Virt(v)) = cu.blocks[bb.index()].insns[idx].dst {
                add_ons[bb.index()][idx] = Some(top_name(names, v)?);
            }
        }
        if rmw_src {
            if let Operand::Reg(Reg::Virt(v)) = cu.blocks[bb.index()].insns[idx].src {
                add_ons[bb.index()][idx] = Some(top_name(names, v)?);
            }
        }
    }

    // Definitions push a fresh version; pinned variables reuse themselves.
    let mut defs: SmallVec<[(bool, VReg); 2]> = SmallVec::new();
    {
        let insn = &cu.blocks[bb.index()].insns[idx];
        if fl.def_src {
            if let Operand::Reg(Reg::Virt(v)) = insn.src {
                defs.push((true, v));
            }
        }
        if fl.def_dst {
            if let Operand::Reg(Reg::Virt(v)) = insn.dst {
                defs.push((false, v));
            }
        }
    }
    for (in_src, v) in defs {
        let new = if cu.var(v).is_fixed() {
            v
        } else {
            let ty = cu.var(v).vm_type;
            cu.new_var(ty)
        };
        names[v.index()].push(new);
        changed.push(v.0);
        let insn = &mut cu.blocks[bb.index()].insns[idx];
        let slot = if in_src { &mut insn.src } else { &mut insn.dst };
        *slot = Operand::Reg(Reg::Virt(new));
    }
    Ok(())
}

/// Handler blocks are renamed without versioning: the first occurrence of
/// a variable creates its one handler-side name, reads and writes alike.
/// Runs after the main walk, when the name stacks have unwound, so handler
/// names never alias dominator-tree versions.
fn rename_eh_blocks(cu: &mut CompilationUnit, names: &mut [Vec<VReg>]) {
    let mut visited = vec![false; cu.nr_blocks()];
    let mut stack: Vec<BlockId> = (0..cu.nr_blocks())
        .map(|i| BlockId(i as u32))
        .filter(|&b| cu.blocks[b.index()].is_eh)
        .collect();
    while let Some(bb) = stack.pop() {
        if visited[bb.index()] {
            continue;
        }
        visited[bb.index()] = true;
        for idx in 0..cu.blocks[bb.index()].insns.len() {
            eh_rename_insn(cu, bb, idx, names);
        }
        for k in 0..cu.blocks[bb.index()].succs.len() {
            let s = cu.blocks[bb.index()].succs[k];
            if cu.bb_is_eh(s) && !visited[s.index()] {
                stack.push(s);
            }
        }
    }
}

fn eh_rename_insn(cu: &mut CompilationUnit, bb: BlockId, idx: usize, names: &mut [Vec<VReg>]) {
    // Seed missing names first; allocation and rewriting cannot overlap.
    let mut vars: SmallVec<[VReg; 4]> = SmallVec::new();
    {
        let insn = &cu.blocks[bb.index()].insns[idx];
        let mut collect = |r: Reg| {
            if let Reg::Virt(v) = r {
                if v.index() < names.len() {
                    vars.push(v);
                }
            }
        };
        insn.src.each_reg(&mut collect);
        insn.dst.each_reg(&mut collect);
    }
    for &v in &vars {
        if names[v.index()].is_empty() {
            let new = if cu.var(v).is_fixed() {
                v
            } else {
                let ty = cu.var(v).vm_type;
                cu.new_var(ty)
            };
            names[v.index()].push(new);
        }
    }
    let insn = &mut cu.blocks[bb.index()].insns[idx];
    let mut rename = |r: &mut Reg| {
        if let Reg::Virt(v) = *r {
            if let Some(&n) = names.get(v.index()).and_then(|s| s.last()) {
                *r = Reg::Virt(n);
            }
        }
    };
    insn.src.each_reg_mut(&mut rename);
    insn.dst.each_reg_mut(&mut rename);
}

/// Visit every virtual register the instruction reads. The read half of a
/// two-address operand lives in the side table, not the operand, so it is
/// not visited here.
pub(crate) fn each_use(insn: &Insn, f: &mut impl FnMut(VReg)) {
    let mut g = |r: Reg| {
        if let Reg::Virt(v) = r {
            f(v);
        }
    };
    if insn.op == Opcode::Phi {
        for s in &insn.phi_srcs {
            s.each_reg(&mut g);
        }
        return;
    }
    let fl = insn.op.insn_flags();
    let rmw_src = fl.use_src && fl.def_src && matches!(insn.src, Operand::Reg(_));
    let rmw_dst = fl.use_dst && fl.def_dst && matches!(insn.dst, Operand::Reg(_));
    if fl.use_src && !rmw_src {
        insn.src.each_reg(&mut g);
    }
    if fl.use_dst && !rmw_dst {
        insn.dst.each_reg(&mut g);
    }
    if fl.def_dst && !fl.use_dst {
        if let Operand::MemBase { .. } | Operand::MemIndex { .. } = insn.dst {
            insn.dst.each_reg(&mut g);
        }
    }
}

/// Rewrite every register slot [`each_use`] visits.
pub(crate) fn rewrite_uses(insn: &mut Insn, f: &mut impl FnMut(&mut Reg)) {
    if insn.op == Opcode::Phi {
        for s in &mut insn.phi_srcs {
            s.each_reg_mut(f);
        }
        return;
    }
    let fl = insn.op.insn_flags();
    let rmw_src = fl.use_src && fl.def_src && matches!(insn.src, Operand::Reg(_));
    let rmw_dst = fl.use_dst && fl.def_dst && matches!(insn.dst, Operand::Reg(_));
    if fl.use_src && !rmw_src {
        insn.src.each_reg_mut(f);
    }
    if fl.use_dst && !rmw_dst {
        insn.dst.each_reg_mut(f);
    }
    if fl.def_dst && !fl.use_dst {
        if let Operand::MemBase { .. } | Operand::MemIndex { .. } = insn.dst {
            insn.dst.each_reg_mut(f);
        }
    }
}

/// Drop instructions the optimization passes marked dead, keeping the
/// side table parallel to the shrunken lists.
pub(crate) fn sweep_dead(cu: &mut CompilationUnit, add_ons: &mut AddOns, dead: &[Vec<bool>]) {
    for bi in 0..cu.blocks.len() {
        if !dead[bi].iter().any(|&d| d) {
            continue;
        }
        let old = std::mem::take(&mut cu.blocks[bi].insns);
        let old_adds = std::mem::take(&mut add_ons[bi]);
        let mut insns = Vec::with_capacity(old.len());
        let mut adds = Vec::with_capacity(old_adds.len());
        for (i, (insn, a)) in old.into_iter().zip(old_adds).enumerate() {
            if !dead[bi][i] {
                insns.push(insn);
                adds.push(a);
            }
        }
        cu.blocks[bi].insns = insns;
        add_ons[bi] = adds;
    }
}

/// Leave SSA form: materialize the two-address read halves as copies, then
/// replace phis with copies on the incoming edges, walking the dominator
/// tree. A predecessor that falls through takes the copies directly; one
/// that branches gets the edge split; one that jumps through memory cannot
/// be retargeted, so the join block itself is vacated for the copies and
/// its body moves to a fresh successor.
pub fn ssa_to_lir(cu: &mut CompilationUnit, add_ons: AddOns) -> Result<(), CompileError> {
    insert_rmw_copies(cu, add_ons);
    let mut stack = vec![cu.entry];
    while let Some(bb) = stack.pop() {
        stack.extend(cu.blocks[bb.index()].dom_successors.iter().copied());
        deconstruct_block(cu, bb)?;
    }
    Ok(())
}

/// Materialize the read half of each two-address instruction as a copy
/// right before it. Skipped when both names are pinned: they are then the
/// same register and the copy would be a no-op.
fn insert_rmw_copies(cu: &mut CompilationUnit, add_ons: AddOns) {
    for (bi, block_adds) in add_ons.into_iter().enumerate() {
        if block_adds.iter().all(|a| a.is_none()) {
            continue;
        }
        let old = std::mem::take(&mut cu.blocks[bi].insns);
        let mut out = Vec::with_capacity(old.len() + 4);
        for (insn, add_on) in old.into_iter().zip(block_adds) {
            if let Some(read) = add_on {
                let fl = insn.op.insn_flags();
                let target = if fl.def_src { insn.src } else { insn.dst };
                if let Operand::Reg(Reg::Virt(def)) = target {
                    if !(cu.vars[read.index()].is_fixed() && cu.vars[def.index()].is_fixed()) {
                        let mut mov = Insn::mov_reg(Reg::Virt(read), Reg::Virt(def))
                            .with_bc_offset(insn.bc_offset);
                        mov.ssa_added = true;
                        out.push(mov);
                    }
                }
            }
            out.push(insn);
        }
        cu.blocks[bi].insns = out;
    }
}

fn deconstruct_block(cu: &mut CompilationUnit, bb: BlockId) -> Result<(), CompileError> {
    let nr_phis = cu.blocks[bb.index()]
        .insns
        .iter()
        .take_while(|i| i.op == Opcode::Phi)
        .count();
    if nr_phis == 0 {
        return Ok(());
    }
    let phis: Vec<Insn> = cu.blocks[bb.index()].insns[..nr_phis].to_vec();
    let preds: Vec<BlockId> = cu.blocks[bb.index()]
        .preds
        .iter()
        .copied()
        .filter(|&p| !cu.bb_is_eh(p))
        .collect();

    // Copies run in phi order, so no phi may read an earlier phi's result.
    debug_assert!(
        phis.iter().enumerate().all(|(i, p)| {
            phis[i + 1..].iter().all(|q| !q.phi_srcs.contains(&p.dst))
        }),
        "phi copies in {bb} would clobber a later phi's source"
    );

    let ends_jmp_mem =
        |cu: &CompilationUnit, p: BlockId| cu.blocks[p.index()].last_insn().is_some_and(Insn::is_jmp_mem);

    let phi_block = if preds.iter().any(|&p| ends_jmp_mem(cu, p)) {
        debug_assert_eq!(
            preds.iter().filter(|&&p| ends_jmp_mem(cu, p)).count(),
            1,
            "{bb} has several memory-jump predecessors sharing one copy block"
        );
        // The join's address must stay meaningful to the memory jump, so
        // the join itself becomes that edge's copy block and everyone else
        // is rerouted to the moved body.
        let moved = cu.split_block(bb);
        for &p in &preds {
            if !ends_jmp_mem(cu, p) {
                redirect_edge(cu, p, bb, moved);
            }
        }
        moved
    } else {
        bb
    };

    for (k, &p) in preds.iter().enumerate() {
        let target = if ends_jmp_mem(cu, p) {
            bb
        } else if cu.blocks[p.index()].succs.len() > 1
            || cu.blocks[p.index()].last_insn().is_some_and(Insn::is_branch)
        {
            cu.split_edge(p, phi_block)
        } else {
            p
        };
        for phi in &phis {
            let (Operand::Reg(Reg::Virt(dst)), Operand::Reg(Reg::Virt(src))) =
                (phi.dst, phi.phi_srcs[k])
            else {
                return Err(CompileError::MalformedCfg("phi with non-register operands"));
            };
            if cu.var(src).is_fixed() && cu.var(dst).is_fixed() {
                continue;
            }
            let mut mov =
                Insn::mov_reg(Reg::Virt(src), Reg::Virt(dst)).with_bc_offset(phi.bc_offset);
            mov.ssa_added = true;
            cu.blocks[target.index()].insns.push(mov);
        }
        cu.blocks[target.index()].insns.push(Insn::jump(phi_block));
    }
    cu.blocks[phi_block.index()].insns.drain(..nr_phis);
    trace!("deconstructed {nr_phis} phis joining at {phi_block}");
    Ok(())
}

/// Move the edge `pred -> from` to `pred -> to`, retargeting direct
/// branches in `pred`.
fn redirect_edge(cu: &mut CompilationUnit, pred: BlockId, from: BlockId, to: BlockId) {
    {
        let p = &mut cu.blocks[pred.index()];
        if let Some(i) = p.succ_index(from) {
            p.succs[i] = to;
        }
        for insn in &mut p.insns {
            if insn.is_branch() && insn.dst == Operand::Block(from) {
                insn.dst = Operand::Block(to);
            }
        }
    }
    let f = &mut cu.blocks[from.index()];
    if let Some(i) = f.pred_index(pred) {
        f.preds.remove(i);
    }
    cu.blocks[to.index()].preds.push(pred);
}

/// Drop variables no instruction references and renumber the rest. The
/// original pre-rename variables all fall out here, and the per-definition
/// pinned versions were never allocated in the first place, so one pinned
/// variable per register survives.
pub fn compact_var_table(cu: &mut CompilationUnit) {
    let mut used = vec![false; cu.nr_vars()];
    for block in &cu.blocks {
        for insn in &block.insns {
            let mut mark = |r: Reg| {
                if let Reg::Virt(v) = r {
                    used[v.index()] = true;
                }
            };
            insn.src.each_reg(&mut mark);
            insn.dst.each_reg(&mut mark);
            for s in &insn.phi_srcs {
                s.each_reg(&mut mark);
            }
        }
    }
    let mut map: Vec<Option<VReg>> = vec![None; used.len()];
    let mut new_vars = Vec::new();
    for (i, &u) in used.iter().enumerate() {
        if u {
            map[i] = Some(VReg(new_vars.len() as u32));
            new_vars.push(cu.vars[i].clone());
        }
    }
    let dropped = used.len() - new_vars.len();
    for block in &mut cu.blocks {
        for insn in &mut block.insns {
            let mut remap = |r: &mut Reg| {
                if let Reg::Virt(v) = *r {
                    if let Some(n) = map[v.index()] {
                        *r = Reg::Virt(n);
                    }
                }
            };
            insn.src.each_reg_mut(&mut remap);
            insn.dst.each_reg_mut(&mut remap);
            for s in &mut insn.phi_srcs {
                s.each_reg_mut(&mut remap);
            }
        }
    }
    cu.set_vars(new_vars);
    debug!("compacted variable table, dropped {dropped} variables");
}

/// Zero-initialize any variable whose first occurrence is a read.
/// Handler-side names defined nowhere get their definition here.
///
/// Occurrences are ordered by a fresh DFS of the final CFG, not by arena
/// order: deconstruction appends its edge blocks at the arena's end while
/// they execute before the joins they feed.
pub fn repair_use_before_def(cu: &mut CompilationUnit) {
    crate::dominance::compute_dfns(cu);
    let mut order = cu.dfs_order.clone();
    order.extend(
        (0..cu.nr_blocks())
            .map(|i| BlockId(i as u32))
            .filter(|&b| cu.bb_is_eh(b)),
    );
    let nr = cu.nr_vars();
    let mut min_use = vec![u32::MAX; nr];
    let mut min_def = vec![u32::MAX; nr];
    let mut pos = 0u32;
    for &bb in &order {
        let block = &cu.blocks[bb.index()];
        for insn in &block.insns {
            for v in insn.uses() {
                min_use[v.index()] = min_use[v.index()].min(pos);
            }
            for v in insn.defs() {
                min_def[v.index()] = min_def[v.index()].min(pos + 1);
            }
            pos += 2;
        }
    }
    let mut inits: Vec<Insn> = Vec::new();
    for v in 0..nr {
        if cu.vars[v].is_fixed() {
            continue;
        }
        if min_use[v] < min_def[v] {
            inits.push(Insn::mov_imm(0, Reg::Virt(VReg(v as u32))));
        }
    }
    if inits.is_empty() {
        return;
    }
    debug!("repaired {} uses before definition", inits.len());
    let entry = cu.entry.index();
    let old = std::mem::take(&mut cu.blocks[entry].insns);
    inits.extend(old);
    cu.blocks[entry].insns = inits;
}
