//! Spill and reload insertion, plus data-flow resolution across CFG edges.
//!
//! Intervals marked by the allocator get a reload before their first
//! instruction (from the spill parent's slot) and a spill after their last.
//! The even/odd position rules: an interval starting at an odd position
//! without a use there begins right after a definition, so the reload goes
//! after that instruction; an interval both starting at an odd position and
//! using it starts with its own definition and must not have been marked.
//!
//! Instruction lists are `Vec`s, so insertions are gathered as
//! (block, index) requests against the untouched lists and applied in one
//! sweep at the end.

use log::{debug, trace};

use kiln_lir::{BasicBlock, BlockId, CompileError, CompilationUnit, Insn, Opcode, SlotId, VReg};

use crate::interval::{IntervalId, Intervals};

pub fn insert_spill_reload(
    cu: &mut CompilationUnit,
    intervals: &mut Intervals,
) -> Result<(), CompileError> {
    let mut inserts: Vec<(BlockId, usize, Insn)> = Vec::new();

    for i in 0..cu.nr_vars() {
        let mut id = Some(intervals.head(VReg(i as u32)));
        while let Some(it) = id {
            insert_for_interval(cu, intervals, it, &mut inserts)?;
            id = intervals[it].next_child;
        }
    }

    resolve_data_flow(cu, intervals, &mut inserts)?;
    // Intervals are walked per variable, so at a shared insertion point one
    // variable's reload may have been requested ahead of another's spill
    // from the same register. The spill reads the register's outgoing
    // value; it must run before any reload overwrites it.
    inserts.sort_by_key(|&(bb, idx, ref insn)| (bb.index(), idx, insn.op == Opcode::MovLocalReg));
    apply_insertions(cu, inserts);
    debug!("spill/reload inserted");
    Ok(())
}

/// Emit this interval's reload and spill. Walked parent-before-child, so a
/// reload can rely on its spill parent's slot being allocated already.
fn insert_for_interval(
    cu: &mut CompilationUnit,
    intervals: &mut Intervals,
    id: IntervalId,
    inserts: &mut Vec<(BlockId, usize, Insn)>,
) -> Result<(), CompileError> {
    if intervals[id].is_empty() {
        // Zero-length splits are never spilled or reloaded.
        return Ok(());
    }

    if intervals[id].need_reload {
        let Some(reg) = intervals[id].reg else {
            // Nothing ever read it; the reload was dropped with the uses.
            trace!("reload skipped for unassigned interval of {}", intervals[id].var);
            return Ok(());
        };
        let parent = intervals[id]
            .spill_parent
            .ok_or(CompileError::MalformedInterval("reload without spill parent"))?;
        let slot = intervals[parent]
            .spill_slot
            .ok_or(CompileError::MalformedInterval("reload parent has no slot"))?;
        let start = intervals[id].start;
        if start & 1 == 1 {
            if intervals[id].first_use() == Some(start) {
                return Err(CompileError::MalformedInterval(
                    "interval begins with a definition and is marked for reload",
                ));
            }
            // Starts past a definition; reload right after that instruction.
            let (bb, idx) = cu.insn_at(start - 1);
            inserts.push((bb, idx + 1, Insn::reload(slot, reg)));
        } else {
            let (bb, idx) = cu.insn_at(start);
            inserts.push((bb, idx, Insn::reload(slot, reg)));
        }
        trace!("reload {} <- {slot} at {start}", intervals[id].var);
    }

    if intervals[id].need_spill {
        let Some(reg) = intervals[id].reg else {
            trace!("spill skipped for unassigned interval of {}", intervals[id].var);
            return Ok(());
        };
        let ty = cu.var(intervals[id].var).vm_type;
        let slot = cu.frame.get_spill_slot(ty)?;
        intervals[id].spill_slot = Some(slot);
        let last_pos = (intervals[id].end - 1).min(cu.max_position().saturating_sub(1));
        let (bb, idx) = if last_pos & 1 == 1 {
            // Still written at its last instruction; spill after it.
            let (bb, idx) = cu.insn_at(last_pos - 1);
            (bb, idx + 1)
        } else {
            cu.insn_at(last_pos)
        };
        // An interval stretched to the block boundary by liveness ends past
        // the block's terminators; the spill still belongs before them.
        let at = idx.min(block_end_index(&cu.blocks[bb.index()]));
        inserts.push((bb, at, Insn::spill(reg, slot)));
        trace!("spill {} -> {slot} at {last_pos}", intervals[id].var);
    }
    Ok(())
}

/// When a split leaves a value in different locations at the two ends of a
/// CFG edge, insert a move in that edge's resolution block: a reload into
/// the destination register, or a slot-to-slot copy when the destination
/// side expects the value in memory.
fn resolve_data_flow(
    cu: &mut CompilationUnit,
    intervals: &Intervals,
    inserts: &mut Vec<(BlockId, usize, Insn)>,
) -> Result<(), CompileError> {
    for bi in 0..cu.blocks.len() {
        let from_id = BlockId(bi as u32);
        let (from_start, from_end) = {
            let b = &cu.blocks[bi];
            (b.start_insn, b.end_insn)
        };
        if from_start == from_end {
            continue; // empty predecessor: no locations change inside it
        }
        for k in 0..cu.blocks[bi].succs.len() {
            let to_id = cu.blocks[bi].succs[k];
            let to_start = cu.blocks[to_id.index()].start_insn;
            let live: Vec<usize> = cu.blocks[to_id.index()].live_in.iter_ones().collect();
            for v in live {
                let v = VReg(v as u32);
                let Some(from_it) = intervals.child_covering(v, from_end - 1) else {
                    continue;
                };
                let Some(to_it) = intervals.child_covering(v, to_start) else {
                    continue;
                };
                if from_it == to_it {
                    continue;
                }
                resolve_edge_var(
                    cu, intervals, inserts, from_id, k, from_end, to_start, from_it, to_it,
                )?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_edge_var(
    cu: &mut CompilationUnit,
    intervals: &Intervals,
    inserts: &mut Vec<(BlockId, usize, Insn)>,
    from_id: BlockId,
    edge: usize,
    from_end: u32,
    to_start: u32,
    from_it: IntervalId,
    to_it: IntervalId,
) -> Result<(), CompileError> {
    // Destination reloads on block entry: route the value into the slot
    // the reload reads instead of a register.
    if intervals[to_it].need_reload && intervals[to_it].start >= to_start {
        let parent = intervals[to_it]
            .spill_parent
            .ok_or(CompileError::MalformedInterval("reload without spill parent"))?;
        let slot_to = intervals[parent]
            .spill_slot
            .ok_or(CompileError::MalformedInterval("reload parent has no slot"))?;
        return copy_to_slot(cu, intervals, inserts, from_id, edge, from_end, from_it, slot_to);
    }

    let Some(to_reg) = intervals[to_it].reg else {
        // The destination side is a hole: the value belongs in the slot the
        // chain's next reload reads, which this edge may not have filled.
        let Some(slot_to) = memory_home(intervals, to_it) else {
            return Ok(()); // never read again
        };
        return copy_to_slot(cu, intervals, inserts, from_id, edge, from_end, from_it, slot_to);
    };
    if intervals[from_it].reg == Some(to_reg) {
        return Ok(());
    }
    let slot = outgoing_slot(cu, intervals, from_it, from_id, from_end, inserts)?;
    cu.blocks[from_id.index()].resolution[edge]
        .insns
        .push(Insn::reload(slot, to_reg));
    trace!("resolve {from_id} edge {edge}: {slot} -> {to_reg}");
    Ok(())
}

/// Route the outgoing value into `slot_to`. The copy is specific to this
/// edge (other successors may expect the value elsewhere), so it goes in
/// the edge's resolution block.
#[allow(clippy::too_many_arguments)]
fn copy_to_slot(
    cu: &mut CompilationUnit,
    intervals: &Intervals,
    inserts: &mut Vec<(BlockId, usize, Insn)>,
    from_id: BlockId,
    edge: usize,
    from_end: u32,
    from_it: IntervalId,
    slot_to: SlotId,
) -> Result<(), CompileError> {
    let slot_from = outgoing_slot(cu, intervals, from_it, from_id, from_end, inserts)?;
    if slot_from != slot_to {
        cu.blocks[from_id.index()].resolution[edge]
            .insns
            .push(Insn::copy_slot(slot_from, slot_to));
        trace!("resolve {from_id} edge {edge}: {slot_from} -> {slot_to}");
    }
    Ok(())
}

/// The slot holding `id`'s value when the predecessor block ends, emitting
/// a spill at the block's end if the value only lives in a register there.
fn outgoing_slot(
    cu: &mut CompilationUnit,
    intervals: &Intervals,
    id: IntervalId,
    from_id: BlockId,
    from_end: u32,
    inserts: &mut Vec<(BlockId, usize, Insn)>,
) -> Result<SlotId, CompileError> {
    let it = &intervals[id];
    if it.need_spill && it.end <= from_end {
        // Its own spill already ran inside this block.
        if let Some(slot) = it.spill_slot {
            return Ok(slot);
        }
    }
    let Some(reg) = it.reg else {
        // A hole: the value sits wherever the last spill put it.
        return memory_home(intervals, id).ok_or(CompileError::MalformedInterval(
            "live value has no location at block end",
        ));
    };
    let ty = cu.var(it.var).vm_type;
    let slot = cu.frame.get_spill_slot(ty)?;
    let idx = block_end_index(&cu.blocks[from_id.index()]);
    inserts.push((from_id, idx, Insn::spill(reg, slot)));
    Ok(slot)
}

/// Walk back through the split chain to the interval whose spill slot
/// holds the value.
fn memory_home(intervals: &Intervals, id: IntervalId) -> Option<SlotId> {
    let mut cur = Some(id);
    while let Some(c) = cur {
        if intervals[c].need_spill {
            return intervals[c].spill_slot;
        }
        cur = intervals[c].prev_child;
    }
    None
}

/// Index before any trailing terminators (branches and returns), where
/// edge spills and copies go.
fn block_end_index(block: &BasicBlock) -> usize {
    let mut i = block.insns.len();
    while i > 0 && block.insns[i - 1].is_terminator() {
        i -= 1;
    }
    i
}

/// Apply gathered insertions. Indices refer to the original instruction
/// lists; requests at the same index keep their request order.
pub(crate) fn apply_insertions(cu: &mut CompilationUnit, items: Vec<(BlockId, usize, Insn)>) {
    if items.is_empty() {
        return;
    }
    for bi in 0..cu.blocks.len() {
        let mut reqs: Vec<(usize, &Insn)> = items
            .iter()
            .filter(|(b, _, _)| b.index() == bi)
            .map(|(_, idx, insn)| (*idx, insn))
            .collect();
        if reqs.is_empty() {
            continue;
        }
        reqs.sort_by_key(|(idx, _)| *idx); // stable: request order within an index
        let old = std::mem::take(&mut cu.blocks[bi].insns);
        let mut out = Vec::with_capacity(old.len() + reqs.len());
        let mut r = 0;
        for (i, insn) in old.into_iter().enumerate() {
            while r < reqs.len() && reqs[r].0 == i {
                out.push(reqs[r].1.clone());
                r += 1;
            }
            out.push(insn);
        }
        while r < reqs.len() {
            out.push(reqs[r].1.clone());
            r += 1;
        }
        cu.blocks[bi].insns = out;
    }
}
