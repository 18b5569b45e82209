//! Linear scan register allocation with interval splitting.
//!
//! Intervals are processed in start order. Pinned (fixed) intervals are
//! seeded into the inactive list up front so every free/blocked computation
//! sees them; everything else flows through the unhandled worklist, which
//! split children re-enter.

use log::{debug, trace};

use kiln_lir::{CompileError, MachDesc, MachReg, VReg};

use crate::interval::{IntervalId, Intervals, NO_POS};

struct ScanState {
    unhandled: Vec<IntervalId>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
}

/// Assign a machine register to every interval with at least one use,
/// splitting and marking intervals for spill/reload where demand exceeds
/// the register file.
pub fn allocate_registers(
    cu: &kiln_lir::CompilationUnit,
    intervals: &mut Intervals,
    desc: &MachDesc,
) -> Result<(), CompileError> {
    let mut state = ScanState {
        unhandled: Vec::new(),
        active: Vec::new(),
        inactive: Vec::new(),
    };

    for i in 0..cu.nr_vars() {
        let id = intervals.head(VReg(i as u32));
        if intervals[id].is_empty() {
            continue;
        }
        if intervals[id].fixed {
            state.inactive.push(id);
        } else {
            state.unhandled.push(id);
        }
    }

    while let Some(current) = take_earliest(&mut state.unhandled, intervals) {
        let position = intervals[current].start;
        trace!(
            "scan: {} [{}, {}) at {}",
            intervals[current].var,
            position,
            intervals[current].end,
            position
        );

        transition(&mut state, intervals, position);

        if intervals[current].fixed {
            // Register preassigned; nothing to decide.
            state.active.push(current);
            continue;
        }

        if try_to_allocate_free_reg(cu, intervals, &mut state, current, desc)? {
            state.active.push(current);
            continue;
        }
        allocate_blocked_reg(cu, intervals, &mut state, current, desc)?;
    }
    debug!("scan: {} intervals after splitting", intervals.len());
    Ok(())
}

/// Remove and return the unhandled interval with the smallest start. Ties
/// resolve to the earliest inserted.
fn take_earliest(unhandled: &mut Vec<IntervalId>, intervals: &Intervals) -> Option<IntervalId> {
    let mut best = 0;
    for i in 1..unhandled.len() {
        if intervals[unhandled[i]].start < intervals[unhandled[best]].start {
            best = i;
        }
    }
    if unhandled.is_empty() {
        None
    } else {
        Some(unhandled.remove(best))
    }
}

/// Expire and migrate intervals relative to `position`: ended intervals
/// leave the lists, covered ones belong in active, uncovered in inactive.
fn transition(state: &mut ScanState, intervals: &Intervals, position: u32) {
    for id in std::mem::take(&mut state.active) {
        let it = &intervals[id];
        if it.end <= position {
            continue; // handled
        }
        if it.covers(position) {
            state.active.push(id);
        } else {
            state.inactive.push(id);
        }
    }
    for id in std::mem::take(&mut state.inactive) {
        let it = &intervals[id];
        if it.end <= position {
            continue;
        }
        if it.covers(position) {
            state.active.push(id);
        } else {
            state.inactive.push(id);
        }
    }
}

fn candidate_index(candidates: &[MachReg], reg: MachReg) -> Option<usize> {
    candidates.iter().position(|&r| r == reg)
}

/// Try to place `current` in a register that is free at its start.
/// `free_until_pos` per candidate: `NO_POS` when nothing conflicts, 0 for
/// registers held by an active interval, the intersection start for
/// inactive conflicts (an intersection at `current.start` itself counts as
/// occupied). The maximum wins; ties go to the lowest-numbered candidate.
fn try_to_allocate_free_reg(
    cu: &kiln_lir::CompilationUnit,
    intervals: &mut Intervals,
    state: &mut ScanState,
    current: IntervalId,
    desc: &MachDesc,
) -> Result<bool, CompileError> {
    let class = cu.var(intervals[current].var).vm_type.reg_class();
    let candidates = desc.allocatable(class);
    if candidates.is_empty() {
        return Err(CompileError::MalformedInterval(
            "no allocatable registers for class",
        ));
    }
    let cur_start = intervals[current].start;
    let cur_end = intervals[current].end;

    let mut free_until = vec![NO_POS; candidates.len()];
    for &id in &state.active {
        if let Some(k) = intervals[id].reg.and_then(|r| candidate_index(candidates, r)) {
            free_until[k] = 0;
        }
    }
    for &id in &state.inactive {
        let Some(k) = intervals[id].reg.and_then(|r| candidate_index(candidates, r)) else {
            continue;
        };
        if let Some(isect) = intervals[current].intersection_start(&intervals[id]) {
            let limit = if isect == cur_start { 0 } else { isect };
            free_until[k] = free_until[k].min(limit);
        }
    }

    let mut best = 0;
    for k in 1..free_until.len() {
        if free_until[k] > free_until[best] {
            best = k;
        }
    }
    if free_until[best] == 0 {
        return Ok(false);
    }
    let reg = candidates[best];

    if free_until[best] >= cur_end {
        intervals[current].reg = Some(reg);
        trace!("  {} -> {} (free)", intervals[current].var, reg);
        return Ok(true);
    }

    // Free only for a prefix: take the register for the head, push the
    // tail back through the worklist.
    let tail = split_and_spill(intervals, current, free_until[best]);
    state.unhandled.push(tail);
    intervals[current].reg = Some(reg);
    trace!(
        "  {} -> {} until {}, tail re-queued",
        intervals[current].var,
        reg,
        free_until[best]
    );
    Ok(true)
}

/// All registers are occupied at `current`'s start. Pick the register whose
/// holder's next use is farthest away; then either spill `current` itself
/// (its first use is farther still), or evict the holder.
fn allocate_blocked_reg(
    cu: &kiln_lir::CompilationUnit,
    intervals: &mut Intervals,
    state: &mut ScanState,
    current: IntervalId,
    desc: &MachDesc,
) -> Result<(), CompileError> {
    let class = cu.var(intervals[current].var).vm_type.reg_class();
    let candidates = desc.allocatable(class);
    let position = intervals[current].start;
    let cur_end = intervals[current].end;

    let mut use_pos = vec![NO_POS; candidates.len()];
    let mut block_pos = vec![NO_POS; candidates.len()];
    for &id in &state.active {
        let it = &intervals[id];
        let Some(k) = it.reg.and_then(|r| candidate_index(candidates, r)) else {
            continue;
        };
        if it.fixed {
            block_pos[k] = 0;
            use_pos[k] = 0;
        } else {
            use_pos[k] = use_pos[k].min(it.next_use_pos(position));
        }
    }
    for &id in &state.inactive {
        let it = &intervals[id];
        let Some(k) = it.reg.and_then(|r| candidate_index(candidates, r)) else {
            continue;
        };
        let Some(isect) = intervals[current].intersection_start(it) else {
            continue;
        };
        if it.fixed {
            block_pos[k] = block_pos[k].min(isect);
            use_pos[k] = use_pos[k].min(block_pos[k]);
        } else {
            use_pos[k] = use_pos[k].min(it.next_use_pos(position));
        }
    }

    let mut best = 0;
    for k in 1..use_pos.len() {
        if use_pos[k] > use_pos[best] {
            best = k;
        }
    }

    let cur_first = intervals[current].next_use_pos(position);
    if use_pos[best] < cur_first {
        // Case 1: every register holder is used sooner than `current`;
        // `current` stays in memory until its first use.
        if cur_first == NO_POS {
            // Never used; nothing to materialize.
            trace!("  {} has no uses, left unassigned", intervals[current].var);
            return Ok(());
        }
        if cur_first == position {
            return Err(CompileError::MalformedInterval(
                "use at interval start while all registers are blocked",
            ));
        }
        let tail = split_and_spill(intervals, current, cur_first);
        state.unhandled.push(tail);
        trace!(
            "  {} spilled at start, tail from {} re-queued",
            intervals[current].var,
            cur_first
        );
        return Ok(());
    }

    let reg = candidates[best];
    if block_pos[best] < cur_end {
        // Case 3: a fixed interval takes `reg` at block_pos; only the head
        // can have it.
        let tail = split_and_spill(intervals, current, block_pos[best]);
        state.unhandled.push(tail);
    }
    // Case 2 (or the head from case 3): evict every overlapping holder.
    intervals[current].reg = Some(reg);
    trace!("  {} -> {} (evicting)", intervals[current].var, reg);
    evict_overlapping(intervals, state, current, reg);
    state.active.push(current);
    Ok(())
}

/// Split `id` at `pos` and route the value through memory: the head spills
/// after its last instruction, the tail reloads before its first. Two
/// exceptions: a tail beginning with its own definition needs neither, and
/// a head that was still awaiting its reload (no use materialized it)
/// forwards the obligation to the tail instead.
fn split_and_spill(intervals: &mut Intervals, id: IntervalId, pos: u32) -> IntervalId {
    let tail = intervals.split_at(id, pos);

    let (tail_start, tail_first) = {
        let t = &intervals[tail];
        (t.start, t.first_use())
    };
    if tail_first.is_none() {
        // No further reads; the value need not travel.
        return tail;
    }
    if tail_start & 1 == 1 && tail_first == Some(tail_start) {
        // Tail starts with a definition; the head's value is dead there.
        return tail;
    }
    if !intervals[id].need_reload && intervals[id].use_positions.is_empty() {
        // The head never carried a defined value (use before def); there
        // is nothing coherent to spill.
        return tail;
    }

    if intervals[id].need_reload && intervals[id].use_positions.is_empty() {
        let parent = intervals[id].spill_parent;
        intervals[id].need_reload = false;
        intervals[id].spill_parent = None;
        intervals[tail].need_reload = true;
        intervals[tail].spill_parent = parent;
    } else {
        intervals[id].need_spill = true;
        intervals[tail].need_reload = true;
        intervals[tail].spill_parent = Some(id);
    }
    tail
}

/// Take `reg` away from every non-fixed active/inactive interval that
/// overlaps `current`. Each victim keeps the register up to `current`'s
/// start; the remainder is split off, and if it still has a use, the part
/// from that use on is re-queued (reloading from the victim's spill).
fn evict_overlapping(
    intervals: &mut Intervals,
    state: &mut ScanState,
    current: IntervalId,
    reg: MachReg,
) {
    let cur_start = intervals[current].start;
    let mut victims = Vec::new();
    for list in [&mut state.active, &mut state.inactive] {
        list.retain(|&id| {
            let it = &intervals[id];
            let overlaps = id != current
                && !it.fixed
                && it.reg == Some(reg)
                && intervals[current].intersection_start(it).is_some();
            if overlaps {
                victims.push(id);
            }
            !overlaps
        });
    }

    for id in victims {
        trace!("  evicting {} from {}", intervals[id].var, reg);
        let rest = if intervals[id].start < cur_start {
            split_and_spill(intervals, id, cur_start)
        } else {
            // Lost the register at its own start position.
            intervals[id].reg = None;
            id
        };
        // Re-queue from the next use; any stretch before it stays a hole
        // with neither register nor reload.
        let Some(u) = intervals[rest].first_use() else {
            continue;
        };
        let target = if u > intervals[rest].start {
            split_and_spill(intervals, rest, u)
        } else {
            rest
        };
        if target != rest && intervals[rest].need_reload {
            // The obligation moved with the split (or the tail redefines
            // the value); the remaining hole never reloads.
            intervals[rest].need_reload = false;
            intervals[rest].spill_parent = None;
        }
        state.unhandled.push(target);
    }
}
