//! Live intervals.
//!
//! Each variable starts with one interval covering a single `[start, end)`
//! range. The allocator splits intervals; children are threaded on a chain
//! (`prev_child`/`next_child`) ordered by start position, and the spill
//! machinery links a reloading child to the interval whose slot holds the
//! value (`spill_parent`).

use kiln_lir::{CompilationUnit, MachReg, SlotId, VReg};

/// Sentinel "no position", larger than every real LIR position.
pub const NO_POS: u32 = u32::MAX;

/// Index of an interval in the [`Intervals`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalId(pub u32);

impl IntervalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Interval {
    pub var: VReg,
    /// Range start, `NO_POS` while the interval is empty.
    pub start: u32,
    /// Range end (exclusive).
    pub end: u32,
    pub reg: Option<MachReg>,
    /// Pinned to `reg`; the allocator never reassigns it.
    pub fixed: bool,
    pub need_spill: bool,
    pub need_reload: bool,
    /// Use positions in ascending order. An instruction's inputs use the
    /// instruction position, its outputs the position plus one.
    pub use_positions: Vec<u32>,
    pub prev_child: Option<IntervalId>,
    pub next_child: Option<IntervalId>,
    /// Interval whose spill slot this interval reloads from.
    pub spill_parent: Option<IntervalId>,
    pub spill_slot: Option<SlotId>,
}

impl Interval {
    fn new(var: VReg) -> Interval {
        Interval {
            var,
            start: NO_POS,
            end: 0,
            reg: None,
            fixed: false,
            need_spill: false,
            need_reload: false,
            use_positions: Vec::new(),
            prev_child: None,
            next_child: None,
            spill_parent: None,
            spill_slot: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn covers(&self, pos: u32) -> bool {
        !self.is_empty() && self.start <= pos && pos < self.end
    }

    /// Grow the range to include `pos`.
    pub fn extend(&mut self, pos: u32) {
        if self.start > pos {
            self.start = pos;
        }
        if self.end < pos + 1 {
            self.end = pos + 1;
        }
    }

    /// Record a use at `pos` and grow the range over it. Positions arrive
    /// in program order, so the list stays sorted by pushing.
    pub fn add_use(&mut self, pos: u32) {
        debug_assert!(self.use_positions.last().is_none_or(|&p| p <= pos));
        self.use_positions.push(pos);
        self.extend(pos);
    }

    /// First position where this interval's range overlaps `other`'s.
    pub fn intersection_start(&self, other: &Interval) -> Option<u32> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        if lo < hi {
            Some(lo)
        } else {
            None
        }
    }

    pub fn first_use(&self) -> Option<u32> {
        self.use_positions.first().copied()
    }

    /// First use at or after `from`, `NO_POS` if none.
    pub fn next_use_pos(&self, from: u32) -> u32 {
        let i = self.use_positions.partition_point(|&p| p < from);
        self.use_positions.get(i).copied().unwrap_or(NO_POS)
    }
}

/// Arena of all intervals of one compilation unit, plus the per-variable
/// head (unsplit) interval.
#[derive(Debug)]
pub struct Intervals {
    arena: Vec<Interval>,
    heads: Vec<IntervalId>,
}

impl Intervals {
    /// One empty interval per variable; pinned variables come out fixed
    /// with their register preassigned.
    pub fn for_unit(cu: &CompilationUnit) -> Intervals {
        let mut arena = Vec::with_capacity(cu.nr_vars());
        let mut heads = Vec::with_capacity(cu.nr_vars());
        for (i, info) in cu.vars.iter().enumerate() {
            let mut it = Interval::new(VReg(i as u32));
            if let Some(reg) = info.fixed {
                it.fixed = true;
                it.reg = Some(reg);
            }
            heads.push(IntervalId(i as u32));
            arena.push(it);
        }
        Intervals { arena, heads }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = IntervalId> {
        (0..self.arena.len() as u32).map(IntervalId)
    }

    pub fn head(&self, var: VReg) -> IntervalId {
        self.heads[var.index()]
    }

    /// Split `id` at `pos`, which must lie strictly inside its range.
    /// Use positions at or after `pos` move to the new child; a fixed
    /// interval's pin carries over, a regular child starts unassigned.
    pub fn split_at(&mut self, id: IntervalId, pos: u32) -> IntervalId {
        let new_id = IntervalId(self.arena.len() as u32);
        let it = &mut self.arena[id.index()];
        debug_assert!(it.start < pos && pos < it.end, "split outside interval");

        let cut = it.use_positions.partition_point(|&p| p < pos);
        let tail_uses = it.use_positions.split_off(cut);

        let mut child = Interval::new(it.var);
        child.start = pos;
        child.end = it.end;
        child.use_positions = tail_uses;
        child.fixed = it.fixed;
        if it.fixed {
            child.reg = it.reg;
        }
        child.prev_child = Some(id);
        child.next_child = it.next_child;

        it.end = pos;
        let old_next = it.next_child;
        it.next_child = Some(new_id);
        if let Some(n) = old_next {
            self.arena[n.index()].prev_child = Some(new_id);
        }
        self.arena.push(child);
        new_id
    }

    /// Child of `var`'s interval chain covering `pos`.
    pub fn child_covering(&self, var: VReg, pos: u32) -> Option<IntervalId> {
        let mut id = Some(self.head(var));
        while let Some(i) = id {
            if self[i].covers(pos) {
                return Some(i);
            }
            id = self[i].next_child;
        }
        None
    }
}

impl std::ops::Index<IntervalId> for Intervals {
    type Output = Interval;

    fn index(&self, id: IntervalId) -> &Interval {
        &self.arena[id.index()]
    }
}

impl std::ops::IndexMut<IntervalId> for Intervals {
    fn index_mut(&mut self, id: IntervalId) -> &mut Interval {
        &mut self.arena[id.index()]
    }
}
