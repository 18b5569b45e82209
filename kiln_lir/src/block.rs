//! Basic blocks. Blocks live in the compilation unit's arena and refer to
//! each other by `BlockId` only.

use std::fmt;

use crate::bitset::BitSet;
use crate::insn::Insn;

/// Index of a basic block in [`CompilationUnit::blocks`].
///
/// [`CompilationUnit::blocks`]: crate::CompilationUnit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Moves materialized on one CFG edge by data-flow resolution. Emission
/// places these between the predecessor and the successor.
#[derive(Debug, Clone, Default)]
pub struct ResolutionBlock {
    pub insns: Vec<Insn>,
}

/// A basic block: an owned instruction list plus CFG edges and the analysis
/// state the passes hang off it.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub insns: Vec<Insn>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Per-successor-edge resolution moves, parallel to `succs`.
    pub resolution: Vec<ResolutionBlock>,
    /// Exception handler entry block.
    pub is_eh: bool,
    /// Depth-first number. 0 means either the entry block or a block the
    /// DFS never reached (exception handlers, unreachable code).
    pub dfn: u32,
    /// LIR position of the first instruction.
    pub start_insn: u32,
    /// LIR position one past the last instruction (`start_insn` if empty).
    pub end_insn: u32,
    // Liveness state, sized by the variable table.
    pub use_set: BitSet,
    pub def_set: BitSet,
    pub live_in: BitSet,
    pub live_out: BitSet,
    /// Dominance frontier, indexed by dfn.
    pub dom_frontier: BitSet,
    /// Number of non-EH predecessors (phi source count).
    pub nr_preds_no_eh: u32,
    /// For each successor, this block's index among that successor's non-EH
    /// predecessors. Parallel to `succs`; used to patch phi sources.
    pub positions_as_predecessor: Vec<u32>,
    /// Children in the dominator tree.
    pub dom_successors: Vec<BlockId>,
}

impl BasicBlock {
    pub fn new() -> BasicBlock {
        BasicBlock {
            insns: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            resolution: Vec::new(),
            is_eh: false,
            dfn: 0,
            start_insn: 0,
            end_insn: 0,
            use_set: BitSet::new(0),
            def_set: BitSet::new(0),
            live_in: BitSet::new(0),
            live_out: BitSet::new(0),
            dom_frontier: BitSet::new(0),
            nr_preds_no_eh: 0,
            positions_as_predecessor: Vec::new(),
            dom_successors: Vec::new(),
        }
    }

    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub fn last_insn(&self) -> Option<&Insn> {
        self.insns.last()
    }

    /// Index of `pred` in this block's predecessor list.
    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }

    /// Index of `succ` in this block's successor list.
    pub fn succ_index(&self, succ: BlockId) -> Option<usize> {
        self.succs.iter().position(|&s| s == succ)
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        BasicBlock::new()
    }
}
