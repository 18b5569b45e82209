//! Liveness analysis: per-block use/def sets, backward fixed-point
//! live-in/live-out, and live interval construction.

use log::debug;

use kiln_lir::{BitSet, CompilationUnit};

use crate::interval::Intervals;

/// Compute `use`/`def`, `live_in`/`live_out` for every block. Requires
/// nothing beyond the CFG; LIR positions are only needed for
/// [`build_intervals`]. Idempotent: re-running on an unchanged unit
/// reproduces the same sets.
pub fn analyze_liveness(cu: &mut CompilationUnit) {
    let nr_vars = cu.nr_vars();
    for block in &mut cu.blocks {
        block.use_set = BitSet::new(nr_vars);
        block.def_set = BitSet::new(nr_vars);
        block.live_in = BitSet::new(nr_vars);
        block.live_out = BitSet::new(nr_vars);
    }
    analyze_use_def(cu);
    analyze_live_sets(cu);
    debug!("liveness: {} blocks, {} vars", cu.nr_blocks(), nr_vars);
}

/// `use` is every variable read before any definition in the block, `def`
/// every variable the block defines.
fn analyze_use_def(cu: &mut CompilationUnit) {
    for block in &mut cu.blocks {
        for insn in &block.insns {
            for v in insn.uses() {
                if !block.def_set.get(v.index()) {
                    block.use_set.set(v.index());
                }
            }
            for v in insn.defs() {
                block.def_set.set(v.index());
            }
        }
    }
}

/// Backward fixed point:
/// `live_out = union of successor live_in`,
/// `live_in = use + (live_out - def)`.
fn analyze_live_sets(cu: &mut CompilationUnit) {
    let nr_vars = cu.nr_vars();
    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..cu.blocks.len()).rev() {
            let mut live_out = BitSet::new(nr_vars);
            for k in 0..cu.blocks[i].succs.len() {
                let succ = cu.blocks[i].succs[k];
                live_out.union_with(&cu.blocks[succ.index()].live_in);
            }
            let block = &mut cu.blocks[i];
            let mut live_in = live_out.clone();
            live_in.subtract(&block.def_set);
            live_in.union_with(&block.use_set);
            if live_out != block.live_out || live_in != block.live_in {
                block.live_out = live_out;
                block.live_in = live_in;
                changed = true;
            }
        }
    }
}

/// Build the initial (unsplit) intervals: record every operand use at its
/// LIR position (inputs at `pos`, outputs at `pos + 1`) and extend ranges
/// over block boundaries for variables live across them. Requires
/// `compute_positions` and [`analyze_liveness`] to have run.
pub fn build_intervals(cu: &CompilationUnit, intervals: &mut Intervals) {
    // Use positions must arrive sorted. Positions follow flow order, which
    // can differ from arena order, so walk the blocks by position.
    let mut by_position: Vec<&kiln_lir::BasicBlock> = cu.blocks.iter().collect();
    by_position.sort_by_key(|b| b.start_insn);
    for block in by_position {
        let mut pos = block.start_insn;
        for insn in &block.insns {
            for v in insn.uses() {
                let id = intervals.head(v);
                intervals[id].add_use(pos);
            }
            for v in insn.defs() {
                let id = intervals.head(v);
                intervals[id].add_use(pos + 1);
            }
            pos += 2;
        }
    }
    for block in &cu.blocks {
        for v in block.live_in.iter_ones() {
            let id = intervals.head(kiln_lir::VReg(v as u32));
            intervals[id].extend(block.start_insn);
        }
        for v in block.live_out.iter_ones() {
            let id = intervals.head(kiln_lir::VReg(v as u32));
            intervals[id].extend(block.end_insn);
        }
    }
}
