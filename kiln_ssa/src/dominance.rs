//! Dominance: DFS numbering, immediate dominators, dominance frontiers
//! and the dominator tree.
//!
//! Immediate dominators follow the Cooper-Harvey-Kennedy scheme: iterate
//! over the blocks in DFS order, intersecting the already-computed
//! dominators of each block's predecessors by walking dfns upward, until
//! nothing changes.

use log::debug;

use kiln_lir::{BitSet, BlockId, CompilationUnit};

/// Run the full analysis: numbering, dominators, frontiers, tree.
pub fn analyze_dominance(cu: &mut CompilationUnit) {
    compute_dfns(cu);
    compute_doms(cu);
    compute_dom_frontier(cu);
    compute_dom_successors(cu);
}

/// Number the blocks reachable from entry in DFS preorder and record the
/// order in `cu.dfs_order`. The entry block keeps dfn 0; blocks the walk
/// never reaches (exception handlers, dead code) also stay at 0 and are
/// told apart by `bb_is_eh`.
pub fn compute_dfns(cu: &mut CompilationUnit) {
    for block in &mut cu.blocks {
        block.dfn = 0;
    }
    let entry = cu.entry;
    cu.dfs_order.clear();
    cu.dfs_order.push(entry);
    let mut next_dfn = 0u32;
    // (block, next successor) frames instead of native recursion.
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    while !stack.is_empty() {
        let top = stack.len() - 1;
        let (bb, i) = stack[top];
        if i >= cu.blocks[bb.index()].succs.len() {
            stack.pop();
            continue;
        }
        stack[top].1 = i + 1;
        let succ = cu.blocks[bb.index()].succs[i];
        if succ == entry || cu.blocks[succ.index()].dfn != 0 {
            continue;
        }
        next_dfn += 1;
        cu.blocks[succ.index()].dfn = next_dfn;
        cu.dfs_order.push(succ);
        stack.push((succ, 0));
    }
    debug!(
        "dfs numbered {} of {} blocks",
        cu.dfs_order.len(),
        cu.nr_blocks()
    );
}

/// Iterate immediate dominators to a fixed point. `cu.doms` is indexed by
/// dfn; the entry block dominates itself so the intersection walks always
/// terminate.
pub fn compute_doms(cu: &mut CompilationUnit) {
    let nr = cu.dfs_order.len();
    cu.doms = vec![None; nr];
    cu.doms[0] = Some(cu.entry);
    let mut changed = true;
    while changed {
        changed = false;
        for ndx in 1..nr {
            let b = cu.dfs_order[ndx];
            let mut new_idom = None;
            for k in 0..cu.blocks[b.index()].preds.len() {
                let p = cu.blocks[b.index()].preds[k];
                if cu.bb_is_eh(p) {
                    continue;
                }
                if cu.doms[cu.blocks[p.index()].dfn as usize].is_none() {
                    continue; // not processed yet this round
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(cu, p, cur),
                });
            }
            if cu.doms[ndx] != new_idom {
                cu.doms[ndx] = new_idom;
                changed = true;
            }
        }
    }
}

/// Common dominator of two blocks, walking the finger with the larger dfn
/// up its dominator chain until the fingers meet.
fn intersect(cu: &CompilationUnit, b1: BlockId, b2: BlockId) -> BlockId {
    let mut f1 = b1;
    let mut f2 = b2;
    while f1 != f2 {
        let (d1, d2) = (cu.block(f1).dfn, cu.block(f2).dfn);
        if d1 < d2 {
            f2 = cu.doms[d2 as usize].unwrap_or(cu.entry);
        } else {
            f1 = cu.doms[d1 as usize].unwrap_or(cu.entry);
        }
    }
    f1
}

/// A join block is in the frontier of every block on the path from each of
/// its predecessors up to, but excluding, the join's immediate dominator.
/// Frontier bits are indexed by dfn.
pub fn compute_dom_frontier(cu: &mut CompilationUnit) {
    let nbits = cu.nr_blocks();
    for block in &mut cu.blocks {
        block.dom_frontier = BitSet::new(nbits);
    }
    for bi in 0..cu.blocks.len() {
        let b = BlockId(bi as u32);
        if cu.bb_is_eh(b) || cu.blocks[bi].preds.len() < 2 {
            continue;
        }
        let b_dfn = cu.blocks[bi].dfn as usize;
        let Some(idom) = cu.doms[b_dfn] else {
            continue;
        };
        for k in 0..cu.blocks[bi].preds.len() {
            let p = cu.blocks[bi].preds[k];
            if cu.bb_is_eh(p) {
                continue;
            }
            let mut runner = p;
            while runner != idom {
                cu.blocks[runner.index()].dom_frontier.set(b_dfn);
                runner = cu.doms[cu.blocks[runner.index()].dfn as usize].unwrap_or(cu.entry);
            }
        }
    }
}

/// Rebuild the dominator tree children lists from `cu.doms`.
pub fn compute_dom_successors(cu: &mut CompilationUnit) {
    for block in &mut cu.blocks {
        block.dom_successors.clear();
    }
    for ndx in 1..cu.dfs_order.len() {
        let b = cu.dfs_order[ndx];
        if let Some(dom) = cu.doms[ndx] {
            cu.blocks[dom.index()].dom_successors.push(b);
        }
    }
}
