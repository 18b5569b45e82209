//! The compilation unit: the per-method container every pass operates on.

use crate::block::{BasicBlock, BlockId, ResolutionBlock};
use crate::frame::StackFrame;
use crate::insn::{Insn, Operand};
use crate::types::{MachReg, VReg, VarInfo, VmType};

/// One method under compilation: the block arena, the variable table, the
/// stack frame, and the LIR position map.
#[derive(Debug)]
pub struct CompilationUnit {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub vars: Vec<VarInfo>,
    pub frame: StackFrame,
    /// DFS preorder of reachable blocks, indexed by dfn.
    pub dfs_order: Vec<BlockId>,
    /// Immediate dominator per dfn. The entry block is its own dominator
    /// so upward walks terminate.
    pub doms: Vec<Option<BlockId>>,
    /// Cache of pinned variables, one per machine register.
    fixed_vars: Vec<(MachReg, VReg)>,
    /// `positions[pos / 2]` is the (block, instruction index) at LIR
    /// position `pos`. Rebuilt by `compute_positions`.
    positions: Vec<(BlockId, usize)>,
}

impl CompilationUnit {
    /// A unit with an empty entry block and `nr_locals` local stack slots.
    pub fn new(nr_locals: u32) -> CompilationUnit {
        CompilationUnit {
            blocks: vec![BasicBlock::new()],
            entry: BlockId(0),
            vars: Vec::new(),
            frame: StackFrame::new(nr_locals),
            dfs_order: Vec::new(),
            doms: Vec::new(),
            fixed_vars: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn nr_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn nr_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new());
        id
    }

    /// Add the CFG edge `from -> to`.
    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[from.index()]
            .resolution
            .push(ResolutionBlock::default());
        self.blocks[to.index()].preds.push(from);
    }

    /// Allocate a fresh virtual register.
    pub fn new_var(&mut self, vm_type: VmType) -> VReg {
        let v = VReg(self.vars.len() as u32);
        self.vars.push(VarInfo {
            vm_type,
            fixed: None,
        });
        v
    }

    /// The variable pinned to `reg`, allocating it on first use. One pinned
    /// variable exists per machine register per unit.
    pub fn fixed_var(&mut self, reg: MachReg, vm_type: VmType) -> VReg {
        if let Some(&(_, v)) = self.fixed_vars.iter().find(|&&(r, _)| r == reg) {
            return v;
        }
        let v = VReg(self.vars.len() as u32);
        self.vars.push(VarInfo {
            vm_type,
            fixed: Some(reg),
        });
        self.fixed_vars.push((reg, v));
        v
    }

    pub fn var(&self, v: VReg) -> &VarInfo {
        &self.vars[v.index()]
    }

    /// Replace the variable table wholesale and rebuild the pinned-variable
    /// cache from it. The caller has already remapped every operand.
    pub fn set_vars(&mut self, vars: Vec<VarInfo>) {
        self.vars = vars;
        self.fixed_vars.clear();
        for (i, info) in self.vars.iter().enumerate() {
            if let Some(reg) = info.fixed {
                self.fixed_vars.push((reg, VReg(i as u32)));
            }
        }
    }

    /// Assign every instruction an even LIR position (step 2) and record
    /// block boundaries. An instruction's inputs are read at its position,
    /// its outputs written one past it.
    ///
    /// Blocks are walked in reverse postorder from entry, not arena order:
    /// a value defined in a predecessor keeps a lower position than its
    /// uses downstream no matter where edge splitting appended the defining
    /// block. Interval splitting relies on this; see `linear_order`.
    /// Blocks the walk never reaches (exception handlers, dead code) follow
    /// in arena order.
    pub fn compute_positions(&mut self) {
        self.positions.clear();
        let mut pos = 0u32;
        for bb in self.linear_order() {
            let block = &mut self.blocks[bb.index()];
            block.start_insn = pos;
            for idx in 0..block.insns.len() {
                self.positions.push((bb, idx));
                pos += 2;
            }
            block.end_insn = pos;
        }
    }

    /// Reverse postorder over the CFG from entry, unvisited blocks
    /// appended. With every variable defined before use along each flow
    /// path, this order puts each definition's position below all of its
    /// uses' positions, so no live interval starts at a position its value
    /// has not reached yet.
    fn linear_order(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        visited[self.entry.index()] = true;
        let mut post: Vec<BlockId> = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        while !stack.is_empty() {
            let top = stack.len() - 1;
            let (bb, i) = stack[top];
            if i >= self.blocks[bb.index()].succs.len() {
                stack.pop();
                post.push(bb);
                continue;
            }
            stack[top].1 = i + 1;
            let succ = self.blocks[bb.index()].succs[i];
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        }
        post.reverse();
        post.extend(
            (0..self.blocks.len())
                .map(|i| BlockId(i as u32))
                .filter(|&b| !visited[b.index()]),
        );
        post
    }

    /// One past the last assigned LIR position.
    pub fn max_position(&self) -> u32 {
        self.positions.len() as u32 * 2
    }

    /// The instruction covering LIR position `pos` (odd positions belong to
    /// the instruction at `pos - 1`).
    pub fn insn_at(&self, pos: u32) -> (BlockId, usize) {
        self.positions[(pos / 2) as usize]
    }

    /// Split the edge `pred -> succ` with a fresh empty block. The new
    /// block inherits the edge; direct branches in `pred` targeting `succ`
    /// are retargeted. The caller is expected to terminate the new block
    /// (copies plus a jump).
    pub fn split_edge(&mut self, pred: BlockId, succ: BlockId) -> BlockId {
        let new = self.add_block();
        {
            let p = &mut self.blocks[pred.index()];
            let i = p
                .succ_index(succ)
                .unwrap_or_else(|| panic!("no edge {pred} -> {succ}"));
            p.succs[i] = new;
            for insn in &mut p.insns {
                if insn.is_branch() && insn.dst == Operand::Block(succ) {
                    insn.dst = Operand::Block(new);
                }
            }
        }
        {
            let s = &mut self.blocks[succ.index()];
            let j = s
                .pred_index(pred)
                .unwrap_or_else(|| panic!("no edge {pred} -> {succ}"));
            s.preds[j] = new;
        }
        let nb = &mut self.blocks[new.index()];
        nb.preds.push(pred);
        nb.succs.push(succ);
        nb.resolution.push(ResolutionBlock::default());
        new
    }

    /// Move a block's instructions and outgoing edges into a fresh
    /// successor, leaving the original block empty with that successor as
    /// its only edge. Used when a predecessor jumps through memory and the
    /// original block's address must stay meaningful.
    pub fn split_block(&mut self, bb: BlockId) -> BlockId {
        let new = self.add_block();
        let (insns, succs, resolution) = {
            let b = &mut self.blocks[bb.index()];
            (
                std::mem::take(&mut b.insns),
                std::mem::take(&mut b.succs),
                std::mem::take(&mut b.resolution),
            )
        };
        for &s in &succs {
            let sb = &mut self.blocks[s.index()];
            if let Some(j) = sb.pred_index(bb) {
                sb.preds[j] = new;
            }
        }
        {
            let b = &mut self.blocks[bb.index()];
            b.succs.push(new);
            b.resolution.push(ResolutionBlock::default());
        }
        let nb = &mut self.blocks[new.index()];
        nb.insns = insns;
        nb.succs = succs;
        nb.resolution = resolution;
        nb.preds.push(bb);
        new
    }

    /// Whether `bb` sits outside the DFS-reachable flow: an exception
    /// handler or unreachable code. The entry block's dfn is also 0, so it
    /// is excluded explicitly.
    pub fn bb_is_eh(&self, bb: BlockId) -> bool {
        bb != self.entry && self.block(bb).dfn == 0
    }

    /// Immediate dominator of a reachable block.
    pub fn idom(&self, bb: BlockId) -> Option<BlockId> {
        let dfn = self.block(bb).dfn as usize;
        self.doms.get(dfn).copied().flatten()
    }

    /// Append `insn` to `bb`.
    pub fn push_insn(&mut self, bb: BlockId, insn: Insn) {
        self.blocks[bb.index()].insns.push(insn);
    }
}
