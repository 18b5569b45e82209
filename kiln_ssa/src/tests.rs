//! Unit tests for dominance and the SSA passes.

use kiln_lir::{
    BlockId, CompilationUnit, Insn, Opcode, Operand, Reg, VReg, VmType,
};
use kiln_regalloc::liveness;

use crate::{compute_ssa, dominance, ssa};

fn r(v: VReg) -> Operand {
    Operand::Reg(Reg::Virt(v))
}

fn store_local(cu: &CompilationUnit, v: VReg, slot: u32) -> Insn {
    Insn::new(
        Opcode::MovRegLocal,
        r(v),
        Operand::MemLocal(cu.frame.local_slot(slot)),
    )
}

/// entry branches to two arms that both define `x` (used at the join) and
/// `y` (dead after the arms), then meet.
fn diamond() -> (CompilationUnit, BlockId, BlockId, BlockId) {
    let mut cu = CompilationUnit::new(1);
    let then_bb = cu.add_block();
    let else_bb = cu.add_block();
    let join = cu.add_block();
    let x = cu.new_var(VmType::Int);
    let y = cu.new_var(VmType::Int);

    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(x)));
    cu.push_insn(entry, Insn::new(Opcode::Cmp, Operand::Imm(0), r(x)));
    cu.push_insn(
        entry,
        Insn::new(Opcode::BrGe, Operand::None, Operand::Block(then_bb)),
    );
    cu.connect(entry, then_bb);
    cu.connect(entry, else_bb);

    cu.push_insn(then_bb, Insn::mov_imm(10, Reg::Virt(x)));
    cu.push_insn(then_bb, Insn::mov_imm(1, Reg::Virt(y)));
    cu.push_insn(then_bb, Insn::jump(join));
    cu.connect(then_bb, join);

    cu.push_insn(else_bb, Insn::mov_imm(20, Reg::Virt(x)));
    cu.push_insn(else_bb, Insn::mov_imm(2, Reg::Virt(y)));
    cu.push_insn(else_bb, Insn::jump(join));
    cu.connect(else_bb, join);

    let store = store_local(&cu, x, 0);
    cu.push_insn(join, store);
    cu.push_insn(join, Insn::ret());
    (cu, then_bb, else_bb, join)
}

/// entry -> header -> {body, exit}, body -> header.
fn loop_cfg() -> (CompilationUnit, BlockId, BlockId, BlockId) {
    let mut cu = CompilationUnit::new(1);
    let header = cu.add_block();
    let body = cu.add_block();
    let exit = cu.add_block();
    let i = cu.new_var(VmType::Int);
    let sum = cu.new_var(VmType::Int);

    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(i)));
    cu.push_insn(entry, Insn::mov_imm(0, Reg::Virt(sum)));
    cu.push_insn(entry, Insn::jump(header));
    cu.connect(entry, header);

    cu.push_insn(header, Insn::new(Opcode::Cmp, Operand::Imm(4), r(i)));
    cu.push_insn(
        header,
        Insn::new(Opcode::BrGe, Operand::None, Operand::Block(exit)),
    );
    cu.connect(header, exit);
    cu.connect(header, body);

    cu.push_insn(body, Insn::new(Opcode::Add, r(i), r(sum)));
    cu.push_insn(body, Insn::new(Opcode::Add, Operand::Imm(1), r(i)));
    cu.push_insn(body, Insn::jump(header));
    cu.connect(body, header);

    let store = store_local(&cu, sum, 0);
    cu.push_insn(exit, store);
    cu.push_insn(exit, Insn::ret());
    (cu, header, body, exit)
}

fn to_ssa(cu: &mut CompilationUnit) -> ssa::AddOns {
    liveness::analyze_liveness(cu);
    dominance::analyze_dominance(cu);
    ssa::init_ssa(cu);
    ssa::lir_to_ssa(cu).unwrap()
}

#[test]
fn dfs_numbers_reachable_blocks_once() {
    let (mut cu, then_bb, else_bb, join) = diamond();
    let eh = cu.add_block();
    cu.blocks[eh.index()].is_eh = true;
    dominance::compute_dfns(&mut cu);
    assert_eq!(cu.dfs_order.len(), 4);
    assert_eq!(cu.dfs_order[0], cu.entry);
    let mut dfns: Vec<u32> = [then_bb, else_bb, join]
        .iter()
        .map(|b| cu.block(*b).dfn)
        .collect();
    dfns.sort();
    assert_eq!(dfns, vec![1, 2, 3]);
    assert!(cu.bb_is_eh(eh));
    assert!(!cu.bb_is_eh(cu.entry));
}

#[test]
fn diamond_dominators_and_frontiers() {
    let (mut cu, then_bb, else_bb, join) = diamond();
    dominance::analyze_dominance(&mut cu);
    assert_eq!(cu.idom(then_bb), Some(cu.entry));
    assert_eq!(cu.idom(else_bb), Some(cu.entry));
    assert_eq!(cu.idom(join), Some(cu.entry));
    let join_dfn = cu.block(join).dfn as usize;
    assert!(cu.block(then_bb).dom_frontier.get(join_dfn));
    assert!(cu.block(else_bb).dom_frontier.get(join_dfn));
    assert!(!cu.block(cu.entry).dom_frontier.get(join_dfn));
    assert_eq!(cu.block(cu.entry).dom_successors.len(), 3);
}

#[test]
fn loop_header_sits_in_its_own_frontier() {
    let (mut cu, header, body, exit) = loop_cfg();
    dominance::analyze_dominance(&mut cu);
    assert_eq!(cu.idom(header), Some(cu.entry));
    assert_eq!(cu.idom(body), Some(header));
    assert_eq!(cu.idom(exit), Some(header));
    let h_dfn = cu.block(header).dfn as usize;
    assert!(cu.block(body).dom_frontier.get(h_dfn));
    assert!(cu.block(header).dom_frontier.get(h_dfn));
}

#[test]
fn phis_are_pruned_to_live_joins() {
    let (mut cu, _, _, join) = diamond();
    to_ssa(&mut cu);
    // x merges at the join; y is dead there and gets no phi.
    let phis: Vec<&Insn> = cu
        .block(join)
        .insns
        .iter()
        .take_while(|i| i.op == Opcode::Phi)
        .collect();
    assert_eq!(phis.len(), 1);
    assert_eq!(phis[0].phi_srcs.len(), 2);
    assert_ne!(phis[0].phi_srcs[0], phis[0].phi_srcs[1]);
}

#[test]
fn renaming_yields_single_assignment() {
    let (mut cu, ..) = diamond();
    to_ssa(&mut cu);
    let mut defs = vec![0u32; cu.nr_vars()];
    for block in &cu.blocks {
        for insn in &block.insns {
            for v in insn.defs() {
                defs[v.index()] += 1;
            }
        }
    }
    for (i, &n) in defs.iter().enumerate() {
        if !cu.vars[i].is_fixed() {
            assert!(n <= 1, "v{i} defined {n} times");
        }
    }
}

#[test]
fn two_address_reads_become_copies() {
    let mut cu = CompilationUnit::new(1);
    let a = cu.new_var(VmType::Int);
    let b = cu.new_var(VmType::Int);
    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(a)));
    cu.push_insn(entry, Insn::mov_imm(2, Reg::Virt(b)));
    cu.push_insn(entry, Insn::new(Opcode::Add, r(a), r(b)));
    let store = store_local(&cu, b, 0);
    cu.push_insn(entry, store);
    cu.push_insn(entry, Insn::ret());

    let add_ons = to_ssa(&mut cu);
    let add_idx = cu
        .block(cu.entry)
        .insns
        .iter()
        .position(|i| i.op == Opcode::Add)
        .unwrap();
    assert!(add_ons[cu.entry.index()][add_idx].is_some());

    ssa::ssa_to_lir(&mut cu, add_ons).unwrap();
    let insns = &cu.block(cu.entry).insns;
    let add_idx = insns.iter().position(|i| i.op == Opcode::Add).unwrap();
    let mov = &insns[add_idx - 1];
    assert_eq!(mov.op, Opcode::MovRegReg);
    assert!(mov.ssa_added);
    assert_eq!(mov.dst, insns[add_idx].dst);
}

#[test]
fn handler_blocks_rename_without_versions() {
    let mut cu = CompilationUnit::new(1);
    let a = cu.new_var(VmType::Int);
    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(a)));
    let store = store_local(&cu, a, 0);
    cu.push_insn(entry, store);
    cu.push_insn(entry, Insn::ret());

    let handler = cu.add_block();
    cu.blocks[handler.index()].is_eh = true;
    cu.push_insn(handler, Insn::new(Opcode::Add, Operand::Imm(1), r(a)));
    let store = store_local(&cu, a, 0);
    cu.push_insn(handler, store);
    cu.push_insn(handler, Insn::ret());

    to_ssa(&mut cu);
    // Every occurrence of the variable in the handler shares one name.
    let insns = &cu.block(handler).insns;
    let Operand::Reg(Reg::Virt(n1)) = insns[0].dst else {
        panic!("add lost its register operand");
    };
    let Operand::Reg(Reg::Virt(n2)) = insns[1].src else {
        panic!("store lost its register operand");
    };
    assert_eq!(n1, n2);
}

#[test]
fn copy_chains_collapse_and_die() {
    let mut cu = CompilationUnit::new(1);
    let a = cu.new_var(VmType::Int);
    let b = cu.new_var(VmType::Int);
    let c = cu.new_var(VmType::Int);
    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(a)));
    cu.push_insn(entry, Insn::mov_reg(Reg::Virt(a), Reg::Virt(b)));
    cu.push_insn(entry, Insn::mov_reg(Reg::Virt(b), Reg::Virt(c)));
    let store = store_local(&cu, c, 0);
    cu.push_insn(entry, store);
    cu.push_insn(entry, Insn::ret());

    compute_ssa(&mut cu).unwrap();
    // The store reads the chain root; the copies and the unused entry
    // initializers are gone.
    assert_eq!(cu.block(cu.entry).insns.len(), 3);
    assert_eq!(kiln_lir::eval::run(&cu, None).unwrap()[0], 1);
}

#[test]
fn constant_bounds_checks_disappear() {
    let mut cu = CompilationUnit::new(1);
    let i = cu.new_var(VmType::Int);
    let j = cu.new_var(VmType::Int);
    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(5, Reg::Virt(i)));
    cu.push_insn(
        entry,
        Insn::new(Opcode::BoundsCheck, r(i), Operand::Imm(10)),
    );
    cu.push_insn(
        entry,
        Insn::new(
            Opcode::MovLocalReg,
            Operand::MemLocal(cu.frame.local_slot(0)),
            r(j),
        ),
    );
    cu.push_insn(
        entry,
        Insn::new(Opcode::BoundsCheck, r(j), Operand::Imm(10)),
    );
    let store = store_local(&cu, j, 0);
    cu.push_insn(entry, store);
    cu.push_insn(entry, Insn::ret());

    compute_ssa(&mut cu).unwrap();
    // 5 < 10 is decided at compile time; the loaded index is not.
    let checks = cu
        .block(cu.entry)
        .insns
        .iter()
        .filter(|x| x.op == Opcode::BoundsCheck)
        .count();
    assert_eq!(checks, 1);
}

#[test]
fn use_before_def_gets_an_entry_init() {
    let mut cu = CompilationUnit::new(1);
    let v = cu.new_var(VmType::Int);
    let entry = cu.entry;
    let store = store_local(&cu, v, 0);
    cu.push_insn(entry, store);
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(v)));
    cu.push_insn(entry, Insn::ret());

    ssa::repair_use_before_def(&mut cu);
    let first = &cu.block(cu.entry).insns[0];
    assert_eq!(first.op, Opcode::MovImmReg);
    assert_eq!(first.dst, r(v));
}
