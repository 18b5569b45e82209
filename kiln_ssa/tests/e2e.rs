//! End-to-end SSA tests: take a unit through SSA form and back and check
//! it still computes the same values, alone and composed with register
//! allocation.

use kiln_lir::eval;
use kiln_lir::{
    CompilationUnit, Insn, MachDesc, MachReg, Opcode, Operand, Reg, VReg, VmType,
};
use kiln_regalloc::run_regalloc;
use kiln_ssa::compute_ssa;

fn desc(nr_gp: u8) -> MachDesc {
    let gp: Vec<MachReg> = (0..nr_gp).map(MachReg).collect();
    MachDesc {
        caller_saved: gp.clone(),
        gp,
        fp: vec![MachReg(8), MachReg(9)],
        ret_gp: MachReg(0),
        ret_gp_high: MachReg(1),
        ret_fp: MachReg(8),
    }
}

fn r(v: VReg) -> Operand {
    Operand::Reg(Reg::Virt(v))
}

/// sum = 1 + 2 + ... + 5 computed in a loop; both `i` and `sum` need phis
/// at the header.
fn loop_sum() -> CompilationUnit {
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

    cu.push_insn(header, Insn::new(Opcode::Cmp, Operand::Imm(6), r(i)));
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

    cu.push_insn(
        exit,
        Insn::new(
            Opcode::MovRegLocal,
            r(sum),
            Operand::MemLocal(cu.frame.local_slot(0)),
        ),
    );
    cu.push_insn(exit, Insn::ret());
    cu
}

fn diamond_select() -> CompilationUnit {
    let mut cu = CompilationUnit::new(1);
    let then_bb = cu.add_block();
    let else_bb = cu.add_block();
    let join = cu.add_block();
    let t = cu.new_var(VmType::Int);
    let x = cu.new_var(VmType::Int);

    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(t)));
    cu.push_insn(entry, Insn::new(Opcode::Cmp, Operand::Imm(0), r(t)));
    cu.push_insn(
        entry,
        Insn::new(Opcode::BrGe, Operand::None, Operand::Block(then_bb)),
    );
    cu.connect(entry, then_bb);
    cu.connect(entry, else_bb);

    cu.push_insn(then_bb, Insn::mov_imm(10, Reg::Virt(x)));
    cu.push_insn(then_bb, Insn::jump(join));
    cu.connect(then_bb, join);

    cu.push_insn(else_bb, Insn::mov_imm(20, Reg::Virt(x)));
    cu.push_insn(else_bb, Insn::jump(join));
    cu.connect(else_bb, join);

    cu.push_insn(
        join,
        Insn::new(
            Opcode::MovRegLocal,
            r(x),
            Operand::MemLocal(cu.frame.local_slot(0)),
        ),
    );
    cu.push_insn(join, Insn::ret());
    cu
}

/// The loop sum again, with two extra loop-invariant addends so four values
/// are live through the loop at once.
fn loop_sum_pressure() -> CompilationUnit {
    let mut cu = CompilationUnit::new(1);
    let header = cu.add_block();
    let body = cu.add_block();
    let exit = cu.add_block();
    let i = cu.new_var(VmType::Int);
    let sum = cu.new_var(VmType::Int);
    let c1 = cu.new_var(VmType::Int);
    let c2 = cu.new_var(VmType::Int);

    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(i)));
    cu.push_insn(entry, Insn::mov_imm(0, Reg::Virt(sum)));
    cu.push_insn(entry, Insn::mov_imm(3, Reg::Virt(c1)));
    cu.push_insn(entry, Insn::mov_imm(7, Reg::Virt(c2)));
    cu.push_insn(entry, Insn::jump(header));
    cu.connect(entry, header);

    cu.push_insn(header, Insn::new(Opcode::Cmp, Operand::Imm(6), r(i)));
    cu.push_insn(
        header,
        Insn::new(Opcode::BrGe, Operand::None, Operand::Block(exit)),
    );
    cu.connect(header, exit);
    cu.connect(header, body);

    cu.push_insn(body, Insn::new(Opcode::Add, r(i), r(sum)));
    cu.push_insn(body, Insn::new(Opcode::Add, r(c1), r(sum)));
    cu.push_insn(body, Insn::new(Opcode::Add, r(c2), r(sum)));
    cu.push_insn(body, Insn::new(Opcode::Add, Operand::Imm(1), r(i)));
    cu.push_insn(body, Insn::jump(header));
    cu.connect(body, header);

    cu.push_insn(
        exit,
        Insn::new(
            Opcode::MovRegLocal,
            r(sum),
            Operand::MemLocal(cu.frame.local_slot(0)),
        ),
    );
    cu.push_insn(exit, Insn::ret());
    cu
}

/// Four values into a two-armed diamond; every one is read again at the
/// join, so they all cross the branch alive.
fn diamond_pressure() -> CompilationUnit {
    let mut cu = CompilationUnit::new(4);
    let then_bb = cu.add_block();
    let else_bb = cu.add_block();
    let join = cu.add_block();
    let a = cu.new_var(VmType::Int);
    let b = cu.new_var(VmType::Int);
    let c = cu.new_var(VmType::Int);
    let d = cu.new_var(VmType::Int);

    let entry = cu.entry;
    cu.push_insn(entry, Insn::mov_imm(1, Reg::Virt(a)));
    cu.push_insn(entry, Insn::mov_imm(2, Reg::Virt(b)));
    cu.push_insn(entry, Insn::mov_imm(3, Reg::Virt(c)));
    cu.push_insn(entry, Insn::mov_imm(4, Reg::Virt(d)));
    cu.push_insn(entry, Insn::new(Opcode::Cmp, Operand::Imm(0), r(a)));
    cu.push_insn(
        entry,
        Insn::new(Opcode::BrGe, Operand::None, Operand::Block(then_bb)),
    );
    cu.connect(entry, then_bb);
    cu.connect(entry, else_bb);

    cu.push_insn(then_bb, Insn::new(Opcode::Add, r(a), r(d)));
    cu.push_insn(then_bb, Insn::jump(join));
    cu.connect(then_bb, join);

    cu.push_insn(else_bb, Insn::new(Opcode::Add, r(b), r(d)));
    cu.push_insn(else_bb, Insn::jump(join));
    cu.connect(else_bb, join);

    for (k, v) in [a, b, c, d].into_iter().enumerate() {
        cu.push_insn(
            join,
            Insn::new(
                Opcode::MovRegLocal,
                r(v),
                Operand::MemLocal(cu.frame.local_slot(k as u32)),
            ),
        );
    }
    cu.push_insn(join, Insn::ret());
    cu
}

/// A return must stay the last instruction of its block; spill insertion
/// clamps to it like it does to branches.
fn assert_returns_terminate(cu: &CompilationUnit) {
    for block in &cu.blocks {
        if let Some(k) = block.insns.iter().position(|i| i.op == Opcode::Ret) {
            assert_eq!(k, block.insns.len() - 1, "instructions after a return");
        }
    }
}

fn no_phis_remain(cu: &CompilationUnit) -> bool {
    cu.blocks
        .iter()
        .all(|b| b.insns.iter().all(|i| i.op != Opcode::Phi))
}

#[test]
fn round_trip_preserves_loop_sum() {
    let reference = eval::run(&loop_sum(), None).unwrap();
    assert_eq!(reference[0], 15);

    let mut cu = loop_sum();
    compute_ssa(&mut cu).unwrap();
    assert!(no_phis_remain(&cu));
    assert_eq!(eval::run(&cu, None).unwrap(), reference);
}

#[test]
fn diamond_phis_become_edge_copies() {
    let reference = eval::run(&diamond_select(), None).unwrap();
    assert_eq!(reference[0], 10);

    let mut cu = diamond_select();
    compute_ssa(&mut cu).unwrap();
    assert!(no_phis_remain(&cu));
    assert!(
        cu.blocks
            .iter()
            .flat_map(|b| &b.insns)
            .any(|i| i.ssa_added && i.op == Opcode::MovRegReg),
        "expected the join's phi to leave copies behind"
    );
    assert_eq!(eval::run(&cu, None).unwrap(), reference);
}

#[test]
fn ssa_then_regalloc_computes_the_same() {
    let reference = eval::run(&loop_sum(), None).unwrap();

    let mut cu = loop_sum();
    compute_ssa(&mut cu).unwrap();
    run_regalloc(&mut cu, &desc(2)).unwrap();
    assert_eq!(eval::run(&cu, None).unwrap(), reference);
}

#[test]
fn ssa_then_regalloc_under_loop_pressure() {
    let reference = eval::run(&loop_sum_pressure(), None).unwrap();
    assert_eq!(reference[0], 65); // sum of i + 10 for i in 1..=5

    let mut cu = loop_sum_pressure();
    compute_ssa(&mut cu).unwrap();
    let intervals = run_regalloc(&mut cu, &desc(2)).unwrap();
    assert!(
        intervals.ids().any(|id| intervals[id].next_child.is_some()),
        "expected register pressure to force splits"
    );
    assert_returns_terminate(&cu);
    assert_eq!(eval::run(&cu, None).unwrap(), reference);
}

#[test]
fn ssa_then_regalloc_under_diamond_pressure() {
    let reference = eval::run(&diamond_pressure(), None).unwrap();
    assert_eq!(reference, vec![1, 2, 3, 5]);

    let mut cu = diamond_pressure();
    compute_ssa(&mut cu).unwrap();
    run_regalloc(&mut cu, &desc(2)).unwrap();
    assert_returns_terminate(&cu);
    assert_eq!(eval::run(&cu, None).unwrap(), reference);
}
