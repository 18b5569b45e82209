//! SSA middle end for the kiln JIT back end.
//!
//! [`compute_ssa`] takes a freshly selected compilation unit through SSA
//! form and back: dominance analysis, pruned phi placement, renaming, the
//! scalar optimizations (copy propagation, dead code elimination, bounds
//! check removal), then deconstruction into plain LIR with the variable
//! table compacted. The result feeds straight into register allocation; on
//! error the driver can fall back to allocating the unit without SSA.

use log::debug;

use kiln_lir::{CompilationUnit, CompileError};

pub mod abc;
pub mod copyprop;
pub mod dce;
pub mod dominance;
pub mod ssa;

#[cfg(test)]
mod tests;

pub fn compute_ssa(cu: &mut CompilationUnit) -> Result<(), CompileError> {
    debug!("ssa: {} blocks, {} vars", cu.nr_blocks(), cu.nr_vars());
    // Liveness feeds phi pruning and must see the unit before the entry
    // initializers go in.
    kiln_regalloc::liveness::analyze_liveness(cu);
    dominance::analyze_dominance(cu);
    ssa::init_ssa(cu);
    let mut add_ons = ssa::lir_to_ssa(cu)?;
    copyprop::propagate_copies(cu, &mut add_ons);
    dce::eliminate_dead_code(cu, &mut add_ons);
    abc::remove_bounds_checks(cu, &mut add_ons);
    ssa::ssa_to_lir(cu, add_ons)?;
    ssa::compact_var_table(cu);
    ssa::repair_use_before_def(cu);
    cu.compute_positions();
    Ok(())
}
