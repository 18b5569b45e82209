//! Linear scan register allocation for the kiln JIT back end.
//!
//! The pipeline turns a compilation unit with virtual register operands
//! into one where every register operand is physical and every value that
//! could not stay in a register travels through stack slots:
//!
//! 1. liveness analysis and live interval construction,
//! 2. linear scan with interval splitting,
//! 3. operand rewriting,
//! 4. spill/reload insertion and cross-edge data-flow resolution,
//! 5. caller-saved clobber saves around calls.

use log::debug;

use kiln_lir::{CompileError, CompilationUnit, MachDesc};

pub mod clobber;
pub mod interval;
pub mod linear_scan;
pub mod liveness;
pub mod rewrite;
pub mod spill_reload;

pub use interval::{Interval, IntervalId, Intervals, NO_POS};


/// Run the whole allocation pipeline on `cu`. On success every register
/// operand is a machine register; the returned intervals describe the
/// assignment (tests and emission inspect them).
///
/// Every variable must be defined before its uses along each flow path
/// (the SSA pipeline's use-before-def repair establishes this). Positions
/// are assigned in reverse postorder, so the guarantee holds whatever the
/// block arena order and splitting always finds live values a location.
pub fn run_regalloc(
    cu: &mut CompilationUnit,
    desc: &MachDesc,
) -> Result<Intervals, CompileError> {
    debug!("regalloc: {} blocks, {} vars", cu.nr_blocks(), cu.nr_vars());
    cu.compute_positions();
    let mut intervals = Intervals::for_unit(cu);
    liveness::analyze_liveness(cu);
    liveness::build_intervals(cu, &mut intervals);
    linear_scan::allocate_registers(cu, &mut intervals, desc)?;
    rewrite::rewrite_operands(cu, &intervals)?;
    spill_reload::insert_spill_reload(cu, &mut intervals)?;
    clobber::insert_clobber_saves(cu, desc)?;
    // Spill, reload and clobber insertion grew the instruction lists.
    cu.compute_positions();
    Ok(intervals)
}
