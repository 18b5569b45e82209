//! Fatal per-method compilation errors.

use thiserror::Error;

/// Errors that abort compilation of a single method.
///
/// Every fallible pass in the back end returns these on its `Result`; the
/// driver reacts by discarding the method (and, for SSA failures, may retry
/// down the non-SSA pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The fixed spill slot pool is exhausted.
    #[error("out of spill slots")]
    OutOfSpillSlots,

    /// A variable was used before any definition reached it during SSA
    /// renaming.
    #[error("variable v{0} not initialized for ssa renaming")]
    UninitializedVar(u32),

    /// The control flow graph violates a structural assumption of a pass.
    #[error("malformed control flow graph: {0}")]
    MalformedCfg(&'static str),

    /// An interval invariant did not hold during allocation or spill
    /// insertion.
    #[error("malformed interval: {0}")]
    MalformedInterval(&'static str),
}
