//! Stable exit codes for pilot CLI commands.

/// The replanner declared the goal satisfied, or a non-run command succeeded.
pub const OK: i32 = 0;
/// Invalid config or arguments, or an unexpected I/O error.
pub const INVALID: i32 = 1;
/// The run was terminated without the goal being confirmed: the replan bound
/// was reached or the replanner failed.
pub const FORCED_TERMINATION: i32 = 2;
/// The run aborted on the step ceiling.
pub const STEP_CEILING: i32 = 3;
/// The planner failed with and without screen grounding.
pub const PLANNING_FAILED: i32 = 4;
/// The run was cancelled (Ctrl-C).
pub const CANCELLED: i32 = 130;
