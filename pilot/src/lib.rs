//! Plan → execute → replan orchestration for mobile UI automation.
//!
//! A planner turns a goal plus the observed screen into an ordered plan, an
//! executor performs exactly one step per cycle through a tool-using agent,
//! and a replanner re-grounds on the screen after every step to either revise
//! the plan or declare the goal done. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state transitions, budgets,
//!   invariants, screenshot normalization). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, subprocesses, device
//!   capabilities, model backends, prompts, run artifacts).
//!
//! [`agents`] wraps the backends into planner, replanner and executor roles,
//! and [`orchestrator`] drives them through the state machine.

pub mod agents;
pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
