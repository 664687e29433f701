//! Replan and transition budgets for deterministic orchestration.

use crate::core::error::StepCeilingExceeded;

/// Maximum number of replanner decisions, or unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplanBudget {
    max: Option<u32>,
}

impl ReplanBudget {
    pub fn bounded(max: u32) -> Self {
        Self { max: Some(max) }
    }

    pub fn unlimited() -> Self {
        Self { max: None }
    }

    pub fn from_option(max: Option<u32>) -> Self {
        Self { max }
    }

    pub fn max(&self) -> Option<u32> {
        self.max
    }

    /// True once `replan_count` has reached the maximum. The orchestrator must
    /// check this before spending a replanner model call.
    pub fn exhausted(&self, replan_count: u32) -> bool {
        match self.max {
            Some(max) => replan_count >= max,
            None => false,
        }
    }
}

/// Counts phase transitions against a hard ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCeiling {
    ceiling: u32,
    taken: u32,
}

impl TransitionCeiling {
    pub fn new(ceiling: u32) -> Self {
        Self { ceiling, taken: 0 }
    }

    pub fn taken(&self) -> u32 {
        self.taken
    }

    /// Record one transition; errors once the running total exceeds the ceiling.
    pub fn record(&mut self) -> Result<u32, StepCeilingExceeded> {
        self.taken = self.taken.saturating_add(1);
        if self.taken > self.ceiling {
            return Err(StepCeilingExceeded {
                ceiling: self.ceiling,
                transitions: self.taken,
            });
        }
        Ok(self.taken)
    }
}

/// Message used when the replan budget forces termination.
pub fn bounded_termination_message(max: u32, completed_steps: usize) -> String {
    format!(
        "Stopped after reaching the maximum of {max} replans; {completed_steps} steps completed without the goal being confirmed."
    )
}
