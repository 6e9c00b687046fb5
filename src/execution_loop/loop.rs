//! Repair Loop
//!
//! Bounded retry policy evaluated after every execution. The executing
//! state itself is the orchestrator's `Execute` stage; this module only
//! decides where to go next.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    /// Regenerate the query with the failure as context
    Retry,
    Done,
}

/// Retry decision for the query-synthesis loop.
///
/// A failed execution is retried while `attempt_count < max_attempts - 1`,
/// so with the default of 3 the loop retries after the first failure and
/// stops after the second. Since `attempt_count` grows by one per failure,
/// generations never exceed `max_attempts` and the loop always ends.
#[derive(Debug, Clone, Copy)]
pub struct RepairController {
    max_attempts: u32,
}

impl RepairController {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Transition taken right after an execution.
    pub fn decide(&self, is_valid: bool, attempt_count: u32) -> RepairState {
        if is_valid {
            return RepairState::Done;
        }
        if attempt_count < self.max_attempts - 1 {
            info!(
                "Repair attempt {} of {}",
                attempt_count + 1,
                self.max_attempts
            );
            RepairState::Retry
        } else {
            warn!(
                "Giving up after {} failed executions",
                attempt_count
            );
            RepairState::Done
        }
    }
}

impl Default for RepairController {
    fn default() -> Self {
        Self::new(3)
    }
}
