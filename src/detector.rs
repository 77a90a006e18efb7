//! Transition detection.

use serde::{Deserialize, Serialize};

use crate::task::{ObservedState, TaskState};

/// An observed change of task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Last dispatched state; `None` on the first observation.
    pub previous: Option<TaskState>,
    /// Newly observed state.
    pub current: TaskState,
}

impl TransitionRecord {
    /// True when this transition ends a monitor run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }
}

/// Decide whether `current` is a transition away from `previous`.
///
/// Returns `None` when nothing new was learned: the state is unchanged or is
/// not one the monitor knows about. The first known observation is always a
/// transition.
#[must_use]
pub fn detect(previous: Option<TaskState>, current: &ObservedState) -> Option<TransitionRecord> {
    let current = current.known()?;
    if previous == Some(current) {
        return None;
    }
    Some(TransitionRecord { previous, current })
}
