//! Task lifecycle phases and terminal outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a task.
///
/// State transitions:
/// - Created -> Pending (setup complete, submitted)
/// - Pending -> Running (claimed by a worker)
/// - Running <-> Waiting (blocked on sub-tasks / sub-tasks done)
/// - Running/Waiting -> Pending (retry, or rollback re-entry)
/// - Running/Waiting -> Completed (success, failure or abort)
/// - Running/Waiting -> Stuck (needs an operator)
///
/// `Stuck` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but not yet eligible for execution.
    Created,

    /// Eligible, waiting for a worker.
    Pending,

    /// Claimed and executing.
    Running,

    /// Suspended until the sub-tasks it spawned complete.
    Waiting,

    /// Neither retry nor rollback is possible; requires manual intervention.
    Stuck,

    /// Finished. See `TaskResult` for how.
    Completed,
}

impl TaskState {
    /// Is this a terminal state (no further automatic transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Stuck | TaskState::Completed)
    }

    /// Is the task held by a worker (errors can be recorded against it)?
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Waiting)
    }

    pub fn can_transition_to(self, to: TaskState) -> bool {
        self.allowed_next_states().contains(&to)
    }

    pub fn allowed_next_states(self) -> &'static [TaskState] {
        match self {
            TaskState::Created => &[TaskState::Pending],
            TaskState::Pending => &[TaskState::Running],
            TaskState::Running => &[
                TaskState::Waiting,
                TaskState::Pending,
                TaskState::Stuck,
                TaskState::Completed,
            ],
            TaskState::Waiting => &[
                TaskState::Running,
                TaskState::Pending,
                TaskState::Stuck,
                TaskState::Completed,
            ],
            TaskState::Stuck | TaskState::Completed => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Waiting => "waiting",
            TaskState::Stuck => "stuck",
            TaskState::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a completed task ended. Only meaningful when the state is `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Success,
    /// Handled, unrecoverable failure (normal termination).
    Failure,
    /// Cancelled from outside.
    Aborted,
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskResult::Success => "success",
            TaskResult::Failure => "failure",
            TaskResult::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
