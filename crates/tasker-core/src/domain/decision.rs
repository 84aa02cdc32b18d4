//! Decision model: what happens to a task after a failure is recorded.
//!
//! A `Decider` is a pure function of the task and the error just recorded. The
//! transition itself is applied by `Task::record_error`.

use super::errors::{TaskError, TaskErrorType};
use super::state::{TaskResult, TaskState};
use super::task::Task;

/// The next step for a task after an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Finish the task with the given result.
    Complete(TaskResult),

    /// Back to `Pending` as attempt number `attempt`. When applied, the task
    /// always counts exactly one more attempt from its own `retries`.
    Retry { attempt: u32 },

    /// Switch to rollback direction and back to `Pending`.
    Revert,

    /// Give up; an operator has to look at it.
    Stuck { reason: String },
}

impl Decision {
    /// State the task is in once this decision is applied.
    pub fn target_state(&self) -> TaskState {
        match self {
            Decision::Complete(_) => TaskState::Completed,
            Decision::Retry { .. } | Decision::Revert => TaskState::Pending,
            Decision::Stuck { .. } => TaskState::Stuck,
        }
    }
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &Task, error: &TaskError) -> Decision;
}

/// Applies the error taxonomy as-is:
/// - `Ignored` completes successfully, `Fail` completes with `Failure`
/// - `Retry` retries while `retries < max_retries`, otherwise `Stuck`
/// - `Revert` starts a rollback; a second `Revert` during a rollback is `Stuck`
/// - `Stuck` is `Stuck`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, task: &Task, error: &TaskError) -> Decision {
        match error.kind() {
            TaskErrorType::Ignored => Decision::Complete(TaskResult::Success),
            TaskErrorType::Fail => Decision::Complete(TaskResult::Failure),
            TaskErrorType::Retry if task.retries() < task.max_retries() => Decision::Retry {
                attempt: task.retries() + 1,
            },
            TaskErrorType::Retry => Decision::Stuck {
                reason: format!(
                    "retries exhausted: {}/{}",
                    task.retries(),
                    task.max_retries()
                ),
            },
            TaskErrorType::Revert if task.is_reverting() => Decision::Stuck {
                reason: "revert requested while already reverting".to_string(),
            },
            TaskErrorType::Revert => Decision::Revert,
            TaskErrorType::Stuck => Decision::Stuck {
                reason: error.message().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn task(retries: u32, max_retries: u32) -> Task {
        let mut t = Task::new(TaskId::new("t-1").unwrap(), "deploy", t0())
            .with_max_retries(max_retries);
        t.retries = retries;
        t
    }

    #[rstest]
    #[case::ignored(TaskErrorType::Ignored, Decision::Complete(TaskResult::Success))]
    #[case::fail(TaskErrorType::Fail, Decision::Complete(TaskResult::Failure))]
    #[case::retry(TaskErrorType::Retry, Decision::Retry { attempt: 1 })]
    #[case::revert(TaskErrorType::Revert, Decision::Revert)]
    fn decides_by_error_type(#[case] kind: TaskErrorType, #[case] expected: Decision) {
        let t = task(0, 2);
        let err = t.new_error(kind, t0());
        assert_eq!(DefaultDecider.decide(&t, &err), expected);
    }

    #[test]
    fn retry_at_limit_is_stuck() {
        let t = task(2, 2);
        let err = t.new_error(TaskErrorType::Retry, t0());
        let decision = DefaultDecider.decide(&t, &err);
        assert_eq!(
            decision,
            Decision::Stuck {
                reason: "retries exhausted: 2/2".to_string()
            }
        );
    }

    #[test]
    fn zero_retry_budget_goes_straight_to_stuck() {
        let t = task(0, 0);
        let err = t.new_error(TaskErrorType::Retry, t0());
        assert_eq!(
            DefaultDecider.decide(&t, &err).target_state(),
            TaskState::Stuck
        );
    }

    #[test]
    fn stuck_keeps_error_message_as_reason() {
        let t = task(0, 2);
        let err = t.new_error(TaskErrorType::Stuck, t0()).with_message("manual fix needed");
        assert_eq!(
            DefaultDecider.decide(&t, &err),
            Decision::Stuck {
                reason: "manual fix needed".to_string()
            }
        );
    }

    #[test]
    fn revert_during_rollback_is_stuck() {
        let mut t = task(0, 2);
        t.revert = true;
        let err = t.new_error(TaskErrorType::Revert, t0());
        assert!(matches!(
            DefaultDecider.decide(&t, &err),
            Decision::Stuck { .. }
        ));
    }
}
