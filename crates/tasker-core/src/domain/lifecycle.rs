//! Lifecycle transitions of a `Task`.
//!
//! Each operation checks the source state first and leaves the task untouched
//! when the move is not allowed. A successful transition sets `updated_at`.
//! `record_error` appends to the history before deciding, so an error is in
//! `errors()` before any state change it causes.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::decision::{Decider, Decision};
use super::errors::TaskError;
use super::state::{TaskResult, TaskState};
use super::task::{Task, TaskStats};
use crate::error::TransitionError;

impl Task {
    fn guard(&self, allowed: &[TaskState], to: TaskState) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) && self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                task_id: self.id.clone(),
                from: self.state,
                to,
            })
        }
    }

    fn enter(&mut self, to: TaskState, now: DateTime<Utc>) {
        debug!(task_id = %self.id, from = %self.state, to = %to, "task transition");
        self.state = to;
        self.touch(now);
    }

    /// Created -> Pending. Called by the submitter once the task is accepted.
    pub fn mark_pending(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.guard(&[TaskState::Created], TaskState::Pending)?;
        self.enter(TaskState::Pending, now);
        Ok(())
    }

    /// Pending -> Running. Assigns the worker and the lease deadline
    /// (saturating at the far future for oversized leases).
    pub fn claim(
        &mut self,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<(), TransitionError> {
        self.guard(&[TaskState::Pending], TaskState::Running)?;
        self.stats = Some(TaskStats {
            worker_id: worker_id.into(),
            scheduled_at: now,
            expire_at: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        self.enter(TaskState::Running, now);
        Ok(())
    }

    /// Running -> Waiting, after spawning sub-tasks to block on.
    pub fn wait_for_children(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.guard(&[TaskState::Running], TaskState::Waiting)?;
        self.enter(TaskState::Waiting, now);
        Ok(())
    }

    /// Waiting -> Running, once every blocking sub-task completed.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.guard(&[TaskState::Waiting], TaskState::Running)?;
        self.enter(TaskState::Running, now);
        Ok(())
    }

    /// Running/Waiting -> Completed with `Success`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.finish(TaskResult::Success, now)
    }

    /// Running/Waiting -> Completed with `Aborted` (external cancellation).
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.finish(TaskResult::Aborted, now)
    }

    fn finish(&mut self, result: TaskResult, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.guard(
            &[TaskState::Running, TaskState::Waiting],
            TaskState::Completed,
        )?;
        self.result = Some(result);
        self.enter(TaskState::Completed, now);
        info!(task_id = %self.id, result = %result, "task completed");
        Ok(())
    }

    /// Record a failure and apply the decider's verdict.
    ///
    /// Only tasks held by a worker (Running/Waiting) accept errors, and only
    /// errors raised for this task. Returns the decision that was applied.
    /// A `Retry` always counts one more attempt, whatever `attempt` the decider
    /// asked for, and becomes `Stuck` once `max_retries` is used up.
    pub fn record_error(
        &mut self,
        error: TaskError,
        decider: &dyn Decider,
        now: DateTime<Utc>,
    ) -> Result<Decision, TransitionError> {
        if error.task_id() != &self.id {
            return Err(TransitionError::ForeignError {
                task_id: self.id.clone(),
                error_task_id: error.task_id().clone(),
            });
        }
        if !self.state.is_active() {
            return Err(TransitionError::NotActive {
                task_id: self.id.clone(),
                state: self.state,
            });
        }

        let index = self.errors.len();
        self.errors.push(error);
        let decision = decider.decide(self, &self.errors[index]);
        Ok(self.apply(decision, now))
    }

    fn apply(&mut self, decision: Decision, now: DateTime<Utc>) -> Decision {
        let decision = match decision {
            Decision::Retry { .. } if self.retries >= self.max_retries => Decision::Stuck {
                reason: format!("retries exhausted: {}/{}", self.retries, self.max_retries),
            },
            Decision::Retry { .. } => Decision::Retry {
                attempt: self.retries + 1,
            },
            other => other,
        };

        match &decision {
            Decision::Complete(result) => {
                self.result = Some(*result);
                info!(task_id = %self.id, result = %result, "task completed");
            }
            Decision::Retry { attempt } => {
                self.retries = *attempt;
                debug!(
                    task_id = %self.id,
                    retries = self.retries,
                    max_retries = self.max_retries,
                    "task scheduled for retry"
                );
            }
            Decision::Revert => {
                self.revert = true;
                info!(task_id = %self.id, stage = ?self.stage, "task reverting");
            }
            Decision::Stuck { reason } => {
                warn!(task_id = %self.id, reason = %reason, "task stuck");
            }
        }
        self.enter(decision.target_state(), now);
        decision
    }

    /// Has the worker's lease run out? Only meaningful while Running.
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Running
            && self.stats.as_ref().is_some_and(|stats| stats.expire_at <= now)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Stuck tasks need an operator; they are not failed-and-handled.
    pub fn is_stuck(&self) -> bool {
        self.state == TaskState::Stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultDecider, TaskErrorType, TaskId};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn running_task(max_retries: u32) -> Task {
        let mut task = Task::new(TaskId::new("deploy-1").unwrap(), "deploy", t0())
            .with_max_retries(max_retries);
        task.mark_pending(t0()).unwrap();
        task.claim("w-1", t0(), Duration::minutes(5)).unwrap();
        task
    }

    /// Pending again after a retry: claim it back so the next error can land.
    fn reclaim(task: &mut Task, now: DateTime<Utc>) {
        task.claim("w-2", now, Duration::minutes(5)).unwrap();
    }

    #[test]
    fn happy_path() {
        let mut task = Task::new(TaskId::new("t").unwrap(), "deploy", t0());
        task.mark_pending(t0()).unwrap();
        assert!(task.stats().is_none());

        let t1 = t0() + Duration::seconds(1);
        task.claim("w-1", t1, Duration::seconds(30)).unwrap();
        let stats = task.stats().unwrap();
        assert_eq!(stats.worker_id, "w-1");
        assert_eq!(stats.scheduled_at, t1);
        assert_eq!(stats.expire_at, t1 + Duration::seconds(30));

        task.wait_for_children(t1).unwrap();
        task.resume(t1).unwrap();

        let t2 = t0() + Duration::seconds(2);
        task.complete(t2).unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.result(), Some(TaskResult::Success));
        assert_eq!(task.updated_at(), t2);
    }

    #[test]
    fn illegal_transition_leaves_task_untouched() {
        let mut task = Task::new(TaskId::new("t").unwrap(), "deploy", t0());
        let before = task.clone();

        let err = task.claim("w-1", t0(), Duration::minutes(1)).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                task_id: task.id().clone(),
                from: TaskState::Created,
                to: TaskState::Running,
            }
        );
        assert_eq!(task, before);
        assert!(task.complete(t0()).is_err());
        assert!(task.resume(t0()).is_err());
    }

    #[test]
    fn mark_pending_only_from_created() {
        let mut task = running_task(1);
        assert!(task.mark_pending(t0()).is_err());
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn deploy_scenario_two_retries_then_stuck() {
        let mut task = running_task(2);

        let t1 = t0() + Duration::seconds(10);
        let err = task.new_error(TaskErrorType::Retry, t0()).with_message("timeout");
        let decision = task.record_error(err, &DefaultDecider, t1).unwrap();
        assert_eq!(decision, Decision::Retry { attempt: 1 });
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.retries(), 1);
        assert_eq!(task.updated_at(), t1);

        reclaim(&mut task, t1);
        let err = task.new_error(TaskErrorType::Retry, t0()).with_message("timeout");
        task.record_error(err, &DefaultDecider, t1).unwrap();
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.retries(), 2);

        reclaim(&mut task, t1);
        let err = task.new_error(TaskErrorType::Retry, t0()).with_message("timeout");
        let decision = task.record_error(err, &DefaultDecider, t1).unwrap();
        assert!(matches!(decision, Decision::Stuck { .. }));
        assert_eq!(task.state(), TaskState::Stuck);
        assert!(task.is_stuck());
        assert_eq!(task.retries(), 2);
        assert_eq!(task.result(), None);
        assert_eq!(task.errors().len(), 3);
    }

    #[test]
    fn stuck_is_terminal() {
        let mut task = running_task(0);
        let err = task.new_error(TaskErrorType::Stuck, t0());
        task.record_error(err, &DefaultDecider, t0()).unwrap();

        assert!(task.is_terminal());
        assert!(task.claim("w-1", t0(), Duration::minutes(1)).is_err());
        let late = task.new_error(TaskErrorType::Retry, t0());
        assert!(matches!(
            task.record_error(late, &DefaultDecider, t0()),
            Err(TransitionError::NotActive { .. })
        ));
        assert_eq!(task.errors().len(), 1);
    }

    #[test]
    fn revert_keeps_stage_and_retries() {
        let mut task = running_task(3);
        let err = task.new_error(TaskErrorType::Retry, t0());
        task.record_error(err, &DefaultDecider, t0()).unwrap();
        reclaim(&mut task, t0());
        task.set_stage("migrate", t0());

        let err = task.new_error(TaskErrorType::Revert, t0()).with_message("schema mismatch");
        let decision = task.record_error(err, &DefaultDecider, t0()).unwrap();

        assert_eq!(decision, Decision::Revert);
        assert!(task.is_reverting());
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.stage(), Some("migrate"));
        assert_eq!(task.retries(), 1);
    }

    #[test]
    fn retry_during_rollback_stays_in_rollback() {
        let mut task = running_task(3);
        let err = task.new_error(TaskErrorType::Revert, t0());
        task.record_error(err, &DefaultDecider, t0()).unwrap();
        reclaim(&mut task, t0());

        let err = task.new_error(TaskErrorType::Retry, t0());
        task.record_error(err, &DefaultDecider, t0()).unwrap();
        assert!(task.is_reverting());
        assert_eq!(task.retries(), 1);
    }

    #[test]
    fn fail_and_ignored_complete() {
        let mut failed = running_task(3);
        let err = failed.new_error(TaskErrorType::Fail, t0());
        failed.record_error(err, &DefaultDecider, t0()).unwrap();
        assert_eq!(failed.result(), Some(TaskResult::Failure));
        assert!(!failed.is_stuck());

        let mut ignored = running_task(3);
        ignored.wait_for_children(t0()).unwrap();
        let err = ignored.new_error(TaskErrorType::Ignored, t0());
        ignored.record_error(err, &DefaultDecider, t0()).unwrap();
        assert_eq!(ignored.result(), Some(TaskResult::Success));
    }

    #[test]
    fn abort_completes_with_aborted() {
        let mut task = running_task(1);
        task.wait_for_children(t0()).unwrap();
        task.abort(t0()).unwrap();
        assert_eq!(task.result(), Some(TaskResult::Aborted));
    }

    #[test]
    fn foreign_error_is_rejected() {
        let mut task = running_task(1);
        let other = TaskError::new(TaskId::new("other").unwrap(), TaskErrorType::Fail, t0());
        let err = task.record_error(other, &DefaultDecider, t0()).unwrap_err();
        assert!(matches!(err, TransitionError::ForeignError { .. }));
        assert!(task.errors().is_empty());
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn errors_are_append_only() {
        let mut task = running_task(5);
        let mut seen: Vec<TaskError> = Vec::new();

        for i in 0..4 {
            let err = task
                .new_error(TaskErrorType::Retry, t0())
                .with_message(format!("attempt {i}"));
            task.record_error(err, &DefaultDecider, t0()).unwrap();
            reclaim(&mut task, t0());

            assert_eq!(task.errors().len(), seen.len() + 1);
            assert_eq!(&task.errors()[..seen.len()], seen.as_slice());
            seen = task.errors().to_vec();
        }
    }

    #[test]
    fn retries_never_exceed_max_even_with_a_generous_decider() {
        struct AlwaysRetry;
        impl Decider for AlwaysRetry {
            fn decide(&self, task: &Task, _error: &TaskError) -> Decision {
                Decision::Retry {
                    attempt: task.retries() + 1,
                }
            }
        }

        let mut task = running_task(1);
        let err = task.new_error(TaskErrorType::Retry, t0());
        task.record_error(err, &AlwaysRetry, t0()).unwrap();
        reclaim(&mut task, t0());

        let err = task.new_error(TaskErrorType::Retry, t0());
        let decision = task.record_error(err, &AlwaysRetry, t0()).unwrap();
        assert!(matches!(decision, Decision::Stuck { .. }));
        assert_eq!(task.retries(), 1);
        assert!(task.retries() <= task.max_retries());
    }

    #[test]
    fn retry_always_counts_an_attempt() {
        struct RetryWithoutCounting;
        impl Decider for RetryWithoutCounting {
            fn decide(&self, task: &Task, _error: &TaskError) -> Decision {
                Decision::Retry {
                    attempt: task.retries(),
                }
            }
        }

        let mut task = running_task(2);
        for _ in 0..10 {
            if task.state() != TaskState::Running {
                break;
            }
            let err = task.new_error(TaskErrorType::Retry, t0());
            task.record_error(err, &RetryWithoutCounting, t0()).unwrap();
            if task.state() == TaskState::Pending {
                reclaim(&mut task, t0());
            }
        }

        assert!(task.is_stuck());
        assert_eq!(task.retries(), 2);
        assert_eq!(task.errors().len(), 3);
    }

    #[test]
    fn decider_cannot_lower_retries() {
        struct RetryFromZero;
        impl Decider for RetryFromZero {
            fn decide(&self, _task: &Task, _error: &TaskError) -> Decision {
                Decision::Retry { attempt: 0 }
            }
        }

        let mut task = running_task(5);
        for expected in 1..=3 {
            let err = task.new_error(TaskErrorType::Retry, t0());
            let decision = task.record_error(err, &RetryFromZero, t0()).unwrap();
            assert_eq!(decision, Decision::Retry { attempt: expected });
            assert_eq!(task.retries(), expected);
            reclaim(&mut task, t0());
        }
    }

    #[test]
    fn updated_at_is_monotonic_across_transitions() {
        let mut task = running_task(1);
        let later = t0() + Duration::minutes(3);
        task.set_stage("rollout", later);
        task.complete(t0() + Duration::minutes(1)).unwrap();
        assert_eq!(task.updated_at(), later);
    }

    #[test]
    fn lease_expiry() {
        let task = running_task(1);
        assert!(!task.is_lease_expired(t0() + Duration::minutes(4)));
        assert!(task.is_lease_expired(t0() + Duration::minutes(5)));

        let pending = Task::new(TaskId::new("p").unwrap(), "deploy", t0());
        assert!(!pending.is_lease_expired(t0() + Duration::days(1)));
    }
}
