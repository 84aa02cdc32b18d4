//! InMemoryTaskStore - a process-local submitter and task table.
//!
//! Holds every task it accepted plus a FIFO of the `Pending` ones. Useful for
//! tests and for the demo CLI; nothing survives the process.
//!
//! # Ownership
//! A claimed task belongs to the worker named in its stats. Every mutating
//! call after `claim_next` carries that worker's ID and is refused with
//! `StoreError::NotOwner` once the task moved on (reaped and re-claimed,
//! completed, stuck). Each call is one critical section under the store lock,
//! so a transition, its error append and its `updated_at` bump land together.
//!
//! All timestamps come from the injected `Clock`.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    Decider, Decision, DefaultDecider, Task, TaskError, TaskErrorType, TaskId, TaskState,
};
use crate::error::{StoreError, SubmitError};
use crate::observability::StateCounts;
use crate::ports::{Clock, SystemClock, TaskSubmitter};

#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    pending: VecDeque<TaskId>,
}

impl StoreState {
    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// The task, if `worker_id` currently holds it (Running/Waiting under its
    /// claim).
    fn owned_mut(&mut self, id: &TaskId, worker_id: &str) -> Result<&mut Task, StoreError> {
        let task = self.get_mut(id)?;
        let owner = task.stats().map(|stats| stats.worker_id.as_str());
        if task.state().is_active() && owner == Some(worker_id) {
            return Ok(task);
        }
        warn!(task_id = %id, worker_id, owner = ?owner, state = %task.state(), "rejected call from non-owner");
        Err(StoreError::NotOwner {
            task_id: id.clone(),
            worker_id: worker_id.to_string(),
            owner: owner.map(str::to_string),
        })
    }

    /// Queue the task again if it is back in `Pending`.
    fn requeue_if_pending(&mut self, id: &TaskId) {
        let is_pending = self
            .tasks
            .get(id)
            .is_some_and(|task| task.state() == TaskState::Pending);
        if is_pending && !self.pending.contains(id) {
            self.pending.push_back(id.clone());
        }
    }
}

#[derive(Clone)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    decider: Arc<dyn Decider>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock: Arc::new(SystemClock),
            decider: Arc::new(DefaultDecider),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    /// The clock every stored timestamp is taken from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshot of a stored task.
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(id).cloned()
    }

    /// Hand the oldest pending task to `worker_id` and return a snapshot of it.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Task>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        while let Some(id) = state.pending.pop_front() {
            let task = state.get_mut(&id)?;
            // Entries go stale when a task left Pending some other way.
            if task.state() != TaskState::Pending {
                continue;
            }
            task.claim(worker_id, now, lease)?;
            debug!(task_id = %id, worker_id, "task claimed");
            return Ok(Some(task.clone()));
        }
        Ok(None)
    }

    /// Record a failure on a task `worker_id` holds. A task sent back to
    /// `Pending` is queued again.
    pub async fn record_error(
        &self,
        worker_id: &str,
        error: TaskError,
    ) -> Result<Decision, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = error.task_id().clone();
        let task = state.owned_mut(&id, worker_id)?;
        let decision = task.record_error(error, self.decider.as_ref(), now)?;
        state.requeue_if_pending(&id);
        Ok(decision)
    }

    /// Run `f` against a task `worker_id` holds, under the store lock. `f`
    /// gets the store's current time for the mutations it makes.
    ///
    /// If `f` sends the task back to `Pending` it is queued again.
    pub async fn update<R, E, F>(&self, id: &TaskId, worker_id: &str, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Task, DateTime<Utc>) -> Result<R, E>,
    {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state.owned_mut(id, worker_id)?;
        let result = f(task, now);
        state.requeue_if_pending(id);
        result
    }

    /// Finish a held task successfully.
    pub async fn complete(&self, id: &TaskId, worker_id: &str) -> Result<(), StoreError> {
        self.update(id, worker_id, |task, now| Ok(task.complete(now)?))
            .await
    }

    pub async fn abort(&self, id: &TaskId, worker_id: &str) -> Result<(), StoreError> {
        self.update(id, worker_id, |task, now| Ok(task.abort(now)?))
            .await
    }

    /// Fail every running task whose lease ran out with a `Retry` error, so a
    /// crashed worker does not hold a task forever. The old worker loses
    /// ownership at this point.
    pub async fn reap_expired(&self) -> Vec<(TaskId, Decision)> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let StoreState { tasks, pending } = &mut *state;

        let mut reaped = Vec::new();
        for task in tasks.values_mut().filter(|task| task.is_lease_expired(now)) {
            let worker = task
                .stats()
                .map(|stats| stats.worker_id.clone())
                .unwrap_or_default();
            let error = task
                .new_error(TaskErrorType::Retry, now)
                .with_message(format!("lease expired (worker {worker})"));
            match task.record_error(error, self.decider.as_ref(), now) {
                Ok(decision) => {
                    warn!(task_id = %task.id(), worker_id = %worker, ?decision, "lease expired");
                    if task.state() == TaskState::Pending {
                        pending.push_back(task.id().clone());
                    }
                    reaped.push((task.id().clone(), decision));
                }
                Err(e) => warn!(task_id = %task.id(), error = %e, "failed to reap task"),
            }
        }
        reaped
    }

    /// Tasks per state, across everything ever submitted.
    pub async fn counts_by_state(&self) -> StateCounts {
        let state = self.state.lock().await;
        state.tasks.values().map(Task::state).collect()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TaskSubmitter for InMemoryTaskStore {
    async fn submit_task(&self, task: &mut Task) -> Result<(), SubmitError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(task.id()) {
            warn!(task_id = %task.id(), "duplicate task submission");
            return Err(SubmitError::Duplicate(task.id().clone()));
        }

        task.mark_pending(self.clock.now())?;
        state.tasks.insert(task.id().clone(), task.clone());
        state.pending.push_back(task.id().clone());
        info!(task_id = %task.id(), name = task.name(), "task accepted");
        Ok(())
    }
}
