//! Runtime - the stages behind each task name.
//!
//! # Pieces
//! - **StageFn**: one async step of work, given a `StageContext`
//! - **TaskExec**: the ordered stages of one task name, and which of them are
//!   still to run for a given task (forward, or backwards while reverting)
//! - **ExecRegistry**: task name -> `TaskExec`, built once at startup
//!
//! Sequencing the stages (claiming, persisting progress, recording errors) is
//! left to the caller; see `tasker-cli` for a minimal driver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Task, TaskError, TaskErrorType};
use crate::error::ExecError;
use crate::ports::Clock;

/// What a stage sees while it runs: the task, with its payload accessors,
/// and the clock used for every timestamp the stage produces.
pub struct StageContext<'a> {
    task: &'a mut Task,
    clock: &'a dyn Clock,
}

impl<'a> StageContext<'a> {
    pub fn new(task: &'a mut Task, clock: &'a dyn Clock) -> Self {
        Self { task, clock }
    }

    pub fn task(&self) -> &Task {
        self.task
    }

    pub fn task_mut(&mut self) -> &mut Task {
        self.task
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start an error for the running task, stamped now.
    pub fn fail(&self, kind: TaskErrorType) -> TaskError {
        self.task.new_error(kind, self.now())
    }

    /// Replace the task's working data.
    ///
    /// A value that cannot be encoded is a bug in the stage, so it comes back
    /// as a `Fail` error rather than being retried.
    pub fn set_data<D: serde::Serialize + ?Sized>(&mut self, data: &D) -> Result<(), TaskError> {
        let now = self.now();
        let encoded = self.task.set_data(data, now).map(|_| ());
        encoded.map_err(|e| self.fail(TaskErrorType::Fail).caused_by(e))
    }
}

/// One step of a task's work.
///
/// Stages run in order; when a task is reverting the same stages run in
/// reverse, so a stage is expected to tell the two apart via
/// `Task::is_reverting`.
#[async_trait]
pub trait StageFn: Send + Sync {
    async fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), TaskError>;
}

#[derive(Clone)]
pub struct Stage {
    name: String,
    func: Arc<dyn StageFn>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), TaskError> {
        self.func.run(ctx).await
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// The ordered stages that implement one task name.
#[derive(Debug, Clone)]
pub struct TaskExec {
    name: String,
    stages: Vec<Stage>,
}

impl TaskExec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, name: impl Into<String>, func: impl StageFn + 'static) -> Self {
        self.stages.push(Stage {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages still to run for `task`, in execution order.
    ///
    /// Going forward this starts at the recorded stage (re-running it). While
    /// reverting it runs from the recorded stage back to the first one. With
    /// no recorded stage, forward runs everything and revert undoes everything.
    pub fn remaining_stages(&self, task: &Task) -> Result<Vec<&Stage>, ExecError> {
        let position = match task.stage() {
            None => None,
            Some(current) => Some(
                self.stages
                    .iter()
                    .position(|stage| stage.name == current)
                    .ok_or_else(|| ExecError::UnknownStage {
                        exec: self.name.clone(),
                        stage: current.to_string(),
                    })?,
            ),
        };

        let stages = match (task.is_reverting(), position) {
            (false, Some(i)) => self.stages[i..].iter().collect(),
            (false, None) => self.stages.iter().collect(),
            (true, Some(i)) => self.stages[..=i].iter().rev().collect(),
            (true, None) => self.stages.iter().rev().collect(),
        };
        Ok(stages)
    }
}

/// Task name -> exec.
///
/// Built during initialization, then shared read-only.
#[derive(Debug, Default)]
pub struct ExecRegistry {
    execs: HashMap<String, Arc<TaskExec>>,
}

impl ExecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, exec: TaskExec) -> Result<(), ExecError> {
        if self.execs.contains_key(exec.name()) {
            return Err(ExecError::AlreadyRegistered(exec.name.clone()));
        }
        self.execs.insert(exec.name.clone(), Arc::new(exec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskExec>> {
        self.execs.get(name)
    }

    pub fn for_task(&self, task: &Task) -> Option<&Arc<TaskExec>> {
        self.get(task.name())
    }

    pub fn len(&self) -> usize {
        self.execs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execs.is_empty()
    }
}
