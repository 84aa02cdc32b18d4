//! TaskSubmitter port - hands a freshly built task to the scheduling system.
//!
//! # Contract
//! - Called once per built task, with the task in `Created`.
//! - Advances the task to `Pending` (`Task::mark_pending`) when it accepts it.
//! - Must reject (or dedupe) a second submission of the same ID; the builder
//!   does not guarantee exactly-once submission.

use async_trait::async_trait;

use crate::domain::Task;
use crate::error::SubmitError;

#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit_task(&self, task: &mut Task) -> Result<(), SubmitError>;
}
