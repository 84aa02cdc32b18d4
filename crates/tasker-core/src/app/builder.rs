//! TaskBuilder - fluent construction and submission of tasks.
//!
//! Collaborators (clock, ID generator, submitter) are injected; nothing here
//! reaches for global state.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TaskDefaults;
use crate::domain::{DEFAULT_MAX_RETRIES, JobId, Payload, Task, TaskId};
use crate::error::{BuildError, PayloadError};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskSubmitter, UlidGenerator};

/// Ties a parameter type to the task name it is submitted under.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Deploy { service: String }
///
/// impl TaskKind for Deploy {
///     const NAME: &'static str = "deploy";
/// }
///
/// let task = TaskBuilder::of(&Deploy { service: "api".into() }).build()?;
/// ```
pub trait TaskKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Builds a `Task` in `Created` and optionally submits it.
///
/// Parameters are encoded when given to `with`; an encode failure is reported
/// by `build`/`submit`.
pub struct TaskBuilder {
    id: Option<TaskId>,
    name: String,
    params: Option<Result<Payload, PayloadError>>,
    parent_id: Option<TaskId>,
    job_id: Option<JobId>,
    stage: Option<String>,
    max_retries: u32,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn IdGenerator>,
    submitter: Option<Arc<dyn TaskSubmitter>>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            params: None,
            parent_id: None,
            job_id: None,
            stage: None,
            max_retries: DEFAULT_MAX_RETRIES,
            clock: Arc::new(SystemClock),
            id_generator: Arc::new(UlidGenerator::new(SystemClock)),
            submitter: None,
        }
    }

    /// Start a task named after the parameter type.
    pub fn of<K: TaskKind>(params: &K) -> Self {
        Self::new(K::NAME).with(params)
    }

    /// Use an explicit, globally unique ID instead of a generated one.
    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        self.params = Some(Payload::encode(params, "params"));
        self
    }

    pub fn parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Stage the first run starts at.
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn defaults(mut self, defaults: &TaskDefaults) -> Self {
        self.max_retries = defaults.max_retries;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn submitter(mut self, submitter: Arc<dyn TaskSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Build the task in `Created`. Fails if the parameters could not be encoded.
    pub fn build(self) -> Result<Task, BuildError> {
        self.into_parts().map(|(task, _)| task)
    }

    /// Build the task and hand it to the submitter, which moves it to `Pending`.
    ///
    /// If the submitter refuses, the built task comes back inside
    /// `BuildError::Submit`.
    pub async fn submit(self) -> Result<Task, BuildError> {
        let (mut task, submitter) = self.into_parts()?;
        let Some(submitter) = submitter else {
            return Err(BuildError::MissingSubmitter(task.id().clone()));
        };

        match submitter.submit_task(&mut task).await {
            Ok(()) => {
                info!(task_id = %task.id(), name = task.name(), state = %task.state(), "task submitted");
                Ok(task)
            }
            Err(source) => {
                warn!(task_id = %task.id(), error = %source, "task submission failed");
                Err(BuildError::Submit {
                    task: Box::new(task),
                    source,
                })
            }
        }
    }

    fn into_parts(self) -> Result<(Task, Option<Arc<dyn TaskSubmitter>>), BuildError> {
        let params = self.params.transpose()?;
        let id = match self.id {
            Some(id) => id,
            None => self.id_generator.generate_task_id(),
        };

        let mut task = Task::new(id, self.name, self.clock.now()).with_max_retries(self.max_retries);
        if let Some(params) = params {
            task = task.with_params(params);
        }
        if let Some(parent_id) = self.parent_id {
            task = task.with_parent(parent_id);
        }
        if let Some(job_id) = self.job_id {
            task = task.with_job(job_id);
        }
        if let Some(stage) = self.stage {
            task = task.with_stage(stage);
        }

        debug!(task_id = %task.id(), name = task.name(), "task built");
        Ok((task, self.submitter))
    }
}
