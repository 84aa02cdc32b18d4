use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{Task, TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
}

/// Failure of a payload accessor. `Encode` is fatal to the operation that
/// attempted it; `Decode` means the stored bytes do not fit the requested shape.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {field}: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task {task_id}: cannot move from {from} to {to}")]
    Invalid {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {task_id} is {state}; errors are only recorded while running or waiting")]
    NotActive { task_id: TaskId, state: TaskState },

    #[error("task {task_id}: error belongs to task {error_task_id}")]
    ForeignError {
        task_id: TaskId,
        error_task_id: TaskId,
    },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("task {0} was already submitted")]
    Duplicate(TaskId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("submitter rejected task: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("no submitter configured for task {0}")]
    MissingSubmitter(TaskId),

    /// The task was built but the submitter refused it. The built task is
    /// handed back so the caller still owns it.
    #[error("failed to submit task {}: {source}", task.id())]
    Submit {
        task: Box<Task>,
        #[source]
        source: SubmitError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The caller does not (or no longer) hold the task.
    #[error("task {task_id} is not held by worker {worker_id} (owner: {})", owner.as_deref().unwrap_or("none"))]
    NotOwner {
        task_id: TaskId,
        worker_id: String,
        owner: Option<String>,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("task exec '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("task exec '{exec}' has no stage named '{stage}'")]
    UnknownStage { exec: String, stage: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
