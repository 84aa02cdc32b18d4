//! Task failure taxonomy and the per-failure record kept in a task's history.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use super::ids::TaskId;

/// Severity/category of a task failure. Decides the next transition:
///
/// | Type      | Transition                                              |
/// |-----------|---------------------------------------------------------|
/// | `Ignored` | none, treated as success                                |
/// | `Fail`    | Completed with `Failure`                                |
/// | `Retry`   | Pending (retries + 1), or Stuck once retries run out    |
/// | `Revert`  | rollback direction, re-enter Pending                    |
/// | `Stuck`   | Stuck                                                   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorType {
    Ignored,
    Fail,
    Retry,
    Revert,
    Stuck,
}

impl TaskErrorType {
    /// Numeric code used in the diagnostic rendering.
    pub fn code(self) -> u8 {
        match self {
            TaskErrorType::Ignored => 0,
            TaskErrorType::Fail => 1,
            TaskErrorType::Retry => 2,
            TaskErrorType::Revert => 3,
            TaskErrorType::Stuck => 4,
        }
    }
}

impl fmt::Display for TaskErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorType::Ignored => "ignored",
            TaskErrorType::Fail => "fail",
            TaskErrorType::Retry => "retry",
            TaskErrorType::Revert => "revert",
            TaskErrorType::Stuck => "stuck",
        };
        f.write_str(s)
    }
}

/// The underlying error a `TaskError` wraps.
///
/// Shared rather than boxed so a recorded `TaskError` stays `Clone`. When a
/// task is persisted only the rendered message survives; on load it comes back
/// as a `RecordedCause`.
#[derive(Clone)]
pub struct ErrorCause(Arc<dyn StdError + Send + Sync>);

impl ErrorCause {
    pub fn new(err: impl StdError + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }

    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for ErrorCause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorCause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let message = String::deserialize(deserializer)?;
        Ok(Self::new(RecordedCause(message)))
    }
}

/// A cause restored from a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RecordedCause(pub String);

/// One failure event of a task.
///
/// Built with the `with_*` / `caused_by` chain before being recorded on the
/// task; once in `Task::errors()` it is never changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskError {
    task_id: TaskId,
    #[serde(rename = "type")]
    kind: TaskErrorType,
    #[serde(default)]
    message: String,
    /// Base64 in the persisted record.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_output")]
    output: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cause: Option<ErrorCause>,
    happened_at: DateTime<Utc>,
}

mod base64_output {
    use super::*;

    pub fn serialize<S: Serializer>(output: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match output {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl TaskError {
    pub fn new(task_id: TaskId, kind: TaskErrorType, happened_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            kind,
            message: String::new(),
            output: None,
            cause: None,
            happened_at,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach arbitrary diagnostic output (e.g. captured stderr).
    pub fn with_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn caused_by(mut self, err: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(ErrorCause::new(err));
        self
    }

    /// Override the timestamp given at construction.
    pub fn at(mut self, happened_at: DateTime<Utc>) -> Self {
        self.happened_at = happened_at;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn kind(&self) -> TaskErrorType {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    pub fn happened_at(&self) -> DateTime<Utc> {
        self.happened_at
    }
}

/// `Task[<id>]: <type code>: <message> @<RFC3339>`, then an optional
/// `Caused by:` line and an optional `Output:` block, in that order.
impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task[{}]: {}: {} @{}",
            self.task_id,
            self.kind.code(),
            self.message,
            self.happened_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        if let Some(cause) = &self.cause {
            write!(f, "\nCaused by: {cause}")?;
        }
        if let Some(output) = &self.output {
            write!(f, "\nOutput:\n{}", String::from_utf8_lossy(output))?;
        }
        Ok(())
    }
}

impl StdError for TaskError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.inner() as &(dyn StdError + 'static))
    }
}

// Causes are compared by their rendered message; that is all a persisted
// record keeps of them.
impl PartialEq for TaskError {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
            && self.kind == other.kind
            && self.message == other.message
            && self.output == other.output
            && self.happened_at == other.happened_at
            && self.cause.as_ref().map(ToString::to_string)
                == other.cause.as_ref().map(ToString::to_string)
    }
}
