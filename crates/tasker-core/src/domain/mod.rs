//! Domain model: identifiers, lifecycle states, the failure taxonomy, the task
//! record and its transitions.

pub mod decision;
pub mod errors;
pub mod ids;
mod lifecycle;
pub mod state;
pub mod task;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorCause, RecordedCause, TaskError, TaskErrorType};
pub use ids::{Id, IdMarker, JobId, TaskId};
pub use state::{TaskResult, TaskState};
pub use task::{DEFAULT_MAX_RETRIES, Payload, Task, TaskStats};
