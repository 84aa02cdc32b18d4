//! App - building tasks and describing how they run.
//!
//! - **TaskBuilder**: fluent construction, ID generation and submission
//! - **TaskExec / ExecRegistry**: the ordered stages behind each task name

pub mod builder;
pub mod runtime;

pub use self::builder::{TaskBuilder, TaskKind};
pub use self::runtime::{ExecRegistry, Stage, StageContext, StageFn, TaskExec};
