//! Ports - seams to the collaborators outside this crate.
//!
//! The core does not schedule, persist or distribute tasks. It only needs:
//! - a clock for timestamps
//! - an ID generator for tasks built without an ID
//! - a submitter that accepts built tasks

pub mod clock;
pub mod id_generator;
pub mod submitter;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::submitter::TaskSubmitter;
