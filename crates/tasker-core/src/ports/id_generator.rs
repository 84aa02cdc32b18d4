//! IdGenerator port - ID generation for tasks built without an explicit ID.
//!
//! # Implementations
//! - **UlidGenerator**: ULID based, time part taken from a `Clock`

use crate::domain::ids::{JobId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator produces globally unique IDs without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_job_id(&self) -> JobId;
}

/// ULID based generator. 48 bits of timestamp from the clock, 80 random bits.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next_ulid())
    }

    fn generate_job_id(&self) -> JobId {
        JobId::from_ulid(self.next_ulid())
    }
}
