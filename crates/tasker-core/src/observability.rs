use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Number of tasks in each lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub created: usize,
    pub pending: usize,
    pub running: usize,
    pub waiting: usize,
    pub stuck: usize,
    pub completed: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Created => self.created += 1,
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Waiting => self.waiting += 1,
            TaskState::Stuck => self.stuck += 1,
            TaskState::Completed => self.completed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.pending + self.running + self.waiting + self.stuck + self.completed
    }
}

impl FromIterator<TaskState> for StateCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}
