//! The task record: identity, linkage, encoded payloads, lifecycle fields,
//! failure history and runtime stats.
//!
//! Lifecycle transitions live in `lifecycle.rs`; this file holds the shape of
//! the record and its payload accessors.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::{TaskError, TaskErrorType};
use super::ids::{JobId, TaskId};
use super::state::{TaskResult, TaskState};
use crate::error::PayloadError;

/// Retry budget for tasks that do not set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// An opaque encoded payload (JSON text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    pub fn encode<T: Serialize + ?Sized>(
        value: &T,
        field: &'static str,
    ) -> Result<Self, PayloadError> {
        serde_json::to_string(value)
            .map(Payload)
            .map_err(|source| PayloadError::Encode { field, source })
    }

    pub fn decode<T: DeserializeOwned>(&self, field: &'static str) -> Result<T, PayloadError> {
        serde_json::from_str(&self.0).map_err(|source| PayloadError::Decode { field, source })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Runtime information, present once the task has been scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskStats {
    /// Worker the task is assigned to.
    pub worker_id: String,
    pub scheduled_at: DateTime<Utc>,
    /// After this the assignment is considered stale.
    pub expire_at: DateTime<Utc>,
}

/// A unit of schedulable work.
///
/// `parent_id` and `job_id` are references by ID only; the parent or job record
/// is never assumed to be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub(super) id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) parent_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) job_id: Option<JobId>,
    pub(super) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) params: Option<Payload>,
    pub(super) state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) result: Option<TaskResult>,
    #[serde(default)]
    pub(super) revert: bool,
    #[serde(default)]
    pub(super) retries: u32,
    pub(super) max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) output: Option<Payload>,
    #[serde(default)]
    pub(super) errors: Vec<TaskError>,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) stats: Option<TaskStats>,
}

impl Task {
    /// A fresh task in `Created`, with no payloads, errors or stats.
    pub fn new(id: TaskId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            parent_id: None,
            job_id: None,
            name: name.into(),
            params: None,
            state: TaskState::Created,
            result: None,
            revert: false,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            stage: None,
            data: None,
            output: None,
            errors: Vec::new(),
            created_at,
            updated_at: created_at,
            stats: None,
        }
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_params(mut self, params: Payload) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&TaskId> {
        self.parent_id.as_ref()
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The outcome, only once the task is `Completed`.
    pub fn result(&self) -> Option<TaskResult> {
        match self.state {
            TaskState::Completed => self.result,
            _ => None,
        }
    }

    /// Is execution proceeding in rollback direction?
    pub fn is_reverting(&self) -> bool {
        self.revert
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Stage to resume at.
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    /// Failure history, oldest first.
    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.errors.last()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn stats(&self) -> Option<&TaskStats> {
        self.stats.as_ref()
    }

    pub fn raw_params(&self) -> Option<&Payload> {
        self.params.as_ref()
    }

    pub fn raw_data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    pub fn raw_output(&self) -> Option<&Payload> {
        self.output.as_ref()
    }

    /// Decode the parameters. `Ok(None)` when none were given.
    pub fn params<P: DeserializeOwned>(&self) -> Result<Option<P>, PayloadError> {
        self.params.as_ref().map(|p| p.decode("params")).transpose()
    }

    /// Decode the parameters into `target`; leaves it untouched when unset.
    pub fn get_params<P: DeserializeOwned>(&self, target: &mut P) -> Result<(), PayloadError> {
        if let Some(value) = self.params()? {
            *target = value;
        }
        Ok(())
    }

    pub fn data<D: DeserializeOwned>(&self) -> Result<Option<D>, PayloadError> {
        self.data.as_ref().map(|p| p.decode("data")).transpose()
    }

    pub fn get_data<D: DeserializeOwned>(&self, target: &mut D) -> Result<(), PayloadError> {
        if let Some(value) = self.data()? {
            *target = value;
        }
        Ok(())
    }

    /// Replace the working data. On encode failure the old data is kept.
    pub fn set_data<D: Serialize + ?Sized>(
        &mut self,
        data: &D,
        now: DateTime<Utc>,
    ) -> Result<&mut Self, PayloadError> {
        self.data = Some(Payload::encode(data, "data")?);
        self.touch(now);
        Ok(self)
    }

    pub fn output<O: DeserializeOwned>(&self) -> Result<Option<O>, PayloadError> {
        self.output.as_ref().map(|p| p.decode("output")).transpose()
    }

    pub fn get_output<O: DeserializeOwned>(&self, target: &mut O) -> Result<(), PayloadError> {
        if let Some(value) = self.output()? {
            *target = value;
        }
        Ok(())
    }

    pub fn set_output<O: Serialize + ?Sized>(
        &mut self,
        output: &O,
        now: DateTime<Utc>,
    ) -> Result<&mut Self, PayloadError> {
        self.output = Some(Payload::encode(output, "output")?);
        self.touch(now);
        Ok(self)
    }

    /// Record the stage to resume at.
    pub fn set_stage(&mut self, stage: impl Into<String>, now: DateTime<Utc>) -> &mut Self {
        self.stage = Some(stage.into());
        self.touch(now);
        self
    }

    /// Start a `TaskError` for this task, happening at `now`.
    pub fn new_error(&self, kind: TaskErrorType, now: DateTime<Utc>) -> TaskError {
        TaskError::new(self.id.clone(), kind, now)
    }

    /// Stamp a mutation. `updated_at` is monotonic: an earlier `now` leaves it
    /// where it is.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Progress {
        step: u32,
        notes: Vec<String>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn task() -> Task {
        Task::new(TaskId::new("t-1").unwrap(), "deploy", t0())
    }

    #[test]
    fn new_task_is_created_without_stats() {
        let t = task();
        assert_eq!(t.state(), TaskState::Created);
        assert_eq!(t.result(), None);
        assert!(t.stats().is_none());
        assert!(t.errors().is_empty());
        assert_eq!(t.retries(), 0);
        assert_eq!(t.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(t.created_at(), t.updated_at());
    }

    #[test]
    fn data_roundtrip() {
        let mut t = task();
        let progress = Progress {
            step: 3,
            notes: vec!["copied".into(), "verified".into()],
        };
        t.set_data(&progress, t0()).unwrap();

        let mut back = Progress {
            step: 0,
            notes: vec![],
        };
        t.get_data(&mut back).unwrap();
        assert_eq!(back, progress);
    }

    #[test]
    fn output_roundtrip() {
        let mut t = task();
        let mut out = BTreeMap::new();
        out.insert("url".to_string(), "https://example.test".to_string());
        t.set_output(&out, t0()).unwrap();

        let back: Option<BTreeMap<String, String>> = t.output().unwrap();
        assert_eq!(back, Some(out));
    }

    #[test]
    fn unset_payloads_leave_target_untouched() {
        let t = task();
        let original = Progress {
            step: 7,
            notes: vec!["keep".into()],
        };

        let mut target = original.clone();
        t.get_params(&mut target).unwrap();
        assert_eq!(target, original);
        t.get_data(&mut target).unwrap();
        assert_eq!(target, original);
        t.get_output(&mut target).unwrap();
        assert_eq!(target, original);
    }

    #[test]
    fn decode_into_wrong_shape_fails() {
        let t = task().with_params(Payload::encode(&"just a string", "params").unwrap());
        let mut target = Progress {
            step: 1,
            notes: vec![],
        };
        let err = t.get_params(&mut target).unwrap_err();
        assert!(matches!(err, PayloadError::Decode { field: "params", .. }));
        assert_eq!(target.step, 1);
    }

    #[test]
    fn encode_failure_is_reported_and_keeps_old_data() {
        let mut t = task();
        t.set_data(&1u32, t0()).unwrap();

        // JSON object keys must be strings.
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], "x");
        let err = t.set_data(&bad, t0()).unwrap_err();

        assert!(matches!(err, PayloadError::Encode { field: "data", .. }));
        assert_eq!(t.data::<u32>().unwrap(), Some(1));
    }

    #[test]
    fn mutators_bump_updated_at() {
        let mut t = task();
        let later = t0() + chrono::Duration::seconds(5);
        t.set_stage("rollout", later);
        assert_eq!(t.updated_at(), later);
        assert_eq!(t.stage(), Some("rollout"));
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let mut t = task();
        let later = t0() + chrono::Duration::minutes(1);
        t.set_stage("rollout", later);
        t.set_data(&1u32, t0()).unwrap();
        t.set_output(&2u32, t0() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(t.updated_at(), later);
    }

    #[test]
    fn new_error_references_task_by_id() {
        let t = task();
        let err = t.new_error(TaskErrorType::Retry, t0());
        assert_eq!(err.task_id(), t.id());
        assert_eq!(err.kind(), TaskErrorType::Retry);
        assert_eq!(err.happened_at(), t0());
    }

    #[test]
    fn record_roundtrips_every_field() {
        let mut t = task()
            .with_parent(TaskId::new("parent").unwrap())
            .with_job(JobId::new("job-7").unwrap())
            .with_max_retries(5)
            .with_params(Payload::encode(&serde_json::json!({"env": "prod"}), "params").unwrap());
        t.set_data(
            &Progress {
                step: 1,
                notes: vec![],
            },
            t0(),
        )
        .unwrap();
        t.set_stage("prepare", t0());
        t.state = TaskState::Running;
        t.retries = 2;
        t.stats = Some(TaskStats {
            worker_id: "w-1".into(),
            scheduled_at: t.created_at,
            expire_at: t.created_at + chrono::Duration::minutes(5),
        });
        let first = t.new_error(TaskErrorType::Retry, t0()).with_message("first");
        let second = t
            .new_error(TaskErrorType::Retry, t0() + chrono::Duration::seconds(1))
            .with_message("second");
        t.errors.extend([first, second]);

        let json = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();

        assert_eq!(back, t);
        assert_eq!(back.errors()[0].message(), "first");
        assert_eq!(back.errors()[1].message(), "second");
    }

    #[test]
    fn record_uses_kebab_case_keys() {
        let t = task().with_max_retries(2);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["max-retries"], 2);
        assert_eq!(json["state"], "created");
        assert!(json.get("created-at").is_some());
        assert!(json.get("stats").is_none());
    }
}
