//! Domain identifiers (strongly-typed IDs).
//!
//! IDs are strings so callers may assign their own (`Id::new`). When none is
//! given, a ULID is generated and rendered with a type prefix
//! (`task-01J...`, `job-01J...`), which keeps generated IDs time-sortable and
//! collision-resistant without coordination between nodes.
//!
//! `Id<T>` is phantom-typed: `TaskId` and `JobId` share one implementation but
//! cannot be mixed up at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::IdError;

/// Marker trait for each ID type.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used for generated IDs ("task-", "job-").
    fn prefix() -> &'static str;
}

/// A non-empty identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Wrap an explicit ID. Empty strings are rejected.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    /// Build a prefixed ID from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            value: format!("{}{}", T::prefix(), ulid),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The ULID part of a generated ID, if this ID was generated.
    pub fn ulid(&self) -> Option<Ulid> {
        self.value
            .strip_prefix(T::prefix())
            .and_then(|rest| Ulid::from_string(rest).ok())
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<T: IdMarker> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

// ========================================
// Marker types
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of a Job (groups the tasks of one logical job).
pub type JobId = Id<Job>;

/// Identifier of a Task. Also used for `parent_id`.
pub type TaskId = Id<Task>;
