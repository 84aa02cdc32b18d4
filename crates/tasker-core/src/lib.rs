//! tasker-core
//!
//! Task data model and lifecycle for a staged, retryable task runner.
//!
//! # Modules
//! - **domain**: ids, states, the task record, task errors, lifecycle transitions, decisions
//! - **ports**: seams to the outside (Clock, IdGenerator, TaskSubmitter)
//! - **app**: TaskBuilder, stage execs and their registry
//! - **impls**: InMemoryTaskStore
//! - **config**: TOML defaults for retries, leases and logging
//! - **observability**: state counts
//! - **error**: operational error types

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
