//! tasker-cli - drives one deploy task through its lifecycle against the
//! in-memory store.
//!
//! `rollout` fails `--failures` times with a retryable error; `--break-verify`
//! makes `verify` ask for a rollback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tasker_core::app::{ExecRegistry, StageContext, StageFn, TaskBuilder, TaskExec, TaskKind};
use tasker_core::config::TaskerConfig;
use tasker_core::domain::{Decision, Task, TaskError, TaskErrorType, TaskResult};
use tasker_core::impls::InMemoryTaskStore;
use tasker_core::ports::Clock;

#[derive(Parser)]
#[command(name = "tasker", about = "Run a demo deploy task through the task lifecycle")]
struct Args {
    /// TOML config with [defaults] and [logging]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Service to deploy
    #[arg(long, default_value = "api")]
    name: String,

    /// How many times rollout fails before succeeding
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Override the configured retry budget
    #[arg(long)]
    max_retries: Option<u32>,

    /// Make the verify stage request a rollback
    #[arg(long)]
    break_verify: bool,

    #[arg(long, default_value = "worker-1")]
    worker: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeployParams {
    service: String,
    replicas: u32,
}

impl TaskKind for DeployParams {
    const NAME: &'static str = "deploy";
}

#[derive(Debug, Serialize, Deserialize)]
struct DeployOutput {
    service: String,
    attempts: u32,
}

struct Prepare;

#[async_trait]
impl StageFn for Prepare {
    async fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), TaskError> {
        let params: DeployParams = decode_params(ctx)?;
        if ctx.task().is_reverting() {
            info!(service = %params.service, "releasing prepared artifacts");
            return Ok(());
        }
        info!(service = %params.service, replicas = params.replicas, "preparing release");
        ctx.set_data(&format!("artifacts for {}", params.service))
    }
}

struct Rollout {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl StageFn for Rollout {
    async fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), TaskError> {
        if ctx.task().is_reverting() {
            info!("rolling back to previous release");
            return Ok(());
        }
        // A retry resumes here, so prepare's data must have been kept.
        let prepared = match ctx.task().data::<String>() {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Err(ctx.fail(TaskErrorType::Fail).with_message("nothing prepared")),
            Err(e) => return Err(ctx.fail(TaskErrorType::Fail).caused_by(e)),
        };
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ctx
                .fail(TaskErrorType::Retry)
                .with_message(format!("rollout timed out ({left} failure(s) left)"))
                .with_output(b"kubectl: deadline exceeded".to_vec()));
        }
        info!(%prepared, "rollout finished");
        Ok(())
    }
}

struct Verify {
    broken: bool,
}

#[async_trait]
impl StageFn for Verify {
    async fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), TaskError> {
        if ctx.task().is_reverting() {
            return Ok(());
        }
        if self.broken {
            return Err(ctx
                .fail(TaskErrorType::Revert)
                .with_message("health check failed"));
        }
        info!("health check passed");
        Ok(())
    }
}

fn decode_params(ctx: &StageContext<'_>) -> Result<DeployParams, TaskError> {
    match ctx.task().params::<DeployParams>() {
        Ok(Some(params)) => Ok(params),
        Ok(None) => Err(ctx.fail(TaskErrorType::Fail).with_message("missing params")),
        Err(e) => Err(ctx.fail(TaskErrorType::Fail).caused_by(e)),
    }
}

/// Copy the working data a run produced back to the stored task.
async fn persist_data(store: &InMemoryTaskStore, worker: &str, task: &Task) -> Result<()> {
    let Some(data) = task.data::<serde_json::Value>()? else {
        return Ok(());
    };
    store
        .update(task.id(), worker, |stored, now| {
            stored.set_data(&data, now)?;
            Ok::<_, anyhow::Error>(())
        })
        .await
}

fn init_tracing(config: &TaskerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TaskerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TaskerConfig::default(),
    };
    init_tracing(&config);

    let mut registry = ExecRegistry::new();
    registry.register(
        TaskExec::new(DeployParams::NAME)
            .stage("prepare", Prepare)
            .stage(
                "rollout",
                Rollout {
                    remaining_failures: AtomicU32::new(args.failures),
                },
            )
            .stage(
                "verify",
                Verify {
                    broken: args.break_verify,
                },
            ),
    )?;

    let store = InMemoryTaskStore::new();
    let mut builder = TaskBuilder::of(&DeployParams {
        service: args.name.clone(),
        replicas: 3,
    })
    .defaults(&config.defaults)
    .submitter(Arc::new(store.clone()));
    if let Some(max_retries) = args.max_retries {
        builder = builder.max_retries(max_retries);
    }
    let submitted = builder.submit().await?;
    let task_id = submitted.id().clone();

    let lease = config.defaults.lease();
    let clock = store.clock().clone();
    let worker = args.worker.as_str();
    while let Some(mut task) = store.claim_next(worker, lease).await? {
        let Some(exec) = registry.for_task(&task) else {
            warn!(task_id = %task.id(), name = task.name(), "no exec registered, aborting");
            store.abort(task.id(), worker).await?;
            continue;
        };

        let mut failure = None;
        for stage in exec.remaining_stages(&task)? {
            store
                .update(task.id(), worker, |stored, now| {
                    stored.set_stage(stage.name(), now);
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            task.set_stage(stage.name(), clock.now());

            let mut ctx = StageContext::new(&mut task, clock.as_ref());
            if let Err(error) = stage.run(&mut ctx).await {
                failure = Some(error);
                break;
            }
        }
        persist_data(&store, worker, &task).await?;

        match failure {
            Some(error) => {
                println!("  {}", error.to_string().replace('\n', "\n  "));
                let decision = store.record_error(worker, error).await?;
                println!("decision: {decision:?}");
            }
            // A finished rollback ends the task as a failure.
            None if task.is_reverting() => {
                let error = task
                    .new_error(TaskErrorType::Fail, clock.now())
                    .with_message("rolled back");
                let decision = store.record_error(worker, error).await?;
                println!("decision: {decision:?}");
            }
            None => {
                let output = DeployOutput {
                    service: args.name.clone(),
                    attempts: task.retries() + 1,
                };
                store
                    .update(task.id(), worker, |stored, now| {
                        stored.set_output(&output, now)?;
                        Ok::<_, anyhow::Error>(())
                    })
                    .await?;
                store.complete(task.id(), worker).await?;
                println!("decision: {:?}", Decision::Complete(TaskResult::Success));
            }
        }
    }

    let counts = store.counts_by_state().await;
    let task = store
        .get(&task_id)
        .await
        .context("submitted task vanished from the store")?;

    println!(
        "task {} -> {} (result: {}, retries: {}/{}, errors: {})",
        task.id(),
        task.state(),
        task.result().map_or_else(|| "-".to_string(), |r| r.to_string()),
        task.retries(),
        task.max_retries(),
        task.errors().len(),
    );
    if let Some(output) = task.output::<DeployOutput>()? {
        println!("output: {}", serde_json::to_string(&output)?);
    }
    println!(
        "counts: completed={} stuck={} total={}",
        counts.completed,
        counts.stuck,
        counts.total()
    );

    Ok(match task.result() {
        Some(TaskResult::Success) => ExitCode::SUCCESS,
        _ if task.is_stuck() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    })
}
