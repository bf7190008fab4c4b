//! Workflow engine: batch-ordered execution with bounded parallel pools.
//!
//! `WorkflowEngine` plans a definition into batches and runs them strictly in
//! order. A batch holding one plain step runs inline against the live
//! context; any other batch is flattened into a pool of tasks on a
//! `tokio::task::JoinSet`, at most K running at once. Pool tasks get owned
//! snapshots, so the engine task is the only writer of the context.
//!
//! # Execution flow
//!
//! 1. Merge definition variables with caller variables; register the
//!    execution as active; emit `workflow:started`.
//! 2. For each batch, check the cancellation token, then run it. A
//!    cancelled execution stops before the next batch and finishes like a
//!    normal run over the steps that did execute.
//! 3. A FAILED step without `continue_on_failure` aborts the workflow.
//! 4. Resolve declared outputs; emit `workflow:completed` or
//!    `workflow:failed`. `execute` always returns a result.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::config::EngineConfig;
use conductor_types::event::WorkflowEvent;
use conductor_types::execution::{
    ActiveExecution, StepResult, StepStatus, WorkflowExecutionResult, WorkflowState,
};
use conductor_types::workflow::{WorkflowDefinition, WorkflowStep};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::WorkflowContext;
use super::dag::{build_plan, Batch, PlanError};
use super::retry::RetryHandler;
use super::step_runner::{BoxStepExecutor, StepExecutor, StepLaunch, StepRunner};
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons an execution stops early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// A step exhausted its attempts without `continue_on_failure`.
    #[error("step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },

    /// The planner or pool could not make progress on a validated workflow.
    #[error("engine contract violated: {0}")]
    Contract(String),

    #[error("workflow timed out after {0} ms")]
    WorkflowTimeout(u64),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
}

impl From<PlanError> for ExecutorError {
    fn from(err: PlanError) -> Self {
        ExecutorError::Contract(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT for the async method, like `StepExecutor`.
pub trait WorkflowExecutor: Send + Sync {
    /// Execute a definition with caller-supplied variables. Never errors:
    /// failures are reported in the returned result.
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        variables: Map<String, Value>,
    ) -> impl Future<Output = WorkflowExecutionResult> + Send;

    /// Request cancellation of a running execution.
    fn cancel(&self, execution_id: Uuid) -> Result<(), ExecutorError>;
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

struct ActiveHandle {
    workflow_id: String,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

/// Executes workflow definitions against an injected `StepExecutor`.
///
/// Each engine owns its event bus. One engine may run several executions
/// concurrently; each gets its own context and cancellation token.
pub struct WorkflowEngine {
    runner: StepRunner,
    events: EventBus,
    config: EngineConfig,
    /// Cancellation tokens of running executions, keyed by execution id.
    active: DashMap<Uuid, ActiveHandle>,
}

impl WorkflowEngine {
    /// Create an engine with default configuration.
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self::with_config(executor, EngineConfig::default())
    }

    pub fn with_config<T: StepExecutor + 'static>(executor: T, config: EngineConfig) -> Self {
        Self::from_boxed(BoxStepExecutor::new(executor), config)
    }

    /// Create an engine around an already type-erased executor.
    pub fn from_boxed(executor: BoxStepExecutor, config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let runner = StepRunner::new(
            executor,
            events.clone(),
            Duration::from_millis(config.default_step_timeout_ms),
        );
        Self {
            runner,
            events,
            config,
            active: DashMap::new(),
        }
    }

    /// The engine's event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of executions that have not finished yet.
    pub fn get_active_executions(&self) -> Vec<ActiveExecution> {
        self.active
            .iter()
            .map(|entry| ActiveExecution {
                execution_id: *entry.key(),
                workflow_id: entry.workflow_id.clone(),
                started_at: entry.started_at,
                state: if entry.token.is_cancelled() {
                    WorkflowState::Cancelled
                } else {
                    WorkflowState::Running
                },
            })
            .collect()
    }

    /// Execute with a caller-chosen execution id.
    pub async fn execute_with_id(
        &self,
        def: &WorkflowDefinition,
        variables: Map<String, Value>,
        execution_id: Uuid,
    ) -> WorkflowExecutionResult {
        let token = CancellationToken::new();
        self.active.insert(
            execution_id,
            ActiveHandle {
                workflow_id: def.id.clone(),
                started_at: Utc::now(),
                token: token.clone(),
            },
        );

        let mut merged = def.variables.clone();
        merged.extend(variables);
        let mut ctx = WorkflowContext::new(&def.id, execution_id, merged);

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %def.id,
            "starting workflow execution"
        );
        self.events.publish(WorkflowEvent::WorkflowStarted {
            execution_id,
            workflow_id: def.id.clone(),
        });

        let started = Instant::now();
        let outcome = match self.config.workflow_timeout_ms {
            Some(limit_ms) => tokio::time::timeout(
                Duration::from_millis(limit_ms),
                self.run_batches(def, &mut ctx, &token),
            )
            .await
            .unwrap_or(Err(ExecutorError::WorkflowTimeout(limit_ms))),
            None => self.run_batches(def, &mut ctx, &token).await,
        };

        self.active.remove(&execution_id);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                let outputs = ctx.resolve_outputs(def);
                ctx.finish(WorkflowState::Completed);
                tracing::info!(
                    execution_id = %execution_id,
                    workflow_id = %def.id,
                    duration_ms,
                    "workflow completed"
                );
                self.events.publish(WorkflowEvent::WorkflowCompleted {
                    execution_id,
                    workflow_id: def.id.clone(),
                    duration_ms,
                    outputs: Value::Object(outputs.clone()),
                });
                WorkflowExecutionResult {
                    success: true,
                    workflow_id: def.id.clone(),
                    execution_id,
                    state: WorkflowState::Completed,
                    step_results: ctx.results(),
                    outputs,
                    duration_ms,
                    error: None,
                }
            }
            Err(err) => {
                let state = WorkflowState::Failed;
                ctx.finish(state);
                let error = err.to_string();
                tracing::warn!(
                    execution_id = %execution_id,
                    workflow_id = %def.id,
                    state = %state,
                    error = %error,
                    "workflow did not complete"
                );
                self.events.publish(WorkflowEvent::WorkflowFailed {
                    execution_id,
                    workflow_id: def.id.clone(),
                    error: error.clone(),
                });
                WorkflowExecutionResult {
                    success: false,
                    workflow_id: def.id.clone(),
                    execution_id,
                    state,
                    step_results: ctx.results(),
                    outputs: Map::new(),
                    duration_ms,
                    error: Some(error),
                }
            }
        }
    }

    async fn run_batches(
        &self,
        def: &WorkflowDefinition,
        ctx: &mut WorkflowContext,
        token: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let plan = build_plan(def)?;

        for (index, batch) in plan.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!(
                    execution_id = %ctx.execution_id,
                    remaining_batches = plan.len() - index,
                    "cancellation requested, stopping before next batch"
                );
                return Ok(());
            }

            tracing::debug!(
                execution_id = %ctx.execution_id,
                batch = index,
                steps = batch.step_ids().len(),
                sequential = batch.is_sequential(),
                "running batch"
            );

            if batch.is_sequential() {
                for step in batch.steps() {
                    let result = self.runner.run(step, def, ctx).await;
                    let fatal = fatal_error(step, &result);
                    ctx.record(result);
                    if let Some(err) = fatal {
                        return Err(err);
                    }
                }
            } else {
                self.run_pool(def, batch, ctx, token).await?;
            }
        }

        Ok(())
    }

    /// Run a non-sequential batch as a bounded pool.
    ///
    /// A step launches once every dependency declared inside the same batch
    /// is settled; blocked steps are requeued in order.
    async fn run_pool<'d>(
        &self,
        def: &'d WorkflowDefinition,
        batch: &Batch<'d>,
        ctx: &mut WorkflowContext,
        token: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let limit = batch.concurrency_limit(self.config.default_max_concurrency);
        let wait_for_all = batch.wait_for_all();
        let members: HashSet<&str> = batch.step_ids().into_iter().collect();

        let mut pending: VecDeque<&'d WorkflowStep> = batch.steps().collect();
        let mut settled: HashSet<&'d str> = HashSet::new();
        let mut running: HashMap<tokio::task::Id, &'d WorkflowStep> = HashMap::new();
        let mut tasks: JoinSet<StepResult> = JoinSet::new();
        let mut failure: Option<ExecutorError> = None;

        loop {
            if failure.is_none() && !token.is_cancelled() {
                self.launch_ready(def, ctx, limit, &members, &mut pending, &mut settled, &mut running, &mut tasks);
            }

            if running.is_empty() {
                if failure.is_some() || pending.is_empty() {
                    break;
                }
                if token.is_cancelled() {
                    break;
                }
                let stalled: Vec<&str> = pending.iter().map(|s| s.id.as_str()).collect();
                return Err(ExecutorError::Contract(format!(
                    "no runnable step in pool, blocked: {}",
                    stalled.join(", ")
                )));
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (task_id, step, result) = match joined {
                Ok((task_id, result)) => {
                    let Some(step) = running.remove(&task_id) else {
                        continue;
                    };
                    (task_id, step, result)
                }
                Err(join_err) => {
                    let task_id = join_err.id();
                    let Some(step) = running.remove(&task_id) else {
                        continue;
                    };
                    tracing::error!(step_id = %step.id, error = %join_err, "step task panicked");
                    let mut result = StepResult::cancelled(&step.id, format!("step task failed: {join_err}"));
                    result.status = StepStatus::Failed;
                    (task_id, step, result)
                }
            };
            tracing::trace!(?task_id, step_id = %step.id, status = %result.status, "pool task finished");

            let fatal = fatal_error(step, &result);
            if fatal.is_none() {
                settled.insert(step.id.as_str());
            }
            ctx.record(result);

            let Some(err) = fatal else {
                continue;
            };
            if failure.is_some() {
                continue;
            }
            failure = Some(err);

            if !wait_for_all {
                tasks.abort_all();
                self.drain_aborted(&mut tasks, &mut running, ctx, &step.id).await;
                break;
            }
            if !running.is_empty() {
                tracing::debug!(
                    step_id = %step.id,
                    in_flight = running.len(),
                    "step failed, waiting for in-flight siblings"
                );
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Launch pending steps until the pool is full or nothing is runnable.
    ///
    /// Skipped steps settle immediately, which may unblock steps scanned
    /// earlier, so passes repeat while they make progress.
    #[allow(clippy::too_many_arguments)]
    fn launch_ready<'d>(
        &self,
        def: &'d WorkflowDefinition,
        ctx: &mut WorkflowContext,
        limit: usize,
        members: &HashSet<&str>,
        pending: &mut VecDeque<&'d WorkflowStep>,
        settled: &mut HashSet<&'d str>,
        running: &mut HashMap<tokio::task::Id, &'d WorkflowStep>,
        tasks: &mut JoinSet<StepResult>,
    ) {
        loop {
            let mut progressed = false;
            let mut blocked = VecDeque::new();

            while running.len() < limit {
                let Some(step) = pending.pop_front() else {
                    break;
                };
                let ready = step
                    .depends_on
                    .iter()
                    .all(|dep| !members.contains(dep.as_str()) || settled.contains(dep.as_str()));
                if !ready {
                    blocked.push_back(step);
                    continue;
                }

                progressed = true;
                match self.runner.prepare(step, ctx) {
                    StepLaunch::Skip(result) => {
                        settled.insert(step.id.as_str());
                        ctx.record(result);
                    }
                    StepLaunch::Run(inputs) => {
                        let runner = self.runner.clone();
                        let owned = step.clone();
                        let snapshot = ctx.clone();
                        let retry = RetryHandler::resolve(step, def);
                        let timeout = self.runner.timeout_for(step, def);
                        let handle = tasks.spawn(async move {
                            runner.execute(&owned, &inputs, &snapshot, retry, timeout).await
                        });
                        running.insert(handle.id(), step);
                    }
                }
            }

            while let Some(step) = blocked.pop_back() {
                pending.push_front(step);
            }
            if !progressed || running.len() >= limit || pending.is_empty() {
                return;
            }
        }
    }

    /// Collect tasks after `abort_all`: finished ones keep their result,
    /// aborted ones are recorded CANCELLED.
    async fn drain_aborted(
        &self,
        tasks: &mut JoinSet<StepResult>,
        running: &mut HashMap<tokio::task::Id, &WorkflowStep>,
        ctx: &mut WorkflowContext,
        failed_step: &str,
    ) {
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, result)) => {
                    running.remove(&task_id);
                    ctx.record(result);
                }
                Err(join_err) => {
                    if let Some(step) = running.remove(&join_err.id()) {
                        ctx.record(StepResult::cancelled(
                            &step.id,
                            format!("cancelled after step '{failed_step}' failed"),
                        ));
                    }
                }
            }
        }
    }
}

impl WorkflowExecutor for WorkflowEngine {
    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        variables: Map<String, Value>,
    ) -> WorkflowExecutionResult {
        self.execute_with_id(definition, variables, Uuid::now_v7())
            .await
    }

    fn cancel(&self, execution_id: Uuid) -> Result<(), ExecutorError> {
        let handle = self
            .active
            .get(&execution_id)
            .ok_or(ExecutorError::ExecutionNotFound(execution_id))?;
        handle.token.cancel();
        tracing::info!(execution_id = %execution_id, "cancellation requested");
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

/// The error that aborts the workflow for this result, if any.
fn fatal_error(step: &WorkflowStep, result: &StepResult) -> Option<ExecutorError> {
    (result.status == StepStatus::Failed && !step.continue_on_failure).then(|| {
        ExecutorError::StepFailed {
            step_id: step.id.clone(),
            error: result.error.clone().unwrap_or_default(),
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
