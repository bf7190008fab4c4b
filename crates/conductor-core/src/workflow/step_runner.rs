//! Step execution: the `StepExecutor` seam and the per-step attempt loop.
//!
//! The engine never performs step work itself. It hands each step, its
//! resolved inputs, and a read-only context snapshot to an injected
//! `StepExecutor`. `StepRunner` wraps that call with the condition gate,
//! input resolution, per-attempt timeout, retry with backoff, and lifecycle
//! events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_types::event::WorkflowEvent;
use conductor_types::execution::{StepResult, StepStatus};
use conductor_types::workflow::{RetryConfig, WorkflowDefinition, WorkflowStep};
use serde_json::{Map, Value};
use tokio::time::Instant;

use super::context::WorkflowContext;
use super::expression;
use super::retry::RetryHandler;
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single step attempt. All kinds are retried alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The executor reported a failure.
    #[error("{0}")]
    ExecutionFailed(String),

    /// The attempt did not finish within the step timeout.
    #[error("Step execution timeout")]
    Timeout,
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::ExecutionFailed(message.into())
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Performs the actual work of a step.
///
/// Receives the step, its resolved inputs, and a read-only snapshot of the
/// execution context. Returns the step output.
pub trait StepExecutor: Send + Sync {
    fn execute(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &WorkflowContext,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;
}

/// Object-safe version of [`StepExecutor`] with a boxed future.
///
/// A blanket implementation is provided for all types implementing
/// `StepExecutor`.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        inputs: &'a Map<String, Value>,
        ctx: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        inputs: &'a Map<String, Value>,
        ctx: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.execute(step, inputs, ctx))
    }
}

/// Type-erased step executor handed to the engine.
///
/// Since `StepExecutor` uses RPITIT, it cannot be used as a trait object
/// directly.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &WorkflowContext,
    ) -> Result<Value, StepError> {
        self.inner.execute_boxed(step, inputs, ctx).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor").finish_non_exhaustive()
    }
}

/// Adapts a closure taking the step and its inputs into a `StepExecutor`.
pub struct FnExecutor<F>(pub F);

impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(WorkflowStep, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    fn execute(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        _ctx: &WorkflowContext,
    ) -> impl Future<Output = Result<Value, StepError>> + Send {
        (self.0)(step.clone(), inputs.clone())
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// What to do with a step after its condition gate.
#[derive(Debug, Clone)]
pub enum StepLaunch {
    /// The condition evaluated false.
    Skip(StepResult),
    /// Run the executor with these resolved inputs.
    Run(Map<String, Value>),
}

/// Runs single steps against the injected executor.
///
/// Cheap to clone; pool tasks each take their own clone.
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<BoxStepExecutor>,
    events: EventBus,
    default_timeout: Duration,
}

impl StepRunner {
    pub fn new(executor: BoxStepExecutor, events: EventBus, default_timeout: Duration) -> Self {
        Self {
            executor: Arc::new(executor),
            events,
            default_timeout,
        }
    }

    /// Per-attempt timeout: the step's own, else the workflow default, else
    /// the engine default.
    pub fn timeout_for(&self, step: &WorkflowStep, def: &WorkflowDefinition) -> Duration {
        step.timeout_ms
            .or(def.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Evaluate the condition gate and resolve inputs.
    ///
    /// Emits `step:skipped` or `step:started`.
    pub fn prepare(&self, step: &WorkflowStep, ctx: &WorkflowContext) -> StepLaunch {
        if let Some(condition) = &step.condition {
            if !expression::evaluate(condition, ctx) {
                tracing::debug!(step_id = %step.id, "condition false, skipping step");
                self.events.publish(WorkflowEvent::StepSkipped {
                    execution_id: ctx.execution_id,
                    step_id: step.id.clone(),
                });
                return StepLaunch::Skip(StepResult::skipped(&step.id));
            }
        }

        tracing::debug!(step_id = %step.id, step_type = %step.step_type, "starting step");
        self.events.publish(WorkflowEvent::StepStarted {
            execution_id: ctx.execution_id,
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            step_type: step.step_type.clone(),
        });
        StepLaunch::Run(ctx.resolve_inputs(step))
    }

    /// Run the attempt loop for a step that passed its gate.
    ///
    /// Each attempt races the executor against `timeout`. Failed non-final
    /// attempts emit `step:retrying` and sleep the backoff delay. Returns a
    /// COMPLETED or FAILED result; never errors.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &WorkflowContext,
        retry: RetryConfig,
        timeout: Duration,
    ) -> StepResult {
        let start_time = Utc::now();
        let started = Instant::now();
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(timeout, self.executor.execute(step, inputs, ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StepError::Timeout),
                };

            let error = match outcome {
                Ok(output) => {
                    let duration_ms = elapsed_ms(started);
                    self.events.publish(WorkflowEvent::StepCompleted {
                        execution_id: ctx.execution_id,
                        step_id: step.id.clone(),
                        duration_ms,
                        retry_count: attempt - 1,
                    });
                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output,
                        error: None,
                        start_time,
                        end_time: Utc::now(),
                        duration_ms,
                        retry_count: attempt - 1,
                        attempts: attempt,
                    };
                }
                Err(e) => e.to_string(),
            };

            if !RetryHandler::should_retry(&retry, attempt) {
                tracing::warn!(
                    step_id = %step.id,
                    attempts = attempt,
                    error = %error,
                    continue_on_failure = step.continue_on_failure,
                    "step failed"
                );
                self.events.publish(WorkflowEvent::StepFailed {
                    execution_id: ctx.execution_id,
                    step_id: step.id.clone(),
                    error: error.clone(),
                    retry_count: attempt - 1,
                    continued: step.continue_on_failure,
                });
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Failed,
                    output: Value::Null,
                    error: Some(error),
                    start_time,
                    end_time: Utc::now(),
                    duration_ms: elapsed_ms(started),
                    retry_count: attempt - 1,
                    attempts: attempt,
                };
            }

            let delay = RetryHandler::backoff_delay(&retry, attempt);
            tracing::warn!(
                step_id = %step.id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "step attempt failed, retrying"
            );
            self.events.publish(WorkflowEvent::StepRetrying {
                execution_id: ctx.execution_id,
                step_id: step.id.clone(),
                attempt,
                max_attempts,
                delay_ms: delay.as_millis() as u64,
                error,
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Gate and run a step inline against the live context.
    pub async fn run(
        &self,
        step: &WorkflowStep,
        def: &WorkflowDefinition,
        ctx: &WorkflowContext,
    ) -> StepResult {
        match self.prepare(step, ctx) {
            StepLaunch::Skip(result) => result,
            StepLaunch::Run(inputs) => {
                let retry = RetryHandler::resolve(step, def);
                let timeout = self.timeout_for(step, def);
                self.execute(step, &inputs, ctx, retry, timeout).await
            }
        }
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
