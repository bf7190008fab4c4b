//! Workflow engine core: definition validation, YAML parsing, planning and
//! execution.
//!
//! - `definition` -- schema validation, dependency and cycle checks
//! - `parser` -- YAML parse/serialize, file and directory loading, lint
//! - `dag` -- batched execution plan and dependency graph export
//! - `context` -- per-execution state, field and template resolution
//! - `expression` -- condition evaluation
//! - `retry` -- attempt limits and exponential backoff
//! - `step_runner` -- `StepExecutor` trait and the per-step retry/timeout loop
//! - `executor` -- batch runner, concurrency pool, cancellation

pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod parser;
pub mod retry;
pub mod step_runner;
