//! Workflow engine for Conductor.
//!
//! Validates and parses declarative workflow definitions, plans them into
//! dependency-ordered batches, and executes those batches against an injected
//! `StepExecutor`, publishing lifecycle events on a per-engine `EventBus`.
//! Depends only on `conductor-types`; no persistence or network I/O.

pub mod event;
pub mod workflow;
