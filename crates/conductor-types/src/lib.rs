//! Shared domain types for Conductor.
//!
//! This crate contains the core domain types used across the Conductor
//! workflow engine: workflow definitions, runtime execution results,
//! lifecycle events, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod execution;
pub mod workflow;
