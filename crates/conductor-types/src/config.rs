//! Global configuration types for Conductor.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls engine
//! defaults, logging, and where workflow files live.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Conductor platform.
///
/// Loaded from `~/.conductor/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Execution engine defaults.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory scanned by `conductor list` when no directory is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
}

/// Defaults applied by the workflow engine when a definition leaves them open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt step timeout when neither step nor workflow sets one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Concurrency limit for batches made of several plain steps.
    #[serde(default = "default_max_concurrency")]
    pub default_max_concurrency: usize,

    /// Upper bound on a whole execution (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_timeout_ms: Option<u64>,

    /// Capacity of the broadcast channel behind the event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Default step timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

fn default_step_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_max_concurrency() -> usize {
    crate::workflow::DEFAULT_MAX_CONCURRENCY
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            default_max_concurrency: default_max_concurrency(),
            workflow_timeout_ms: None,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_filter() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            otel: false,
        }
    }
}
