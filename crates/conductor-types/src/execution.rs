//! Runtime execution types.
//!
//! These types are created per `execute()` call and never persisted. They are
//! serializable so front ends can render them as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Running => "running",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of an individual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Waiting,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Waiting => "waiting",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of one step within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    /// Executor output; `null` for skipped, failed and cancelled steps.
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    /// Attempts beyond the first.
    pub retry_count: u32,
    /// Attempts consumed, first included. Zero when the step never ran.
    pub attempts: u32,
}

impl StepResult {
    /// A zero-duration result for a step whose condition evaluated false.
    pub fn skipped(step_id: impl Into<String>) -> Self {
        Self::instant(step_id, StepStatus::Skipped, None)
    }

    /// A zero-duration result for a step stopped before it finished.
    pub fn cancelled(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::instant(step_id, StepStatus::Cancelled, Some(reason.into()))
    }

    fn instant(step_id: impl Into<String>, status: StepStatus, error: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status,
            output: Value::Null,
            error,
            start_time: now,
            end_time: now,
            duration_ms: 0,
            retry_count: 0,
            attempts: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutionResult
// ---------------------------------------------------------------------------

/// Final result of `execute()`. Always produced, even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub success: bool,
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub state: WorkflowState,
    /// Step results in the order they were recorded.
    pub step_results: Vec<StepResult>,
    /// Resolved workflow outputs.
    pub outputs: Map<String, Value>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecutionResult {
    /// Look up the result recorded for a step.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Active executions
// ---------------------------------------------------------------------------

/// Snapshot of an execution that has not finished yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    /// `running`, or `cancelled` once a cancel was requested.
    pub state: WorkflowState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_result_is_instant() {
        let result = StepResult::skipped("a");
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.output, Value::Null);
        assert_eq!(result.start_time, result.end_time);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(WorkflowState::Failed.to_string(), "failed");
    }
}
