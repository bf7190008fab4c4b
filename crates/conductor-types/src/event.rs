//! Lifecycle events emitted by the workflow engine.
//!
//! `WorkflowEvent` is the only incremental-progress channel of an execution.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Events emitted during a workflow execution.
///
/// Serialized with a `type` tag carrying the event name
/// (`workflow:started`, `step:retrying`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    /// An execution has started.
    #[serde(rename = "workflow:started")]
    WorkflowStarted {
        execution_id: Uuid,
        workflow_id: String,
    },

    /// An execution finished successfully.
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted {
        execution_id: Uuid,
        workflow_id: String,
        duration_ms: u64,
        outputs: Value,
    },

    /// An execution was aborted (step failure, cancellation, timeout).
    #[serde(rename = "workflow:failed")]
    WorkflowFailed {
        execution_id: Uuid,
        workflow_id: String,
        error: String,
    },

    /// A step passed its condition and is about to run.
    #[serde(rename = "step:started")]
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_name: String,
        step_type: String,
    },

    /// A step produced an output.
    #[serde(rename = "step:completed")]
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
        retry_count: u32,
    },

    /// A step exhausted its attempts.
    #[serde(rename = "step:failed")]
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
        retry_count: u32,
        /// Whether the workflow keeps going (`continue_on_failure`).
        continued: bool,
    },

    /// A step's condition evaluated false.
    #[serde(rename = "step:skipped")]
    StepSkipped { execution_id: Uuid, step_id: String },

    /// A step attempt failed and another one is scheduled after `delay_ms`.
    #[serde(rename = "step:retrying")]
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        /// The attempt that just failed (1-based).
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
}

impl WorkflowEvent {
    pub const WORKFLOW_STARTED: &'static str = "workflow:started";
    pub const WORKFLOW_COMPLETED: &'static str = "workflow:completed";
    pub const WORKFLOW_FAILED: &'static str = "workflow:failed";
    pub const STEP_STARTED: &'static str = "step:started";
    pub const STEP_COMPLETED: &'static str = "step:completed";
    pub const STEP_FAILED: &'static str = "step:failed";
    pub const STEP_SKIPPED: &'static str = "step:skipped";
    pub const STEP_RETRYING: &'static str = "step:retrying";

    /// The event name handlers subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => Self::WORKFLOW_STARTED,
            WorkflowEvent::WorkflowCompleted { .. } => Self::WORKFLOW_COMPLETED,
            WorkflowEvent::WorkflowFailed { .. } => Self::WORKFLOW_FAILED,
            WorkflowEvent::StepStarted { .. } => Self::STEP_STARTED,
            WorkflowEvent::StepCompleted { .. } => Self::STEP_COMPLETED,
            WorkflowEvent::StepFailed { .. } => Self::STEP_FAILED,
            WorkflowEvent::StepSkipped { .. } => Self::STEP_SKIPPED,
            WorkflowEvent::StepRetrying { .. } => Self::STEP_RETRYING,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { execution_id, .. }
            | WorkflowEvent::WorkflowCompleted { execution_id, .. }
            | WorkflowEvent::WorkflowFailed { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::StepSkipped { execution_id, .. }
            | WorkflowEvent::StepRetrying { execution_id, .. } => *execution_id,
        }
    }

    /// Returns the step_id from step-scoped variants, or None for
    /// workflow-scoped events.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StepStarted { step_id, .. }
            | WorkflowEvent::StepCompleted { step_id, .. }
            | WorkflowEvent::StepFailed { step_id, .. }
            | WorkflowEvent::StepSkipped { step_id, .. }
            | WorkflowEvent::StepRetrying { step_id, .. } => Some(step_id),

            WorkflowEvent::WorkflowStarted { .. }
            | WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_retrying_serde_roundtrip() {
        let event = WorkflowEvent::StepRetrying {
            execution_id: Uuid::now_v7(),
            step_id: "call-api".to_string(),
            attempt: 1,
            max_attempts: 3,
            delay_ms: 1000,
            error: "connection reset".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step:retrying\""));
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_workflow_failed_serde_roundtrip() {
        let event = WorkflowEvent::WorkflowFailed {
            execution_id: Uuid::now_v7(),
            workflow_id: "daily-report".to_string(),
            error: "step 'a' failed".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow:failed\""));
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WorkflowEvent::WorkflowFailed { .. }));
    }

    #[test]
    fn test_name_matches_serde_tag() {
        let event = WorkflowEvent::StepSkipped {
            execution_id: Uuid::nil(),
            step_id: "s".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }

    #[test]
    fn test_step_id_only_for_step_events() {
        let id = Uuid::now_v7();
        let step = WorkflowEvent::StepStarted {
            execution_id: id,
            step_id: "gather".to_string(),
            step_name: "Gather".to_string(),
            step_type: "task".to_string(),
        };
        assert_eq!(step.step_id(), Some("gather"));
        assert_eq!(step.execution_id(), id);

        let wf = WorkflowEvent::WorkflowStarted {
            execution_id: id,
            workflow_id: "wf".to_string(),
        };
        assert_eq!(wf.step_id(), None);
    }
}
