//! Built-in step executor for `conductor run`.
//!
//! Performs no work: each step returns a description of itself with its
//! `content` template resolved against the execution context, so a workflow's
//! data flow can be inspected without wiring real executors.

use std::future::Future;

use conductor_core::workflow::context::WorkflowContext;
use conductor_core::workflow::step_runner::{StepError, StepExecutor};
use conductor_types::workflow::WorkflowStep;
use serde_json::{json, Map, Value};

pub struct EchoExecutor;

impl StepExecutor for EchoExecutor {
    fn execute(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &WorkflowContext,
    ) -> impl Future<Output = Result<Value, StepError>> + Send {
        let output = json!({
            "step_id": step.id,
            "type": step.step_type,
            "content": ctx.resolve_template(&step.content),
            "inputs": inputs,
        });
        async move { Ok(output) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_echo_resolves_content_and_returns_inputs() {
        let ctx = WorkflowContext::new(
            "wf",
            Uuid::now_v7(),
            Map::from_iter([("who".to_string(), json!("world"))]),
        );
        let mut step = WorkflowStep::new("greet");
        step.step_type = "agent".to_string();
        step.content = "hello ${variables.who}".to_string();
        let inputs = Map::from_iter([("n".to_string(), json!(3))]);

        let output = EchoExecutor.execute(&step, &inputs, &ctx).await.unwrap();

        assert_eq!(output["step_id"], "greet");
        assert_eq!(output["type"], "agent");
        assert_eq!(output["content"], "hello world");
        assert_eq!(output["inputs"]["n"], 3);
    }
}
