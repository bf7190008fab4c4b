//! Per-execution workflow context with field and template resolution.
//!
//! `WorkflowContext` is the mutable state of one `execute()` call: variables,
//! recorded step results, and the overall state. Field paths look like
//! `"<stepId>.<path>"` (into that step's output) or `"variables.<path>"`.
//! Path segments index objects by key and arrays by position. A path that
//! cannot be followed resolves to `None` ("undefined"), never an error.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use conductor_types::execution::{StepResult, WorkflowState};
use conductor_types::workflow::{StepInput, WorkflowDefinition, WorkflowStep};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Matches `${expr}` placeholders; group 1 is the expression.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"));

const VARIABLES_ROOT: &str = "variables";

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Mutable state of a single workflow execution.
///
/// Owned by the engine task. Pool tasks receive clones as read-only snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub variables: Map<String, Value>,
    step_results: HashMap<String, StepResult>,
    /// Step IDs in the order their results were recorded.
    order: Vec<String>,
    pub state: WorkflowState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: Uuid,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            variables,
            step_results: HashMap::new(),
            order: Vec::new(),
            state: WorkflowState::Running,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Record a step result. Re-recording a step replaces its result but
    /// keeps its original position.
    pub fn record(&mut self, result: StepResult) {
        if !self.step_results.contains_key(&result.step_id) {
            self.order.push(result.step_id.clone());
        }
        self.step_results.insert(result.step_id.clone(), result);
    }

    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    /// Step results in record order.
    pub fn results(&self) -> Vec<StepResult> {
        self.order
            .iter()
            .filter_map(|id| self.step_results.get(id))
            .cloned()
            .collect()
    }

    /// Mark the execution as finished in `state`.
    pub fn finish(&mut self, state: WorkflowState) {
        self.state = state;
        self.end_time = Some(Utc::now());
    }

    // -- resolution ---------------------------------------------------------

    /// Resolve a dotted field path. `None` means undefined.
    pub fn resolve_field(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if head == VARIABLES_ROOT {
            return match rest {
                None => Some(Value::Object(self.variables.clone())),
                Some(rest) => {
                    let (key, tail) = match rest.split_once('.') {
                        Some((key, tail)) => (key, Some(tail)),
                        None => (rest, None),
                    };
                    let root = self.variables.get(key)?;
                    lookup(root, tail).cloned()
                }
            };
        }

        let output = &self.step_results.get(head)?.output;
        lookup(output, rest).cloned()
    }

    /// Substitute every `${expr}` in `template` with its resolved value.
    ///
    /// Strings are inserted raw, other values as compact JSON. Placeholders
    /// that do not resolve are kept verbatim.
    pub fn resolve_template(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                match self.resolve_field(caps[1].trim()) {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Resolve a step's declared inputs. Undefined references are omitted.
    pub fn resolve_inputs(&self, step: &WorkflowStep) -> Map<String, Value> {
        let mut inputs = Map::new();
        for (name, input) in &step.inputs {
            let value = match input {
                StepInput::Literal { value } => Some(value.clone()),
                StepInput::Reference { from_step, field } => self
                    .step_results
                    .get(from_step)
                    .and_then(|r| lookup(&r.output, Some(field)))
                    .cloned(),
                StepInput::Template { template } => {
                    Some(Value::String(self.resolve_template(template)))
                }
            };
            match value {
                Some(value) => {
                    inputs.insert(name.clone(), value);
                }
                None => tracing::debug!(step_id = %step.id, input = %name, "input is undefined"),
            }
        }
        inputs
    }

    /// Resolve the workflow's declared outputs.
    ///
    /// An entry containing `${` is treated as a template, anything else as a
    /// field path. Undefined outputs are omitted.
    pub fn resolve_outputs(&self, def: &WorkflowDefinition) -> Map<String, Value> {
        def.outputs
            .iter()
            .filter_map(|(name, expr)| {
                let value = if expr.contains("${") {
                    Some(Value::String(self.resolve_template(expr)))
                } else {
                    self.resolve_field(expr.trim())
                };
                value.map(|v| (name.clone(), v))
            })
            .collect()
    }
}

/// Expressions of every `${...}` placeholder in `text`.
pub fn placeholders(text: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

fn lookup<'v>(root: &'v Value, path: Option<&str>) -> Option<&'v Value> {
    let Some(path) = path else {
        return Some(root);
    };
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::execution::StepStatus;
    use serde_json::json;

    fn completed(step_id: &str, output: Value) -> StepResult {
        let mut result = StepResult::skipped(step_id);
        result.status = StepStatus::Completed;
        result.output = output;
        result.attempts = 1;
        result
    }

    fn make_ctx() -> WorkflowContext {
        let mut ctx = WorkflowContext::new(
            "wf",
            Uuid::now_v7(),
            Map::from_iter([
                ("user".to_string(), json!({ "name": "ada", "tags": ["x", "y"] })),
                ("count".to_string(), json!(7)),
            ]),
        );
        ctx.record(completed(
            "gather",
            json!({ "items": [{ "title": "first" }, { "title": "second" }], "total": 2, "none": null }),
        ));
        ctx.record(completed("echo", json!("plain text")));
        ctx
    }

    #[test]
    fn test_resolve_field_step_paths() {
        let ctx = make_ctx();
        assert_eq!(ctx.resolve_field("gather.total"), Some(json!(2)));
        assert_eq!(ctx.resolve_field("gather.items.1.title"), Some(json!("second")));
        assert_eq!(ctx.resolve_field("echo"), Some(json!("plain text")));
        assert_eq!(ctx.resolve_field("gather.none"), Some(Value::Null));
    }

    #[test]
    fn test_resolve_field_variables() {
        let ctx = make_ctx();
        assert_eq!(ctx.resolve_field("variables.count"), Some(json!(7)));
        assert_eq!(ctx.resolve_field("variables.user.name"), Some(json!("ada")));
        assert_eq!(ctx.resolve_field("variables.user.tags.0"), Some(json!("x")));
    }

    #[test]
    fn test_resolve_field_undefined() {
        let ctx = make_ctx();
        assert_eq!(ctx.resolve_field("missing.x"), None);
        assert_eq!(ctx.resolve_field("gather.items.9"), None);
        assert_eq!(ctx.resolve_field("gather.total.deeper"), None);
        assert_eq!(ctx.resolve_field("variables.nope"), None);
        assert_eq!(ctx.resolve_field("gather.items.first"), None);
    }

    #[test]
    fn test_resolve_template() {
        let ctx = make_ctx();
        let out = ctx.resolve_template("Hi ${variables.user.name}, ${gather.total} of ${ gather.items.0.title }");
        assert_eq!(out, "Hi ada, 2 of first");
    }

    #[test]
    fn test_resolve_template_keeps_unresolved_and_renders_json() {
        let ctx = make_ctx();
        let out = ctx.resolve_template("${nope.x} ${variables.user.tags} ${gather.none}");
        assert_eq!(out, r#"${nope.x} ["x","y"] null"#);
    }

    #[test]
    fn test_resolve_inputs_all_forms() {
        let ctx = make_ctx();
        let step = WorkflowStep::new("summarize")
            .with_input("limit", StepInput::literal(10))
            .with_input("first", StepInput::reference("gather", "items.0.title"))
            .with_input("ghost", StepInput::reference("gather", "items.5"))
            .with_input("prompt", StepInput::template("Summarize ${gather.total} items"));

        let inputs = ctx.resolve_inputs(&step);
        assert_eq!(inputs.get("limit"), Some(&json!(10)));
        assert_eq!(inputs.get("first"), Some(&json!("first")));
        assert_eq!(inputs.get("prompt"), Some(&json!("Summarize 2 items")));
        assert!(!inputs.contains_key("ghost"));
    }

    #[test]
    fn test_resolve_outputs() {
        let ctx = make_ctx();
        let mut def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "Wf",
            "steps": [{ "id": "gather", "name": "Gather" }]
        }))
        .unwrap();
        def.outputs.insert("total".to_string(), "gather.total".to_string());
        def.outputs.insert("line".to_string(), "${gather.total} items".to_string());
        def.outputs.insert("missing".to_string(), "nope.field".to_string());

        let outputs = ctx.resolve_outputs(&def);
        assert_eq!(outputs.get("total"), Some(&json!(2)));
        assert_eq!(outputs.get("line"), Some(&json!("2 items")));
        assert!(!outputs.contains_key("missing"));
    }

    #[test]
    fn test_record_keeps_first_position() {
        let mut ctx = make_ctx();
        ctx.record(completed("gather", json!({ "total": 3 })));
        let ids: Vec<String> = ctx.results().into_iter().map(|r| r.step_id).collect();
        assert_eq!(ids, vec!["gather", "echo"]);
        assert_eq!(ctx.resolve_field("gather.total"), Some(json!(3)));
    }

    #[test]
    fn test_finish_sets_state_and_end_time() {
        let mut ctx = make_ctx();
        assert_eq!(ctx.state, WorkflowState::Running);
        ctx.finish(WorkflowState::Completed);
        assert_eq!(ctx.state, WorkflowState::Completed);
        assert!(ctx.end_time.is_some());
    }

    #[test]
    fn test_placeholders() {
        let found: Vec<&str> = placeholders("${a.b} and ${ c.d.e } but not $x").collect();
        assert_eq!(found, vec!["a.b", "c.d.e"]);
    }
}
