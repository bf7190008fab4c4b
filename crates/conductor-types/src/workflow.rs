//! Workflow definition types for Conductor.
//!
//! Defines the canonical representation of a workflow: YAML files and
//! programmatically built definitions both convert to and from
//! `WorkflowDefinition`. Field order in these structs is the order used when
//! a definition is serialized back to YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow: an ordered list of steps and parallel groups
/// forming a dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow ID (`^[a-z][a-z0-9_-]*$`, case-insensitive).
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered step entries. Declaration order drives planning and lint.
    pub steps: Vec<StepEntry>,
    /// Default values for context variables, overridden by caller variables.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    /// Declared workflow outputs: output name -> field path or `${...}` template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Declarative trigger configurations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerConfig>,
    /// Default per-step timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Default per-step retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Iterate over every step, top-level and nested in parallel groups,
    /// in declaration order.
    pub fn all_steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.iter().flat_map(|entry| entry.steps())
    }

    /// Find a step by ID anywhere in the workflow.
    pub fn find_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.all_steps().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Step entries
// ---------------------------------------------------------------------------

/// A top-level entry in `WorkflowDefinition::steps`.
///
/// A mapping with `parallel` and `steps` keys is a group; anything else is a
/// single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepEntry {
    /// A cluster of steps run concurrently under a concurrency cap.
    Parallel(ParallelStepGroup),
    /// A single step.
    Step(WorkflowStep),
}

impl StepEntry {
    /// The steps contained in this entry (one for a plain step).
    pub fn steps(&self) -> std::slice::Iter<'_, WorkflowStep> {
        match self {
            StepEntry::Parallel(group) => group.steps.iter(),
            StepEntry::Step(step) => std::slice::from_ref(step).iter(),
        }
    }
}

impl From<WorkflowStep> for StepEntry {
    fn from(step: WorkflowStep) -> Self {
        StepEntry::Step(step)
    }
}

impl From<ParallelStepGroup> for StepEntry {
    fn from(group: ParallelStepGroup) -> Self {
        StepEntry::Parallel(group)
    }
}

/// A single unit of work in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step ID, unique across the whole workflow.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Agent team responsible for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Free-form step kind interpreted by the executor.
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    /// Instructions or payload handed to the executor.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Named inputs resolved before each execution.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, StepInput>,
    /// Gate evaluated before the step runs; false means skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionExpression>,
    /// Step IDs this step depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Retry policy (falls back to the workflow default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Keep the workflow running when this step exhausts its attempts.
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_failure: bool,
    /// Output field names this step declares.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

fn default_step_type() -> String {
    "task".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl WorkflowStep {
    /// Create a step with the given ID and defaults for everything else.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            team: None,
            step_type: default_step_type(),
            content: String::new(),
            inputs: BTreeMap::new(),
            condition: None,
            depends_on: Vec::new(),
            retry: None,
            timeout_ms: None,
            continue_on_failure: false,
            outputs: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: ConditionExpression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, input: StepInput) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }
}

/// A declared cluster of steps meant to run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStepGroup {
    /// Always `true`; marks the mapping as a group.
    pub parallel: bool,
    /// Steps in the group, in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// Maximum number of group steps running at once (1-10).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Wait for in-flight siblings before aborting on a fatal failure.
    #[serde(default = "default_wait_for_all")]
    pub wait_for_all: bool,
}

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_wait_for_all() -> bool {
    true
}

impl ParallelStepGroup {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self {
            parallel: true,
            steps,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            wait_for_all: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Step inputs
// ---------------------------------------------------------------------------

/// A named step input. Exactly one form per input.
///
/// ```yaml
/// inputs:
///   limit: { value: 10 }
///   articles: { from_step: gather, field: items }
///   prompt: { template: "Summarize ${gather.title}" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepInput {
    /// Dotted-path lookup into another step's output.
    Reference { from_step: String, field: String },
    /// String with `${...}` placeholders.
    Template { template: String },
    /// Literal value passed as-is.
    Literal { value: Value },
}

impl StepInput {
    pub fn literal(value: impl Into<Value>) -> Self {
        StepInput::Literal {
            value: value.into(),
        }
    }

    pub fn reference(from_step: impl Into<String>, field: impl Into<String>) -> Self {
        StepInput::Reference {
            from_step: from_step.into(),
            field: field.into(),
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        StepInput::Template {
            template: template.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Boolean expression tree deciding whether a step runs.
///
/// On the wire a mapping carrying `conditions` is a group, anything else is a
/// leaf comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionExpression {
    Group(ConditionGroup),
    Leaf(Condition),
}

impl ConditionExpression {
    pub fn leaf(field: impl Into<String>, operator: ConditionOperator, value: Option<Value>) -> Self {
        ConditionExpression::Leaf(Condition {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn all(conditions: Vec<ConditionExpression>) -> Self {
        ConditionExpression::Group(ConditionGroup {
            operator: GroupOperator::And,
            conditions,
        })
    }

    pub fn any(conditions: Vec<ConditionExpression>) -> Self {
        ConditionExpression::Group(ConditionGroup {
            operator: GroupOperator::Or,
            conditions,
        })
    }
}

/// A single comparison against a resolved field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// `"<stepId>.<path>"` or `"variables.<path>"`.
    pub field: String,
    pub operator: ConditionOperator,
    /// `None` when the key is absent; an explicit `null` is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Comparison operator for a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Matches,
    Exists,
    NotExists,
    /// Any operator name not listed above. Always evaluates to false.
    #[serde(other)]
    Unrecognized,
}

impl ConditionOperator {
    /// Wire names of every recognized operator.
    pub const NAMES: [&'static str; 11] = [
        "equals",
        "not_equals",
        "contains",
        "not_contains",
        "greater_than",
        "less_than",
        "greater_than_or_equal",
        "less_than_or_equal",
        "matches",
        "exists",
        "not_exists",
    ];
}

/// A boolean combination of nested expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub operator: GroupOperator,
    pub conditions: Vec<ConditionExpression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperator {
    And,
    Or,
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry configuration for a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, first included (1-10, default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (0-60000, default 1000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt (1-5, default 2).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// A single attempt with no retries.
    pub const NONE: RetryConfig = RetryConfig {
        max_attempts: 1,
        delay_ms: 0,
        backoff_multiplier: 1.0,
    };
}

// ---------------------------------------------------------------------------
// Trigger Configuration
// ---------------------------------------------------------------------------

/// How a workflow is meant to be started. Declarative only; the engine
/// does not schedule triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Started explicitly via CLI or API.
    Manual {},
    /// Cron schedule.
    Cron {
        schedule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Incoming webhook.
    Webhook { path: String },
    /// Platform event.
    Event {
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl TriggerConfig {
    pub const TYPES: [&'static str; 4] = ["manual", "cron", "webhook", "event"];
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "daily-digest".to_string(),
            name: "Daily Digest".to_string(),
            version: "1.0.0".to_string(),
            description: Some("Gather news, analyze, summarize".to_string()),
            steps: vec![
                WorkflowStep::new("gather").into(),
                ParallelStepGroup::new(vec![
                    WorkflowStep::new("analyze")
                        .depends_on(["gather"])
                        .with_input("items", StepInput::reference("gather", "items")),
                    WorkflowStep::new("score")
                        .depends_on(["gather"])
                        .with_condition(ConditionExpression::leaf(
                            "variables.scoring",
                            ConditionOperator::Equals,
                            Some(json!(true)),
                        )),
                ])
                .into(),
            ],
            variables: Map::from_iter([("scoring".to_string(), json!(true))]),
            outputs: BTreeMap::from([("summary".to_string(), "analyze.text".to_string())]),
            triggers: vec![
                TriggerConfig::Manual {},
                TriggerConfig::Cron {
                    schedule: "0 9 * * *".to_string(),
                    timezone: None,
                },
            ],
            timeout_ms: Some(60_000),
            retry: Some(RetryConfig::default()),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_workflow_definition_yaml_roundtrip() {
        let original = sample_workflow();
        let yaml = serde_yaml_ng::to_string(&original).expect("serialize to YAML");

        assert!(yaml.contains("parallel: true"));
        assert!(yaml.contains("type: cron"));
        assert!(yaml.contains("from_step: gather"));

        let restored: WorkflowDefinition = serde_yaml_ng::from_str(&yaml).expect("parse YAML");
        assert_eq!(restored, original);
    }

    #[test]
    fn test_step_entry_disambiguation() {
        let yaml = r#"
- id: a
  name: A
- parallel: true
  steps:
    - id: b
      name: B
"#;
        let entries: Vec<StepEntry> = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(matches!(entries[0], StepEntry::Step(_)));
        assert!(matches!(entries[1], StepEntry::Parallel(_)));
        assert_eq!(entries[1].steps().count(), 1);
    }

    #[test]
    fn test_parallel_group_defaults() {
        let yaml = "parallel: true\nsteps: []\n";
        let group: ParallelStepGroup = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(group.max_concurrency, 5);
        assert!(group.wait_for_all);
    }

    #[test]
    fn test_step_defaults() {
        let step: WorkflowStep = serde_yaml_ng::from_str("id: a\nname: A\n").unwrap();
        assert_eq!(step.step_type, "task");
        assert!(!step.continue_on_failure);
        assert!(step.depends_on.is_empty());
        assert!(step.retry.is_none());
    }

    #[test]
    fn test_retry_config_defaults() {
        let config: RetryConfig = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_ms, 1000);
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_step_input_forms() {
        let literal: StepInput = serde_json::from_value(json!({ "value": [1, 2] })).unwrap();
        assert_eq!(literal, StepInput::literal(json!([1, 2])));

        let reference: StepInput =
            serde_json::from_value(json!({ "from_step": "a", "field": "x.y" })).unwrap();
        assert_eq!(reference, StepInput::reference("a", "x.y"));

        let template: StepInput =
            serde_json::from_value(json!({ "template": "hi ${variables.name}" })).unwrap();
        assert_eq!(template, StepInput::template("hi ${variables.name}"));
    }

    #[test]
    fn test_condition_group_vs_leaf() {
        let expr: ConditionExpression = serde_json::from_value(json!({
            "operator": "or",
            "conditions": [
                { "field": "variables.count", "operator": "greater_than", "value": 5 },
                {
                    "operator": "and",
                    "conditions": [{ "field": "a.ok", "operator": "exists" }]
                }
            ]
        }))
        .unwrap();

        match expr {
            ConditionExpression::Group(group) => {
                assert_eq!(group.operator, GroupOperator::Or);
                assert!(matches!(group.conditions[0], ConditionExpression::Leaf(_)));
                assert!(matches!(group.conditions[1], ConditionExpression::Group(_)));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_condition_explicit_null_value_is_kept() {
        let yaml = "field: a.x\noperator: equals\nvalue: null\n";
        let expr: ConditionExpression = serde_yaml_ng::from_str(yaml).unwrap();
        let ConditionExpression::Leaf(cond) = &expr else {
            panic!("expected leaf, got {expr:?}");
        };
        assert_eq!(cond.value, Some(Value::Null));

        let out = serde_yaml_ng::to_string(&expr).unwrap();
        assert!(out.contains("value: null"), "got: {out}");

        let absent: Condition =
            serde_yaml_ng::from_str("field: a.x\noperator: exists\n").unwrap();
        assert_eq!(absent.value, None);
        assert!(!serde_yaml_ng::to_string(&absent).unwrap().contains("value"));
    }

    #[test]
    fn test_unknown_operator_deserializes_as_unrecognized() {
        let cond: Condition =
            serde_json::from_value(json!({ "field": "a.b", "operator": "between" })).unwrap();
        assert_eq!(cond.operator, ConditionOperator::Unrecognized);
    }

    #[test]
    fn test_serialization_skips_defaults() {
        let yaml = serde_yaml_ng::to_string(&WorkflowStep::new("solo")).unwrap();
        assert!(!yaml.contains("continue_on_failure"));
        assert!(!yaml.contains("depends_on"));
        assert!(yaml.contains("type: task"));
    }
}
