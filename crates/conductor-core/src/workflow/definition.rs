//! Workflow definition validation.
//!
//! Validates raw documents (parsed YAML or JSON) against the workflow schema,
//! collecting every violated constraint rather than stopping at the first,
//! and provides the dependency checks the planner relies on: id enumeration,
//! unknown and self dependencies, and cycle detection. Duplicate ids are
//! reported by the schema walk.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use conductor_types::workflow::{ConditionOperator, TriggerConfig, WorkflowDefinition};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Pattern for workflow and step IDs.
pub static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z0-9_-]*$").expect("ID pattern is valid"));

const MAX_CONCURRENCY_RANGE: (u64, u64) = (1, 10);
const MAX_ATTEMPTS_RANGE: (u64, u64) = (1, 10);
const DELAY_MS_RANGE: (u64, u64) = (0, 60_000);
const BACKOFF_RANGE: (f64, f64) = (1.0, 5.0);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A single violated schema constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Location in the document, e.g. `steps[2].retry.max_attempts`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every schema violation found in a definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid workflow definition ({} issue(s)): {}", .issues.len(), join_issues(.issues))]
pub struct SchemaError {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaError {
    fn single(path: &str, message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue {
                path: path.to_string(),
                message: message.into(),
            }],
        }
    }
}

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

/// Validate a raw document and convert it into a `WorkflowDefinition`.
///
/// All violations are reported together in the returned `SchemaError`.
pub fn validate(raw: &Value) -> Result<WorkflowDefinition, SchemaError> {
    let mut check = SchemaCheck::default();
    check.workflow(raw);
    check.finish()?;

    serde_json::from_value(raw.clone()).map_err(|e| SchemaError::single("$", e.to_string()))
}

/// Validate a programmatically built definition against the same schema.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), SchemaError> {
    let raw = serde_json::to_value(def).map_err(|e| SchemaError::single("$", e.to_string()))?;
    let mut check = SchemaCheck::default();
    check.workflow(&raw);
    check.finish()
}

#[derive(Default)]
struct SchemaCheck {
    issues: Vec<SchemaIssue>,
}

impl SchemaCheck {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(SchemaIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), SchemaError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaError {
                issues: self.issues,
            })
        }
    }

    fn workflow(&mut self, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push("$", "expected a mapping");
            return;
        };

        self.id(obj, "id", "id");
        self.non_empty_string(obj, "name", "name");
        self.optional_string(obj, "version", "version");
        self.optional_string(obj, "description", "description");

        match obj.get("steps") {
            None => self.push("steps", "is required"),
            Some(Value::Array(entries)) if entries.is_empty() => {
                self.push("steps", "must contain at least one step")
            }
            Some(Value::Array(entries)) => {
                for (i, entry) in entries.iter().enumerate() {
                    let path = format!("steps[{i}]");
                    match entry.as_object() {
                        Some(group) if group.contains_key("parallel") => {
                            self.parallel_group(&path, group)
                        }
                        _ => self.step(&path, entry),
                    }
                }
            }
            Some(_) => self.push("steps", "must be a list"),
        }

        self.optional_object(obj, "variables", "variables");
        self.optional_object(obj, "metadata", "metadata");

        if let Some(outputs) = obj.get("outputs") {
            match outputs.as_object() {
                Some(map) => {
                    for (name, value) in map {
                        if !value.is_string() {
                            self.push(format!("outputs.{name}"), "must be a string");
                        }
                    }
                }
                None => self.push("outputs", "must be a mapping of output name to field path"),
            }
        }

        if let Some(triggers) = obj.get("triggers") {
            match triggers.as_array() {
                Some(list) => {
                    for (i, trigger) in list.iter().enumerate() {
                        self.trigger(&format!("triggers[{i}]"), trigger);
                    }
                }
                None => self.push("triggers", "must be a list"),
            }
        }

        self.positive_integer(obj, "timeout_ms", "timeout_ms");
        if let Some(retry) = obj.get("retry") {
            self.retry("retry", retry);
        }

        self.duplicate_ids(obj);
    }

    fn parallel_group(&mut self, path: &str, group: &Map<String, Value>) {
        if group.get("parallel") != Some(&Value::Bool(true)) {
            self.push(format!("{path}.parallel"), "must be true");
        }

        match group.get("steps") {
            None => self.push(format!("{path}.steps"), "is required"),
            Some(Value::Array(steps)) if steps.is_empty() => {
                self.push(format!("{path}.steps"), "must contain at least one step")
            }
            Some(Value::Array(steps)) => {
                for (j, step) in steps.iter().enumerate() {
                    self.step(&format!("{path}.steps[{j}]"), step);
                }
            }
            Some(_) => self.push(format!("{path}.steps"), "must be a list"),
        }

        self.integer_in_range(group, "max_concurrency", path, MAX_CONCURRENCY_RANGE);
        self.optional_bool(group, "wait_for_all", path);
    }

    fn step(&mut self, path: &str, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push(path, "expected a step mapping");
            return;
        };

        self.id(obj, "id", &format!("{path}.id"));
        self.non_empty_string(obj, "name", &format!("{path}.name"));
        self.optional_string(obj, "team", &format!("{path}.team"));
        self.optional_string(obj, "content", &format!("{path}.content"));
        if let Some(step_type) = obj.get("type") {
            if step_type.as_str().is_none_or(str::is_empty) {
                self.push(format!("{path}.type"), "must be a non-empty string");
            }
        }

        if let Some(inputs) = obj.get("inputs") {
            match inputs.as_object() {
                Some(map) => {
                    for (name, input) in map {
                        self.input(&format!("{path}.inputs.{name}"), input);
                    }
                }
                None => self.push(format!("{path}.inputs"), "must be a mapping"),
            }
        }

        if let Some(condition) = obj.get("condition") {
            self.condition(&format!("{path}.condition"), condition);
        }

        self.string_list(obj, "depends_on", &format!("{path}.depends_on"));
        self.string_list(obj, "outputs", &format!("{path}.outputs"));

        if let Some(retry) = obj.get("retry") {
            self.retry(&format!("{path}.retry"), retry);
        }
        self.positive_integer(obj, "timeout_ms", &format!("{path}.timeout_ms"));
        self.optional_bool(obj, "continue_on_failure", path);
    }

    fn input(&mut self, path: &str, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push(path, "expected a mapping with value, from_step/field, or template");
            return;
        };

        let is_reference = obj.contains_key("from_step") || obj.contains_key("field");
        let forms = [
            obj.contains_key("value"),
            is_reference,
            obj.contains_key("template"),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        if forms != 1 {
            self.push(
                path,
                "must define exactly one of value, from_step/field, or template",
            );
            return;
        }

        if is_reference {
            self.non_empty_string(obj, "from_step", &format!("{path}.from_step"));
            self.non_empty_string(obj, "field", &format!("{path}.field"));
        }
        if let Some(template) = obj.get("template") {
            if !template.is_string() {
                self.push(format!("{path}.template"), "must be a string");
            }
        }
    }

    fn condition(&mut self, path: &str, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push(path, "expected a condition mapping");
            return;
        };

        if let Some(conditions) = obj.get("conditions") {
            match obj.get("operator").and_then(Value::as_str) {
                Some("and" | "or") => {}
                _ => self.push(format!("{path}.operator"), "group operator must be 'and' or 'or'"),
            }
            match conditions.as_array() {
                Some(list) => {
                    for (i, nested) in list.iter().enumerate() {
                        self.condition(&format!("{path}.conditions[{i}]"), nested);
                    }
                }
                None => self.push(format!("{path}.conditions"), "must be a list"),
            }
            return;
        }

        self.non_empty_string(obj, "field", &format!("{path}.field"));
        match obj.get("operator") {
            None => self.push(format!("{path}.operator"), "is required"),
            Some(Value::String(op)) if ConditionOperator::NAMES.contains(&op.as_str()) => {}
            Some(Value::String(op)) => {
                self.push(format!("{path}.operator"), format!("unknown operator '{op}'"))
            }
            Some(_) => self.push(format!("{path}.operator"), "must be a string"),
        }
    }

    fn retry(&mut self, path: &str, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push(path, "expected a retry mapping");
            return;
        };

        self.integer_in_range(obj, "max_attempts", path, MAX_ATTEMPTS_RANGE);
        self.integer_in_range(obj, "delay_ms", path, DELAY_MS_RANGE);

        if let Some(value) = obj.get("backoff_multiplier") {
            let (min, max) = BACKOFF_RANGE;
            match value.as_f64() {
                Some(m) if (min..=max).contains(&m) => {}
                Some(_) => self.push(
                    format!("{path}.backoff_multiplier"),
                    format!("must be between {min} and {max}"),
                ),
                None => self.push(format!("{path}.backoff_multiplier"), "must be a number"),
            }
        }
    }

    fn trigger(&mut self, path: &str, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push(path, "expected a trigger mapping");
            return;
        };

        match obj.get("type").and_then(Value::as_str) {
            Some("manual") => {}
            Some("cron") => self.non_empty_string(obj, "schedule", &format!("{path}.schedule")),
            Some("webhook") => self.non_empty_string(obj, "path", &format!("{path}.path")),
            Some("event") => {
                self.non_empty_string(obj, "event_type", &format!("{path}.event_type"))
            }
            Some(other) => self.push(
                format!("{path}.type"),
                format!(
                    "unknown trigger type '{other}' (expected one of {})",
                    TriggerConfig::TYPES.join(", ")
                ),
            ),
            None => self.push(format!("{path}.type"), "is required"),
        }
    }

    fn duplicate_ids(&mut self, obj: &Map<String, Value>) {
        let Some(entries) = obj.get("steps").and_then(Value::as_array) else {
            return;
        };

        let mut seen = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let nested = entry
                .get("parallel")
                .and(entry.get("steps"))
                .and_then(Value::as_array);
            let located: Vec<(String, &Value)> = match nested {
                Some(steps) => steps
                    .iter()
                    .enumerate()
                    .map(|(j, s)| (format!("steps[{i}].steps[{j}].id"), s))
                    .collect(),
                None => vec![(format!("steps[{i}].id"), entry)],
            };
            for (path, step) in located {
                if let Some(id) = step.get("id").and_then(Value::as_str) {
                    if !seen.insert(id.to_lowercase()) {
                        self.push(path, format!("duplicate step id '{id}'"));
                    }
                }
            }
        }
    }

    // -- field helpers ------------------------------------------------------

    fn id(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        match obj.get(key) {
            None => self.push(path, "is required"),
            Some(Value::String(id)) if ID_PATTERN.is_match(id) => {}
            Some(Value::String(id)) => self.push(
                path,
                format!("'{id}' must match ^[a-z][a-z0-9_-]*$"),
            ),
            Some(_) => self.push(path, "must be a string"),
        }
    }

    fn non_empty_string(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        match obj.get(key) {
            None => self.push(path, "is required"),
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => self.push(path, "must not be empty"),
            Some(_) => self.push(path, "must be a string"),
        }
    }

    fn optional_string(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(value) = obj.get(key) {
            if !value.is_string() {
                self.push(path, "must be a string");
            }
        }
    }

    fn optional_object(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(value) = obj.get(key) {
            if !value.is_object() {
                self.push(path, "must be a mapping");
            }
        }
    }

    fn optional_bool(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) {
        if let Some(value) = obj.get(key) {
            if !value.is_boolean() {
                self.push(format!("{parent}.{key}"), "must be a boolean");
            }
        }
    }

    fn string_list(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        let Some(value) = obj.get(key) else {
            return;
        };
        match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        self.push(format!("{path}[{i}]"), "must be a string");
                    }
                }
            }
            None => self.push(path, "must be a list of strings"),
        }
    }

    fn positive_integer(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(value) = obj.get(key) {
            match value.as_u64() {
                Some(n) if n > 0 => {}
                _ => self.push(path, "must be a positive integer"),
            }
        }
    }

    fn integer_in_range(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        parent: &str,
        (min, max): (u64, u64),
    ) {
        if let Some(value) = obj.get(key) {
            match value.as_u64() {
                Some(n) if (min..=max).contains(&n) => {}
                _ => self.push(
                    format!("{parent}.{key}"),
                    format!("must be an integer between {min} and {max}"),
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency checks
// ---------------------------------------------------------------------------

/// All step IDs, top-level and nested in parallel groups, in declaration order.
pub fn get_all_step_ids(def: &WorkflowDefinition) -> Vec<&str> {
    def.all_steps().map(|s| s.id.as_str()).collect()
}

/// Check every `depends_on` reference. An empty list means the check passed.
pub fn validate_dependencies(def: &WorkflowDefinition) -> Vec<String> {
    let ids: HashSet<&str> = get_all_step_ids(def).into_iter().collect();
    let mut errors = Vec::new();

    for step in def.all_steps() {
        for dep in &step.depends_on {
            if dep == &step.id {
                errors.push(format!("step '{}' cannot depend on itself", step.id));
            } else if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ));
            }
        }
    }

    errors
}

/// Find dependency cycles with a depth-first search.
///
/// Each cycle is reported once as the path from the cycle's first node to the
/// repeated node, e.g. `circular dependency detected: a -> b -> a`.
pub fn detect_circular_dependencies(def: &WorkflowDefinition) -> Vec<String> {
    let order = get_all_step_ids(def);
    let adjacency: HashMap<&str, &[String]> = def
        .all_steps()
        .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
        .collect();

    let mut search = CycleSearch {
        adjacency: &adjacency,
        visited: HashSet::new(),
        on_stack: HashSet::new(),
        path: Vec::new(),
        cycles: Vec::new(),
    };

    for id in order {
        if !search.visited.contains(id) {
            search.visit(id);
        }
    }

    search.cycles
}

struct CycleSearch<'a, 'm> {
    adjacency: &'m HashMap<&'a str, &'a [String]>,
    visited: HashSet<&'a str>,
    on_stack: HashSet<&'a str>,
    path: Vec<&'a str>,
    cycles: Vec<String>,
}

impl<'a> CycleSearch<'a, '_> {
    fn visit(&mut self, node: &'a str) {
        self.visited.insert(node);
        self.on_stack.insert(node);
        self.path.push(node);

        let deps = self.adjacency.get(node).copied().unwrap_or_default();
        for dep in deps {
            let dep = dep.as_str();
            if self.on_stack.contains(dep) {
                let start = self.path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(dep);
                self.cycles.push(format!(
                    "circular dependency detected: {}",
                    cycle.join(" -> ")
                ));
            } else if !self.visited.contains(dep) && self.adjacency.contains_key(dep) {
                self.visit(dep);
            }
        }

        self.path.pop();
        self.on_stack.remove(node);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
