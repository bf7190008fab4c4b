//! Condition evaluation for step gating.
//!
//! Evaluates a `ConditionExpression` tree against a `WorkflowContext`.
//! Evaluation never fails: anything that cannot be compared (wrong types,
//! undefined fields, bad regex, unknown operator) evaluates to false.

use conductor_types::workflow::{
    Condition, ConditionExpression, ConditionOperator, GroupOperator,
};
use regex::Regex;
use serde_json::Value;

use super::context::WorkflowContext;

/// Evaluate an expression tree. `and` groups need every child true, `or`
/// groups any child.
pub fn evaluate(expr: &ConditionExpression, ctx: &WorkflowContext) -> bool {
    match expr {
        ConditionExpression::Leaf(condition) => evaluate_condition(condition, ctx),
        ConditionExpression::Group(group) => match group.operator {
            GroupOperator::And => group.conditions.iter().all(|c| evaluate(c, ctx)),
            GroupOperator::Or => group.conditions.iter().any(|c| evaluate(c, ctx)),
        },
    }
}

/// Evaluate a single leaf comparison.
pub fn evaluate_condition(condition: &Condition, ctx: &WorkflowContext) -> bool {
    let actual = ctx.resolve_field(&condition.field);
    let result = compare(condition.operator, actual.as_ref(), condition.value.as_ref());
    tracing::trace!(
        field = %condition.field,
        operator = ?condition.operator,
        result,
        "evaluated condition"
    );
    result
}

/// Apply `operator` to a resolved value. `None` stands for undefined.
pub fn compare(operator: ConditionOperator, actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match operator {
        ConditionOperator::Equals => strict_equals(actual, expected),
        ConditionOperator::NotEquals => !strict_equals(actual, expected),
        ConditionOperator::Contains => contains(actual, expected).unwrap_or(false),
        ConditionOperator::NotContains => contains(actual, expected).is_some_and(|found| !found),
        ConditionOperator::GreaterThan => numbers(actual, expected).is_some_and(|(a, b)| a > b),
        ConditionOperator::LessThan => numbers(actual, expected).is_some_and(|(a, b)| a < b),
        ConditionOperator::GreaterThanOrEqual => {
            numbers(actual, expected).is_some_and(|(a, b)| a >= b)
        }
        ConditionOperator::LessThanOrEqual => {
            numbers(actual, expected).is_some_and(|(a, b)| a <= b)
        }
        ConditionOperator::Matches => matches_pattern(actual, expected),
        ConditionOperator::Exists => is_present(actual),
        ConditionOperator::NotExists => !is_present(actual),
        ConditionOperator::Unrecognized => false,
    }
}

/// Strict equality: numbers compare by value (`1 == 1.0`), undefined only
/// equals undefined, and null is distinct from undefined.
fn strict_equals(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Substring test for strings, membership test for arrays. `None` when the
/// test does not apply to the operand types.
fn contains(actual: Option<&Value>, expected: Option<&Value>) -> Option<bool> {
    match (actual?, expected) {
        (Value::String(haystack), Some(Value::String(needle))) => {
            Some(haystack.contains(needle.as_str()))
        }
        (Value::Array(items), Some(needle)) => {
            Some(items.iter().any(|item| strict_equals(Some(item), Some(needle))))
        }
        (Value::Array(_), None) => Some(false),
        _ => None,
    }
}

fn numbers(actual: Option<&Value>, expected: Option<&Value>) -> Option<(f64, f64)> {
    match (actual?, expected?) {
        (Value::Number(a), Value::Number(b)) => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

fn matches_pattern(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let (Some(Value::String(text)), Some(Value::String(pattern))) = (actual, expected) else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "invalid regex in condition");
            false
        }
    }
}

fn is_present(actual: Option<&Value>) -> bool {
    actual.is_some_and(|v| !v.is_null())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::execution::{StepResult, StepStatus};
    use serde_json::{json, Map};
    use uuid::Uuid;

    fn make_ctx() -> WorkflowContext {
        let mut ctx = WorkflowContext::new(
            "wf",
            Uuid::now_v7(),
            Map::from_iter([
                ("count".to_string(), json!(10)),
                ("mode".to_string(), json!("full")),
                ("empty".to_string(), Value::Null),
            ]),
        );
        let mut result = StepResult::skipped("review");
        result.status = StepStatus::Completed;
        result.output = json!({
            "verdict": "approved with comments",
            "labels": ["bug", "urgent"],
            "score": 0.75
        });
        ctx.record(result);
        ctx
    }

    fn leaf(field: &str, op: ConditionOperator, value: Option<Value>) -> ConditionExpression {
        ConditionExpression::leaf(field, op, value)
    }

    #[test]
    fn test_greater_than_on_variable() {
        let ctx = make_ctx();
        assert!(evaluate(&leaf("variables.count", ConditionOperator::GreaterThan, Some(json!(5))), &ctx));
        assert!(!evaluate(&leaf("variables.count", ConditionOperator::GreaterThan, Some(json!(10))), &ctx));
        assert!(evaluate(
            &leaf("variables.count", ConditionOperator::GreaterThanOrEqual, Some(json!(10))),
            &ctx
        ));
    }

    #[test]
    fn test_and_group_requires_all() {
        let ctx = make_ctx();
        let both = ConditionExpression::all(vec![
            leaf("variables.count", ConditionOperator::GreaterThan, Some(json!(5))),
            leaf("variables.mode", ConditionOperator::Equals, Some(json!("full"))),
        ]);
        assert!(evaluate(&both, &ctx));

        let one_false = ConditionExpression::all(vec![
            leaf("variables.count", ConditionOperator::GreaterThan, Some(json!(5))),
            leaf("variables.mode", ConditionOperator::Equals, Some(json!("lite"))),
        ]);
        assert!(!evaluate(&one_false, &ctx));
    }

    #[test]
    fn test_nested_or_group() {
        let ctx = make_ctx();
        let expr = ConditionExpression::any(vec![
            leaf("variables.mode", ConditionOperator::Equals, Some(json!("lite"))),
            ConditionExpression::all(vec![
                leaf("review.score", ConditionOperator::LessThan, Some(json!(1))),
                leaf("review.labels", ConditionOperator::Contains, Some(json!("urgent"))),
            ]),
        ]);
        assert!(evaluate(&expr, &ctx));
        assert!(!evaluate(&ConditionExpression::any(vec![]), &ctx));
        assert!(evaluate(&ConditionExpression::all(vec![]), &ctx));
    }

    #[test]
    fn test_equals_is_strict() {
        assert!(compare(ConditionOperator::Equals, Some(&json!(1)), Some(&json!(1.0))));
        assert!(!compare(ConditionOperator::Equals, Some(&json!(1)), Some(&json!("1"))));
        assert!(!compare(ConditionOperator::Equals, None, Some(&Value::Null)));
        assert!(compare(ConditionOperator::Equals, Some(&Value::Null), Some(&Value::Null)));
        assert!(compare(ConditionOperator::NotEquals, None, Some(&Value::Null)));
        assert!(compare(ConditionOperator::Equals, Some(&json!({"a": [1]})), Some(&json!({"a": [1]}))));
    }

    #[test]
    fn test_null_comparison_from_yaml() {
        let ctx = make_ctx();
        let parse = |yaml: &str| -> ConditionExpression { serde_yaml_ng::from_str(yaml).unwrap() };

        let is_null = parse("field: variables.empty\noperator: equals\nvalue: null\n");
        assert!(evaluate(&is_null, &ctx));

        let missing_not_null = parse("field: variables.missing\noperator: not_equals\nvalue: null\n");
        assert!(evaluate(&missing_not_null, &ctx));

        let missing_is_null = parse("field: variables.missing\noperator: equals\nvalue: null\n");
        assert!(!evaluate(&missing_is_null, &ctx));

        // no `value` key compares against undefined
        let no_value = parse("field: variables.empty\noperator: equals\n");
        assert!(!evaluate(&no_value, &ctx));
    }

    #[test]
    fn test_contains_and_not_contains() {
        let ctx = make_ctx();
        assert!(evaluate(&leaf("review.verdict", ConditionOperator::Contains, Some(json!("approved"))), &ctx));
        assert!(evaluate(&leaf("review.labels", ConditionOperator::NotContains, Some(json!("wontfix"))), &ctx));
        assert!(!evaluate(&leaf("review.labels", ConditionOperator::NotContains, Some(json!("bug"))), &ctx));
        // Neither test applies to a number.
        assert!(!evaluate(&leaf("review.score", ConditionOperator::Contains, Some(json!("7"))), &ctx));
        assert!(!evaluate(&leaf("review.score", ConditionOperator::NotContains, Some(json!("7"))), &ctx));
        assert!(!evaluate(&leaf("missing.x", ConditionOperator::NotContains, Some(json!("a"))), &ctx));
    }

    #[test]
    fn test_ordering_is_numeric_only() {
        assert!(!compare(ConditionOperator::GreaterThan, Some(&json!("9")), Some(&json!(1))));
        assert!(!compare(ConditionOperator::LessThan, None, Some(&json!(1))));
        assert!(compare(ConditionOperator::LessThanOrEqual, Some(&json!(-2.5)), Some(&json!(-2.5))));
    }

    #[test]
    fn test_matches_regex() {
        let ctx = make_ctx();
        assert!(evaluate(&leaf("review.verdict", ConditionOperator::Matches, Some(json!("^approved\\b"))), &ctx));
        assert!(!evaluate(&leaf("review.verdict", ConditionOperator::Matches, Some(json!("^rejected"))), &ctx));
        assert!(!evaluate(&leaf("review.verdict", ConditionOperator::Matches, Some(json!("(unclosed"))), &ctx));
        assert!(!evaluate(&leaf("review.score", ConditionOperator::Matches, Some(json!("0"))), &ctx));
    }

    #[test]
    fn test_exists_and_not_exists() {
        let ctx = make_ctx();
        assert!(evaluate(&leaf("review.score", ConditionOperator::Exists, None), &ctx));
        assert!(!evaluate(&leaf("variables.empty", ConditionOperator::Exists, None), &ctx));
        assert!(evaluate(&leaf("variables.empty", ConditionOperator::NotExists, None), &ctx));
        assert!(evaluate(&leaf("nobody.home", ConditionOperator::NotExists, None), &ctx));
    }

    #[test]
    fn test_unrecognized_operator_is_false() {
        let ctx = make_ctx();
        assert!(!evaluate(&leaf("variables.count", ConditionOperator::Unrecognized, Some(json!(10))), &ctx));
    }
}
