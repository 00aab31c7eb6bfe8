use std::cmp::Ordering;

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use weft_core::config::ScriptConfig;
use weft_core::definition::{ConditionOperator, ConditionRule, NodeConfig, NodeType};
use weft_core::error::{Result, WeftError};
use weft_transform::path::lookup;
use weft_transform::script::eval_expression;
use weft_transform::value::{as_number, display, is_empty, is_truthy, loose_eq};

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// ANDs its rules and leaves through port `"true"` or `"false"`, passing
/// the primary input on.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Condition(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Condition));
            };
            let input = ctx.primary_input();
            let variables = Value::Object(ctx.variables().await);

            let mut passed = true;
            for rule in &config.rules {
                if !evaluate_rule(rule, &input, &variables, &ctx.config().script)? {
                    passed = false;
                    break;
                }
            }
            debug!(node_id = %ctx.node.id, passed, rules = config.rules.len(), "Condition evaluated");
            Ok(NodeOutcome::new(input).with_port(if passed { "true" } else { "false" }))
        })
    }
}

/// Evaluate one rule. The field is looked up in `input` first, then in
/// `variables`; an empty field means the input itself.
pub(crate) fn evaluate_rule(
    rule: &ConditionRule,
    input: &Value,
    variables: &Value,
    script: &ScriptConfig,
) -> Result<bool> {
    let actual = if rule.field.is_empty() {
        input.clone()
    } else {
        lookup(input, &rule.field)
            .or_else(|| lookup(variables, &rule.field))
            .unwrap_or(Value::Null)
    };
    let expected = rule.value.clone().unwrap_or(Value::Null);

    Ok(match rule.operator {
        ConditionOperator::Equals => loose_eq(&actual, &expected),
        ConditionOperator::NotEquals => !loose_eq(&actual, &expected),
        ConditionOperator::Contains => contains(&actual, &expected),
        ConditionOperator::NotContains => !contains(&actual, &expected),
        ConditionOperator::GreaterThan => compare(&actual, &expected) == Some(Ordering::Greater),
        ConditionOperator::LessThan => compare(&actual, &expected) == Some(Ordering::Less),
        ConditionOperator::IsEmpty => is_empty(&actual),
        ConditionOperator::IsNotEmpty => !is_empty(&actual),
        ConditionOperator::MatchesRegex => {
            let pattern = display(&expected);
            let re = Regex::new(&pattern)
                .map_err(|e| WeftError::Definition(format!("invalid regex '{}': {}", pattern, e)))?;
            re.is_match(&display(&actual))
        }
        ConditionOperator::Custom => {
            let expression = rule.expression.as_deref().ok_or_else(|| {
                WeftError::Definition("custom condition requires an expression".into())
            })?;
            let result = eval_expression(
                expression,
                &[("input", input), ("variables", variables), ("value", &actual)],
                script,
            )?;
            is_truthy(&result)
        }
    })
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&display(needle)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => map.contains_key(&display(needle)),
        _ => false,
    }
}

/// Numeric comparison when both sides coerce to numbers, else string order.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(x.cmp(y)),
        },
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::test_support::{node, run};
    use serde_json::json;

    fn check(rule: ConditionRule, input: Value) -> bool {
        evaluate_rule(&rule, &input, &json!({"limit": 10}), &ScriptConfig::default()).unwrap()
    }

    #[test]
    fn operators() {
        use ConditionOperator::*;
        let input = json!({
            "score": 7,
            "name": "Ada Lovelace",
            "tags": ["x", "y"],
            "empty": "",
            "count": "12"
        });
        assert!(check(ConditionRule::new("score", Equals, json!("7")), input.clone()));
        assert!(check(ConditionRule::new("score", NotEquals, json!(8)), input.clone()));
        assert!(check(ConditionRule::new("name", Contains, json!("Love")), input.clone()));
        assert!(check(ConditionRule::new("tags", Contains, json!("y")), input.clone()));
        assert!(check(ConditionRule::new("tags", NotContains, json!("z")), input.clone()));
        assert!(check(ConditionRule::new("score", GreaterThan, json!(5)), input.clone()));
        assert!(check(ConditionRule::new("count", GreaterThan, json!(9)), input.clone()));
        assert!(check(ConditionRule::new("score", LessThan, json!(10)), input.clone()));
        assert!(!check(ConditionRule::new("missing", GreaterThan, json!(0)), input.clone()));
        assert!(check(ConditionRule::new("empty", IsEmpty, Value::Null), input.clone()));
        assert!(check(ConditionRule::new("missing", IsEmpty, Value::Null), input.clone()));
        assert!(check(ConditionRule::new("name", IsNotEmpty, Value::Null), input.clone()));
        assert!(check(ConditionRule::new("name", MatchesRegex, json!("^Ada\\s")), input.clone()));
    }

    #[test]
    fn field_falls_back_to_variables() {
        assert!(check(
            ConditionRule::new("limit", ConditionOperator::Equals, json!(10)),
            json!({})
        ));
    }

    #[test]
    fn custom_expression_sees_input_and_value() {
        let rule = ConditionRule {
            field: "score".into(),
            ..ConditionRule::custom("value > 5 && input.name.startsWith('A')")
        };
        assert!(check(rule, json!({"score": 6, "name": "Ann"})));
        assert!(check(
            ConditionRule::custom("variables.limit === 10"),
            json!(null)
        ));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let rule = ConditionRule::new("a", ConditionOperator::MatchesRegex, json!("("));
        assert!(evaluate_rule(&rule, &json!({"a": "x"}), &json!({}), &ScriptConfig::default()).is_err());
    }

    #[tokio::test]
    async fn selects_port_and_passes_input() {
        let cond = node(
            "c",
            NodeType::Condition,
            json!({"rules": [
                {"field": "score", "operator": "greater_than", "value": 5},
                {"field": "status", "operator": "equals", "value": "open"}
            ]}),
        );
        let yes = run(cond.clone(), json!({"score": 9, "status": "open"})).await.unwrap();
        assert_eq!(yes.output_port.as_deref(), Some("true"));
        assert_eq!(yes.output, json!({"score": 9, "status": "open"}));

        let no = run(cond, json!({"score": 9, "status": "closed"})).await.unwrap();
        assert_eq!(no.output_port.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn no_rules_is_true() {
        let out = run(node("c", NodeType::Condition, json!({})), json!(1)).await.unwrap();
        assert_eq!(out.output_port.as_deref(), Some("true"));
    }
}
