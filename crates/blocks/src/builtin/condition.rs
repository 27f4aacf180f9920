//! `condition` — evaluate a predicate against the context.
//!
//! ```json
//! { "field": "order.total", "operator": "gt", "value": 100, "fail_on_false": false }
//! ```
//!
//! Produces `{ "condition_result": bool }`. A block without a `field`
//! always evaluates to `true`. With `fail_on_false`, a false result fails
//! the block and therefore the execution.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::parse_config;
use crate::template::lookup;
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
    Truthy,
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    field: Option<String>,
    #[serde(default)]
    operator: Operator,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    fail_on_false: bool,
    #[serde(default = "default_output_key")]
    output_key: String,
}

fn default_output_key() -> String {
    "condition_result".to_string()
}

pub struct ConditionBlock;

#[async_trait]
impl ExecutableBlock for ConditionBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: ConditionConfig = parse_config(&invocation.config)?;

        let outcome = match &cfg.field {
            None => true,
            Some(field) => evaluate(cfg.operator, lookup(context, field), &cfg.value),
        };

        if !outcome && cfg.fail_on_false {
            return Err(BlockError::Fatal(format!(
                "condition on '{}' not met",
                cfg.field.unwrap_or_default()
            )));
        }

        let mut out = Context::new();
        out.insert(cfg.output_key, Value::Bool(outcome));
        Ok(out)
    }
}

fn evaluate(operator: Operator, actual: Option<&Value>, expected: &Value) -> bool {
    let actual_or_null = actual.unwrap_or(&Value::Null);

    match operator {
        Operator::Exists => actual.is_some_and(|v| !v.is_null()),
        Operator::Truthy => is_truthy(actual_or_null),
        Operator::Eq => loosely_equal(actual_or_null, expected),
        Operator::Ne => !loosely_equal(actual_or_null, expected),
        Operator::Gt => compare(actual_or_null, expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare(actual_or_null, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare(actual_or_null, expected) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare(actual_or_null, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Contains => match (actual_or_null, expected) {
            (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| loosely_equal(i, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, invocation};
    use serde_json::json;

    async fn run(config: Value, ctx: Value) -> Result<Context, BlockError> {
        ConditionBlock.execute(&context(ctx), &invocation(config)).await
    }

    #[tokio::test]
    async fn no_field_always_succeeds_true() {
        let out = run(Value::Null, json!({})).await.unwrap();
        assert_eq!(out["condition_result"], json!(true));
    }

    #[tokio::test]
    async fn numeric_comparison_on_nested_field() {
        let ctx = json!({ "order": { "total": 150 } });
        let gt = run(json!({ "field": "order.total", "operator": "gt", "value": 100 }), ctx.clone())
            .await
            .unwrap();
        assert_eq!(gt["condition_result"], json!(true));

        let lte = run(json!({ "field": "order.total", "operator": "lte", "value": 100 }), ctx)
            .await
            .unwrap();
        assert_eq!(lte["condition_result"], json!(false));
    }

    #[tokio::test]
    async fn eq_treats_integer_and_float_alike() {
        let out = run(json!({ "field": "x", "value": 1.0 }), json!({ "x": 1 })).await.unwrap();
        assert_eq!(out["condition_result"], json!(true));
    }

    #[tokio::test]
    async fn contains_exists_and_truthy() {
        let ctx = json!({ "tags": ["a", "b"], "name": "loops", "empty": "" });

        let contains = run(json!({ "field": "tags", "operator": "contains", "value": "b" }), ctx.clone());
        assert_eq!(contains.await.unwrap()["condition_result"], json!(true));

        let exists = run(json!({ "field": "missing", "operator": "exists" }), ctx.clone());
        assert_eq!(exists.await.unwrap()["condition_result"], json!(false));

        let truthy = run(json!({ "field": "empty", "operator": "truthy" }), ctx);
        assert_eq!(truthy.await.unwrap()["condition_result"], json!(false));
    }

    #[tokio::test]
    async fn fail_on_false_fails_the_block() {
        let err = run(
            json!({ "field": "x", "value": 2, "fail_on_false": true }),
            json!({ "x": 1 }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, BlockError::Fatal("condition on 'x' not met".into()));
    }

    #[tokio::test]
    async fn custom_output_key_and_unknown_operator() {
        let out = run(json!({ "output_key": "ok" }), json!({})).await.unwrap();
        assert_eq!(out["ok"], json!(true));

        let bad = run(json!({ "field": "x", "operator": "between" }), json!({})).await;
        assert!(matches!(bad, Err(BlockError::InvalidConfig(_))));
    }
}
