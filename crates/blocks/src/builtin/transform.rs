//! `data_transform` — derive new context keys without side effects.
//!
//! ```json
//! { "set": { "greeting": "Hello {{user.name}}" }, "copy": { "total": "order.total" } }
//! ```
//!
//! `set` values are rendered as templates; `copy` maps a target key to a
//! dotted source path. Keys missing from the context copy as `null`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::parse_config;
use crate::template::{lookup, render_value};
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

#[derive(Debug, Deserialize)]
struct TransformConfig {
    #[serde(default)]
    set: BTreeMap<String, Value>,
    #[serde(default)]
    copy: BTreeMap<String, String>,
}

pub struct TransformBlock;

#[async_trait]
impl ExecutableBlock for TransformBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: TransformConfig = parse_config(&invocation.config)?;
        let mut out = Context::new();

        for (target, source) in &cfg.copy {
            let value = lookup(context, source).cloned().unwrap_or(Value::Null);
            out.insert(target.clone(), value);
        }

        // `set` wins over `copy` for the same key.
        for (key, template) in &cfg.set {
            out.insert(key.clone(), render_value(template, context)?);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, invocation};
    use serde_json::json;

    #[tokio::test]
    async fn sets_and_copies_keys() {
        let ctx = context(json!({ "user": { "name": "Ada" }, "order": { "total": 42 } }));
        let cfg = json!({
            "set": { "greeting": "Hello {{user.name}}", "flag": true },
            "copy": { "total": "order.total", "ghost": "nope" }
        });

        let out = TransformBlock.execute(&ctx, &invocation(cfg)).await.unwrap();

        assert_eq!(out["greeting"], json!("Hello Ada"));
        assert_eq!(out["flag"], json!(true));
        assert_eq!(out["total"], json!(42));
        assert_eq!(out["ghost"], Value::Null);
        // The caller's context is untouched.
        assert!(!ctx.contains_key("greeting"));
    }

    #[tokio::test]
    async fn empty_config_is_an_empty_delta() {
        let out = TransformBlock
            .execute(&Context::new(), &invocation(Value::Null))
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
