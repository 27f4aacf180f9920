//! `llm` / `ai-processing` — one chat completion against an
//! OpenAI-compatible endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::send;
use super::parse_config;
use crate::template::render;
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock, LlmSettings};

#[derive(Debug, Deserialize)]
struct LlmConfig {
    prompt: String,
    system: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    #[serde(default = "default_output_key")]
    output_key: String,
}

fn default_output_key() -> String {
    "llm_output".to_string()
}

pub struct LlmBlock {
    client: Client,
    settings: LlmSettings,
    timeout: Duration,
}

impl LlmBlock {
    pub fn new(client: Client, settings: LlmSettings, timeout: Duration) -> Self {
        Self {
            client,
            settings,
            timeout,
        }
    }
}

#[async_trait]
impl ExecutableBlock for LlmBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: LlmConfig = parse_config(&invocation.config)?;

        let Some(api_key) = &self.settings.api_key else {
            return Err(BlockError::Fatal("LLM API key is not configured".into()));
        };

        let body = completion_request(&cfg, &self.settings.default_model, context)?;
        debug!(
            "block '{}' requesting completion from {}",
            invocation.block_name, self.settings.endpoint
        );

        let request = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&body);

        let (_, response) = send(request, &self.settings.endpoint).await?;

        let content = extract_completion(&response).ok_or_else(|| {
            BlockError::Fatal("LLM response has no choices[0].message.content".into())
        })?;

        let mut out = Context::new();
        out.insert(cfg.output_key, Value::String(content));
        Ok(out)
    }
}

fn completion_request(
    cfg: &LlmConfig,
    default_model: &str,
    context: &Context,
) -> Result<Value, BlockError> {
    let mut messages = Vec::new();
    if let Some(system) = &cfg.system {
        messages.push(json!({ "role": "system", "content": render(system, context)? }));
    }
    messages.push(json!({ "role": "user", "content": render(&cfg.prompt, context)? }));

    let mut body = json!({
        "model": cfg.model.as_deref().unwrap_or(default_model),
        "messages": messages,
    });
    if let Some(t) = cfg.temperature {
        body["temperature"] = json!(t);
    }
    Ok(body)
}

fn extract_completion(response: &Value) -> Option<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, invocation};

    #[test]
    fn builds_request_with_rendered_prompt() {
        let cfg: LlmConfig = parse_config(&json!({
            "prompt": "Summarise {{text}}",
            "system": "You are terse.",
            "temperature": 0.2
        }))
        .unwrap();
        let body =
            completion_request(&cfg, "default-model", &context(json!({ "text": "abc" }))).unwrap();

        assert_eq!(body["model"], json!("default-model"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("Summarise abc"));
        assert_eq!(body["temperature"], json!(0.2));
    }

    #[test]
    fn extracts_first_choice() {
        let response = json!({ "choices": [ { "message": { "role": "assistant", "content": "hi" } } ] });
        assert_eq!(extract_completion(&response).as_deref(), Some("hi"));
        assert_eq!(extract_completion(&json!({ "choices": [] })), None);
    }

    #[tokio::test]
    async fn missing_api_key_is_fatal() {
        let block = LlmBlock::new(Client::new(), LlmSettings::default(), Duration::from_secs(1));
        let err = block
            .execute(&Context::new(), &invocation(json!({ "prompt": "hello" })))
            .await
            .unwrap_err();
        assert_eq!(err, BlockError::Fatal("LLM API key is not configured".into()));
    }
}
