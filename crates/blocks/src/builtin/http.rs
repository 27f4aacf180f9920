//! `http` and `webhook` — outbound HTTP requests.
//!
//! Failures are classified for the engine's retry loop: transport errors,
//! timeouts, `429` and `5xx` responses are retryable; other `4xx` responses
//! are fatal.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::parse_config;
use crate::template::{render, render_value};
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

/// Send `request` and return `(status, body)`; the body is parsed as JSON
/// when possible and kept as a string otherwise.
pub(crate) async fn send(request: RequestBuilder, target: &str) -> Result<(u16, Value), BlockError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() {
            BlockError::Retryable(format!("request to {target} failed: {e}"))
        } else {
            BlockError::Fatal(format!("request to {target} failed: {e}"))
        }
    })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BlockError::Retryable(format!("reading response from {target}: {e}")))?;

    classify(status, target)?;

    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok((status.as_u16(), body))
}

fn classify(status: StatusCode, target: &str) -> Result<(), BlockError> {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(BlockError::Retryable(format!("{target} responded {status}")));
    }
    if status.is_client_error() {
        return Err(BlockError::Fatal(format!("{target} responded {status}")));
    }
    Ok(())
}

fn parse_method(method: &str) -> Result<Method, BlockError> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| BlockError::InvalidConfig(format!("unsupported HTTP method '{method}'")))
}

// ---------------------------------------------------------------------------
// http
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    #[serde(default = "default_http_key")]
    output_key: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_http_key() -> String {
    "http_response".to_string()
}

pub struct HttpBlock {
    client: Client,
    timeout: Duration,
}

impl HttpBlock {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ExecutableBlock for HttpBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: HttpConfig = parse_config(&invocation.config)?;
        let method = parse_method(&cfg.method)?;
        let url = render(&cfg.url, context)?;

        debug!("block '{}' {} {}", invocation.block_name, method, url);

        let mut request = self.client.request(method, &url).timeout(self.timeout);
        for (name, value) in &cfg.headers {
            request = request.header(name, render(value, context)?);
        }
        if let Some(body) = &cfg.body {
            request = request.json(&render_value(body, context)?);
        }

        let (status, body) = send(request, &url).await?;

        let mut out = Context::new();
        out.insert(cfg.output_key, json!({ "status": status, "body": body }));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    payload: Value,
}

/// POSTs the whole context (plus an optional rendered `payload`) to a URL.
pub struct WebhookBlock {
    client: Client,
    timeout: Duration,
}

impl WebhookBlock {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ExecutableBlock for WebhookBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: WebhookConfig = parse_config(&invocation.config)?;
        let url = render(&cfg.url, context)?;

        let mut request = self.client.post(&url).timeout(self.timeout).json(&json!({
            "workflow_id": invocation.workflow_id,
            "execution_id": invocation.execution_id,
            "context": context,
            "payload": render_value(&cfg.payload, context)?,
        }));
        for (name, value) in &cfg.headers {
            request = request.header(name, render(value, context)?);
        }

        let (status, body) = send(request, &url).await?;

        let mut out = Context::new();
        out.insert(
            "webhook_response".to_string(),
            json!({ "status": status, "body": body }),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::invocation;

    #[test]
    fn classifies_status_codes() {
        assert!(classify(StatusCode::OK, "x").is_ok());
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "x"),
            Err(BlockError::Retryable(_))
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "x"),
            Err(BlockError::Retryable(_))
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "x"),
            Err(BlockError::Fatal(_))
        ));
    }

    #[test]
    fn parses_methods_case_insensitively() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert!(matches!(parse_method("no such"), Err(BlockError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_config() {
        let block = HttpBlock::new(Client::new(), Duration::from_secs(1));
        let err = block
            .execute(&Context::new(), &invocation(json!({ "method": "GET" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfig(msg) if msg.contains("url")));

        let webhook = WebhookBlock::new(Client::new(), Duration::from_secs(1));
        let err = webhook
            .execute(&Context::new(), &invocation(Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfig(_)));
    }
}
