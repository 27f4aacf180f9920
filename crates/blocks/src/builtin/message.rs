//! `email` and `sms` — render a message and hand it to a transport.
//!
//! Delivery is behind [`MessageTransport`] so a deployment can plug in its
//! own provider. The built-ins are an HTTP relay and a dry-run transport
//! that only logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::http::send;
use super::parse_config;
use crate::template::render;
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
}

/// Delivers rendered messages.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver `message`. Returns `true` when it was handed to a real
    /// provider and `false` when it was only recorded.
    async fn deliver(&self, message: &OutboundMessage) -> Result<bool, BlockError>;
}

/// POSTs every message as JSON to a relay service.
pub struct RelayTransport {
    client: Client,
    url: String,
    timeout: Duration,
}

impl RelayTransport {
    pub fn new(client: Client, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl MessageTransport for RelayTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<bool, BlockError> {
        let request = self.client.post(&self.url).timeout(self.timeout).json(message);
        send(request, &self.url).await?;
        Ok(true)
    }
}

/// Logs messages instead of sending them; used when no relay is configured.
pub struct DryRunTransport;

#[async_trait]
impl MessageTransport for DryRunTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<bool, BlockError> {
        info!(
            channel = message.channel.as_str(),
            to = %message.to,
            execution_id = %message.execution_id,
            "dry-run delivery (no relay configured)"
        );
        Ok(false)
    }
}

#[derive(Debug, Deserialize)]
struct MessageConfig {
    to: String,
    subject: Option<String>,
    #[serde(default)]
    body: String,
}

pub struct MessageBlock {
    channel: Channel,
    transport: Arc<dyn MessageTransport>,
}

impl MessageBlock {
    pub fn new(channel: Channel, transport: Arc<dyn MessageTransport>) -> Self {
        Self { channel, transport }
    }
}

#[async_trait]
impl ExecutableBlock for MessageBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: MessageConfig = parse_config(&invocation.config)?;

        let to = render(&cfg.to, context)?.trim().to_string();
        if to.is_empty() {
            return Err(BlockError::InvalidConfig(format!(
                "{} recipient is empty",
                self.channel.as_str()
            )));
        }

        let message = OutboundMessage {
            channel: self.channel,
            subject: match self.channel {
                Channel::Email => cfg.subject.as_deref().map(|s| render(s, context)).transpose()?,
                Channel::Sms => None,
            },
            body: render(&cfg.body, context)?,
            to,
            workflow_id: invocation.workflow_id,
            execution_id: invocation.execution_id,
        };

        let delivered = self.transport.deliver(&message).await?;

        let mut out = Context::new();
        out.insert(
            self.channel.as_str().to_string(),
            json!({ "to": message.to, "delivered": delivered }),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, invocation};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl MessageTransport for Recording {
        async fn deliver(&self, message: &OutboundMessage) -> Result<bool, BlockError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(true)
        }
    }

    #[tokio::test]
    async fn email_renders_and_delivers() {
        let transport = Arc::new(Recording::default());
        let block = MessageBlock::new(Channel::Email, transport.clone());
        let cfg = json!({ "to": "{{user.email}}", "subject": "Hi {{user.name}}", "body": "Total {{total}}" });
        let ctx = context(json!({ "user": { "email": "ada@example.com", "name": "Ada" }, "total": 9 }));

        let out = block.execute(&ctx, &invocation(cfg)).await.unwrap();

        assert_eq!(out["email"], json!({ "to": "ada@example.com", "delivered": true }));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject.as_deref(), Some("Hi Ada"));
        assert_eq!(sent[0].body, "Total 9");
    }

    #[tokio::test]
    async fn sms_drops_subject_and_dry_run_reports_undelivered() {
        let block = MessageBlock::new(Channel::Sms, Arc::new(DryRunTransport));
        let cfg = json!({ "to": "+15550100", "subject": "ignored", "body": "ping" });

        let out = block.execute(&Context::new(), &invocation(cfg)).await.unwrap();
        assert_eq!(out["sms"], json!({ "to": "+15550100", "delivered": false }));
    }

    #[tokio::test]
    async fn empty_recipient_is_invalid() {
        let block = MessageBlock::new(Channel::Email, Arc::new(DryRunTransport));
        let err = block
            .execute(&Context::new(), &invocation(json!({ "to": "{{missing}}" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfig(_)));
    }
}
