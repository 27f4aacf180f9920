//! Built-in block types.
//!
//! | tag                      | implementation                 |
//! |--------------------------|--------------------------------|
//! | `delay`                  | [`delay::DelayBlock`]          |
//! | `condition`              | [`condition::ConditionBlock`]  |
//! | `data_transform`         | [`transform::TransformBlock`]  |
//! | `http`                   | [`http::HttpBlock`]            |
//! | `webhook`                | [`http::WebhookBlock`]         |
//! | `llm`, `ai-processing`   | [`llm::LlmBlock`]              |
//! | `code`                   | [`code::CodeBlock`]            |
//! | `email`, `sms`           | [`message::MessageBlock`]      |

pub mod code;
pub mod condition;
pub mod delay;
pub mod http;
pub mod llm;
pub mod message;
pub mod transform;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{BlockError, BlockRegistry, BlockSettings};

use message::{Channel, DryRunTransport, MessageTransport, RelayTransport};

/// Register every built-in block type on `registry`.
pub fn register_all(registry: &mut BlockRegistry, settings: &BlockSettings) {
    let client = reqwest::Client::new();

    let transport: Arc<dyn MessageTransport> = match &settings.relay_url {
        Some(url) => Arc::new(RelayTransport::new(
            client.clone(),
            url.clone(),
            settings.http_timeout,
        )),
        None => Arc::new(DryRunTransport),
    };

    let llm = Arc::new(llm::LlmBlock::new(
        client.clone(),
        settings.llm.clone(),
        settings.http_timeout,
    ));

    registry
        .register("delay", Arc::new(delay::DelayBlock::new(settings.max_delay)))
        .register("condition", Arc::new(condition::ConditionBlock))
        .register("data_transform", Arc::new(transform::TransformBlock))
        .register(
            "http",
            Arc::new(http::HttpBlock::new(client.clone(), settings.http_timeout)),
        )
        .register(
            "webhook",
            Arc::new(http::WebhookBlock::new(client, settings.http_timeout)),
        )
        .register("llm", llm.clone())
        .register("ai-processing", llm)
        .register("code", Arc::new(code::CodeBlock::new(settings.code_timeout)))
        .register(
            "email",
            Arc::new(message::MessageBlock::new(Channel::Email, transport.clone())),
        )
        .register(
            "sms",
            Arc::new(message::MessageBlock::new(Channel::Sms, transport)),
        );
}

/// Cast a block's free-form `config` into the type it expects.
///
/// A `null` config is read as an empty object so that blocks whose keys all
/// have defaults accept it.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, BlockError> {
    let value = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| BlockError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;
    use uuid::Uuid;

    use crate::{BlockInvocation, Context};

    pub fn invocation(config: Value) -> BlockInvocation {
        BlockInvocation {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            block_id: Uuid::new_v4(),
            block_name: "under test".into(),
            config,
        }
    }

    pub fn context(value: Value) -> Context {
        value.as_object().cloned().unwrap_or_default()
    }
}
