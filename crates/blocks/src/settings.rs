//! Tuning knobs shared by the built-in block types.

use std::time::Duration;

/// Settings for the `llm` block type.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    /// Model used when a block does not name one.
    pub default_model: String,
    /// Bearer token. `None` makes every `llm` block fail fatally.
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

/// Settings for every built-in block.
#[derive(Debug, Clone)]
pub struct BlockSettings {
    /// Upper bound for a `delay` block. A delay block stalls the task driving
    /// the execution, so configured delays are clamped to this value.
    pub max_delay: Duration,
    /// Request timeout for `http`, `webhook`, `llm` and relay deliveries.
    pub http_timeout: Duration,
    /// Wall-clock limit for a `code` block subprocess.
    pub code_timeout: Duration,
    pub llm: LlmSettings,
    /// HTTP relay that receives `email` and `sms` messages. When unset,
    /// messages are only logged.
    pub relay_url: Option<String>,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            code_timeout: Duration::from_secs(30),
            llm: LlmSettings::default(),
            relay_url: None,
        }
    }
}
