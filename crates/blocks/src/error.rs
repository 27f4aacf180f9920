//! Block-level error type.

use thiserror::Error;

/// Errors returned by a block's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`     — the block is re-run with exponential back-off.
/// - `Fatal`         — the execution is immediately marked as failed.
/// - `InvalidConfig` — the block's `config` payload could not be cast to what
///   the block type expects; never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// Transient failure; the engine should re-try the block.
    #[error("retryable block error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal block error: {0}")]
    Fatal(String),

    /// The block's configuration is missing a key or has the wrong shape.
    #[error("invalid block config: {0}")]
    InvalidConfig(String),
}

impl BlockError {
    /// The message reported to the execution record.
    pub fn message(&self) -> String {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg.clone(),
            Self::InvalidConfig(msg) => format!("invalid config: {msg}"),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_strips_the_variant_prefix() {
        assert_eq!(BlockError::Fatal("boom".into()).message(), "boom");
        assert_eq!(BlockError::Retryable("later".into()).message(), "later");
        assert_eq!(
            BlockError::InvalidConfig("delay must be a number".into()).message(),
            "invalid config: delay must be a number"
        );
    }

    #[test]
    fn only_retryable_is_retryable() {
        assert!(BlockError::Retryable("x".into()).is_retryable());
        assert!(!BlockError::Fatal("x".into()).is_retryable());
        assert!(!BlockError::InvalidConfig("x".into()).is_retryable());
    }
}
