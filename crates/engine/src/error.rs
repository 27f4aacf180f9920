//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the loop engine (validation + execution).
///
/// Block failures never leave [`crate::LoopExecutor::run`]; they are written
/// into the execution record using this type's `Display` text. Only
/// [`EngineError::Database`] and the lookup variants reach the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two blocks of one definition resolve to the same `order`.
    #[error("blocks '{first}' and '{second}' share order {order}")]
    DuplicateBlockOrder {
        order: i32,
        first: String,
        second: String,
    },

    /// An enabled block names a type with no registered implementation.
    #[error("block '{block}' has unknown type '{block_type}'")]
    UnknownBlockType {
        block: String,
        block_type: String,
    },

    /// Nothing would run: the definition has no enabled block.
    #[error("loop has no enabled blocks")]
    NoEnabledBlocks,

    // ------ Execution errors ------

    /// The block reported a failure; the message is the block's own.
    #[error("{message}")]
    BlockFailed {
        block: String,
        message: String,
    },

    /// The block kept failing with retryable errors; the message is the
    /// last one it reported.
    #[error("{message}")]
    RetryExhausted {
        block: String,
        attempts: u32,
        message: String,
    },

    /// The block overran the configured per-block timeout.
    #[error("Block '{block}' timed out after {timeout:?}")]
    BlockTimedOut {
        block: String,
        timeout: Duration,
    },

    /// The block panicked inside `execute`.
    #[error("Block '{block}' panicked: {message}")]
    BlockPanicked {
        block: String,
        message: String,
    },

    // ------ Lookup errors ------

    #[error("loop {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// Whether this error describes a block failure (as opposed to an
    /// infrastructure or lookup failure).
    pub fn is_block_failure(&self) -> bool {
        matches!(
            self,
            Self::BlockFailed { .. }
                | Self::RetryExhausted { .. }
                | Self::BlockTimedOut { .. }
                | Self::BlockPanicked { .. }
        )
    }
}
