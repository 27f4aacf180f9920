//! The `ExecutableBlock` trait — the contract every block type must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::BlockError;

/// The key-value bag threaded through one execution.
///
/// Starts as a copy of the execution input and grows with every block's
/// output data (right-biased merge).
pub type Context = Map<String, Value>;

/// Identity and configuration of the block being executed.
///
/// Defined here (in the blocks crate) so both the engine and individual block
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct BlockInvocation {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// ID of the block row.
    pub block_id: Uuid,
    /// Human readable block name, used in logs.
    pub block_name: String,
    /// Free-form configuration payload; each block type casts its own keys.
    pub config: Value,
}

/// The core block trait.
///
/// A block must not mutate the caller's context. It returns a delta that the
/// engine merges into the context after the block succeeds.
#[async_trait]
pub trait ExecutableBlock: Send + Sync {
    /// Execute the block against the accumulated `context` and return this
    /// block's output data.
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError>;
}

/// Per-block outcome as recorded in the execution log and returned by
/// single-block runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResult {
    pub success: bool,
    pub data: Option<Context>,
    pub error: Option<String>,
}

impl BlockResult {
    pub fn succeeded(data: Context) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialises_with_null_fields() {
        let result = BlockResult::failed("Block not found");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "success": false, "data": null, "error": "Block not found" })
        );
    }
}
