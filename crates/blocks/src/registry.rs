//! Maps block `type` tags to `ExecutableBlock` implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin;
use crate::{BlockSettings, ExecutableBlock};

/// Message reported when a block's type has no registered implementation.
pub const UNKNOWN_BLOCK_TYPE: &str = "Unknown block type";

/// Strategy map from type tag to implementation.
///
/// New block types are added with [`BlockRegistry::register`]; the engine
/// never needs to change.
#[derive(Clone, Default)]
pub struct BlockRegistry {
    blocks: HashMap<String, Arc<dyn ExecutableBlock>>,
}

impl BlockRegistry {
    /// An empty registry. Every lookup fails until types are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in block type.
    pub fn with_builtins(settings: &BlockSettings) -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry, settings);
        registry
    }

    /// Register (or replace) the implementation for `block_type`.
    pub fn register(
        &mut self,
        block_type: impl Into<String>,
        block: Arc<dyn ExecutableBlock>,
    ) -> &mut Self {
        self.blocks.insert(block_type.into(), block);
        self
    }

    /// Look up the implementation for `block_type`.
    pub fn resolve(&self, block_type: &str) -> Option<Arc<dyn ExecutableBlock>> {
        self.blocks.get(block_type).cloned()
    }

    /// Registered type tags, sorted.
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("block_types", &self.block_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBlock;
    use serde_json::json;

    #[test]
    fn builtins_cover_the_documented_types() {
        let registry = BlockRegistry::with_builtins(&BlockSettings::default());
        assert_eq!(
            registry.block_types(),
            vec![
                "ai-processing",
                "code",
                "condition",
                "data_transform",
                "delay",
                "email",
                "http",
                "llm",
                "sms",
                "webhook",
            ]
        );
    }

    #[test]
    fn unknown_types_do_not_resolve() {
        let registry = BlockRegistry::with_builtins(&BlockSettings::default());
        assert!(registry.resolve("loop").is_none());
        assert!(registry.resolve("integration").is_none());
    }

    #[test]
    fn register_replaces_existing_type() {
        let mut registry = BlockRegistry::with_builtins(&BlockSettings::default());
        registry.register("delay", Arc::new(MockBlock::returning("fast", json!({}))));
        assert!(registry.resolve("delay").is_some());
        assert_eq!(registry.block_types().len(), 10);
    }
}
