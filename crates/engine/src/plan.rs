//! Execution planning — which blocks run, in what order, and whether a
//! loop may run at all.
//!
//! Rules:
//! 1. Only enabled blocks run.
//! 2. They run in strictly ascending `order`; equal orders keep store order.
//! 3. A loop is runnable when active, not deleted and with an enabled block.

use std::collections::HashMap;

use blocks::BlockRegistry;
use db::models::{BlockRow, WorkflowRow};

use crate::{EngineError, models::LoopDefinition};

/// Enabled blocks in execution order.
pub fn execution_plan(blocks: &[BlockRow]) -> Vec<&BlockRow> {
    let mut plan: Vec<&BlockRow> = blocks.iter().filter(|b| b.enabled).collect();
    // Stable sort: ties keep the order the store returned them in.
    plan.sort_by_key(|b| b.order);
    plan
}

/// Whether `workflow` may be executed with the given blocks.
pub fn can_execute(workflow: &WorkflowRow, blocks: &[BlockRow]) -> bool {
    workflow.is_active && workflow.deleted_at.is_none() && blocks.iter().any(|b| b.enabled)
}

/// Validate a definition file and return the names of the blocks that would
/// run, in order.
///
/// Blocks without an explicit `order` are placed after the highest order seen
/// so far, the same way the store appends them.
///
/// # Errors
/// - [`EngineError::DuplicateBlockOrder`] if two blocks resolve to one order.
/// - [`EngineError::UnknownBlockType`] if an enabled block's type is not registered.
/// - [`EngineError::NoEnabledBlocks`] if nothing would run.
pub fn validate_definition(
    definition: &LoopDefinition,
    registry: &BlockRegistry,
) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Resolve effective orders and reject duplicates
    // -----------------------------------------------------------------------
    let mut by_order: HashMap<i32, &str> = HashMap::new();
    let mut highest: Option<i32> = None;
    let mut resolved: Vec<(i32, usize)> = Vec::with_capacity(definition.blocks.len());

    for (index, block) in definition.blocks.iter().enumerate() {
        let order = block.order.unwrap_or_else(|| highest.map_or(0, |h| h + 1));
        if let Some(first) = by_order.insert(order, block.name.as_str()) {
            return Err(EngineError::DuplicateBlockOrder {
                order,
                first: first.to_string(),
                second: block.name.clone(),
            });
        }
        highest = Some(highest.map_or(order, |h| h.max(order)));
        resolved.push((order, index));
    }

    // -----------------------------------------------------------------------
    // 2. Every enabled block must have an implementation
    // -----------------------------------------------------------------------
    resolved.retain(|&(_, index)| definition.blocks[index].enabled);
    for &(_, index) in &resolved {
        let block = &definition.blocks[index];
        if registry.resolve(&block.block_type).is_none() {
            return Err(EngineError::UnknownBlockType {
                block: block.name.clone(),
                block_type: block.block_type.clone(),
            });
        }
    }

    if resolved.is_empty() {
        return Err(EngineError::NoEnabledBlocks);
    }

    resolved.sort_by_key(|&(order, _)| order);
    Ok(resolved
        .into_iter()
        .map(|(_, index)| definition.blocks[index].name.clone())
        .collect())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::Trigger;
    use blocks::Context;
    use db::models::NewBlock;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn block(name: &str, order: i32, enabled: bool) -> BlockRow {
        BlockRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            block_type: "delay".into(),
            name: name.into(),
            description: None,
            config: Value::Null,
            order,
            enabled,
            created_at: Utc::now(),
        }
    }

    fn workflow(is_active: bool) -> WorkflowRow {
        WorkflowRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "wf".into(),
            description: None,
            trigger_type: "manual".into(),
            is_active,
            is_published: false,
            execution_count: 0,
            last_executed_at: None,
            tags: Vec::new(),
            category: "general".into(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn definition(blocks: Vec<NewBlock>) -> LoopDefinition {
        LoopDefinition {
            name: "def".into(),
            description: None,
            trigger: Trigger::Manual,
            category: "general".into(),
            tags: Vec::new(),
            input: Context::new(),
            blocks,
        }
    }

    fn registry() -> BlockRegistry {
        BlockRegistry::with_builtins(&blocks::BlockSettings::default())
    }

    #[test]
    fn plan_skips_disabled_and_sorts_by_order() {
        let blocks = vec![block("c", 3, true), block("off", 0, false), block("a", 1, true), block("b", 2, true)];
        let names: Vec<&str> = execution_plan(&blocks).iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn plan_keeps_store_order_for_ties() {
        let blocks = vec![block("first", 5, true), block("second", 5, true), block("zero", 0, true)];
        let names: Vec<&str> = execution_plan(&blocks).iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["zero", "first", "second"]);
    }

    #[test]
    fn runnable_requires_active_live_and_an_enabled_block() {
        let blocks = vec![block("a", 0, true)];
        assert!(can_execute(&workflow(true), &blocks));
        assert!(!can_execute(&workflow(false), &blocks));
        assert!(!can_execute(&workflow(true), &[]));
        assert!(!can_execute(&workflow(true), &[block("off", 0, false)]));

        let mut deleted = workflow(true);
        deleted.deleted_at = Some(Utc::now());
        assert!(!can_execute(&deleted, &blocks));
    }

    #[test]
    fn definition_order_appends_after_highest() {
        let def = definition(vec![
            NewBlock::new("delay", "late", json!({})).at(10),
            NewBlock::new("delay", "later", json!({})),
            NewBlock::new("condition", "early", json!({})).at(2),
        ]);
        assert_eq!(validate_definition(&def, &registry()).unwrap(), vec!["early", "late", "later"]);
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let def = definition(vec![
            NewBlock::new("delay", "a", json!({})).at(1),
            NewBlock::new("delay", "b", json!({})).at(1),
        ]);
        assert!(matches!(
            validate_definition(&def, &registry()),
            Err(EngineError::DuplicateBlockOrder { order: 1, second, .. }) if second == "b"
        ));
    }

    #[test]
    fn unknown_type_is_rejected_only_when_enabled() {
        let def = definition(vec![
            NewBlock::new("delay", "ok", json!({})),
            NewBlock::new("integration", "unused", json!({})).disabled(),
        ]);
        assert_eq!(validate_definition(&def, &registry()).unwrap(), vec!["ok"]);

        let def = definition(vec![NewBlock::new("integration", "sync", json!({}))]);
        assert!(matches!(
            validate_definition(&def, &registry()),
            Err(EngineError::UnknownBlockType { block_type, .. }) if block_type == "integration"
        ));
    }

    #[test]
    fn all_disabled_is_rejected() {
        let def = definition(vec![NewBlock::new("delay", "off", json!({})).disabled()]);
        assert!(matches!(validate_definition(&def, &registry()), Err(EngineError::NoEnabledBlocks)));
    }
}
