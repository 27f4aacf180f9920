//! In-process `Store` backed by a single mutex-guarded state.
//!
//! Every trait method takes the lock once, so each operation is atomic with
//! respect to every other — the same guarantee the Postgres store gets from
//! single-statement updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BlockRow, ExecutionAggregate, ExecutionRow, ExecutionStatus, JsonMap, LogEntry, NewBlock,
    NewUser, NewWorkflow, Termination, UserRow, WorkflowRow,
};
use crate::{DbError, Store};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserRow>,
    workflows: HashMap<Uuid, WorkflowRow>,
    /// Insertion order doubles as the tie-breaker for equal `order` values.
    blocks: Vec<BlockRow>,
    /// Insertion order doubles as creation order.
    executions: Vec<ExecutionRow>,
}

impl State {
    fn execution_mut(&mut self, id: Uuid) -> Result<&mut ExecutionRow, DbError> {
        self.executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(DbError::NotFound)
    }

    fn live_workflow_mut(&mut self, id: Uuid) -> Result<&mut WorkflowRow, DbError> {
        self.workflows
            .get_mut(&id)
            .filter(|w| w.deleted_at.is_none())
            .ok_or(DbError::NotFound)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DbError> {
        self.state.lock().map_err(|e| DbError::Poisoned(e.to_string()))
    }
}

fn elapsed_ms(started_at: Option<DateTime<Utc>>, completed_at: DateTime<Utc>) -> Option<i64> {
    started_at.map(|s| (completed_at - s).num_milliseconds().max(0))
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRow, DbError> {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: user.name,
            plan: user.plan,
            credits_used: 0,
            credits_limit: user.credits_limit,
            created_at: Utc::now(),
        };
        self.lock()?.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_user(&self, id: Uuid) -> Result<UserRow, DbError> {
        self.lock()?.users.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn try_deduct_credits(&self, user_id: Uuid, amount: i64) -> Result<bool, DbError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        if user.credits_used + amount > user.credits_limit {
            return Ok(false);
        }
        user.credits_used += amount;
        Ok(true)
    }

    async fn reset_credits(&self, user_id: Uuid) -> Result<(), DbError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        user.credits_used = 0;
        Ok(())
    }

    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<WorkflowRow, DbError> {
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            user_id: workflow.user_id,
            name: workflow.name,
            description: workflow.description,
            trigger_type: workflow.trigger_type,
            is_active: workflow.is_active,
            is_published: workflow.is_published,
            execution_count: 0,
            last_executed_at: None,
            tags: workflow.tags,
            category: workflow.category,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.lock()?.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.lock()?.live_workflow_mut(id).map(|w| w.clone())
    }

    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let mut state = self.lock()?;
        let workflow = state.live_workflow_mut(id)?;
        workflow.execution_count += 1;
        workflow.last_executed_at = Some(at);
        Ok(())
    }

    async fn soft_delete_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64, DbError> {
        let mut state = self.lock()?;
        state.live_workflow_mut(id)?.deleted_at = Some(at);

        let mut cancelled = 0;
        for exec in state
            .executions
            .iter_mut()
            .filter(|e| e.workflow_id == id && e.status == ExecutionStatus::Running)
        {
            exec.status = ExecutionStatus::Cancelled;
            exec.completed_at = Some(at);
            exec.execution_time_ms = elapsed_ms(exec.started_at, at);
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn insert_block(&self, workflow_id: Uuid, block: NewBlock) -> Result<BlockRow, DbError> {
        let mut state = self.lock()?;
        state.live_workflow_mut(workflow_id)?;

        let order = match block.order {
            Some(order) => order,
            None => state
                .blocks
                .iter()
                .filter(|b| b.workflow_id == workflow_id)
                .map(|b| b.order)
                .max()
                .map_or(0, |max| max + 1),
        };

        let row = BlockRow {
            id: Uuid::new_v4(),
            workflow_id,
            block_type: block.block_type,
            name: block.name,
            description: block.description,
            config: block.config,
            order,
            enabled: block.enabled,
            created_at: Utc::now(),
        };
        state.blocks.push(row.clone());
        Ok(row)
    }

    async fn list_blocks(&self, workflow_id: Uuid) -> Result<Vec<BlockRow>, DbError> {
        let mut blocks: Vec<BlockRow> = self
            .lock()?
            .blocks
            .iter()
            .filter(|b| b.workflow_id == workflow_id)
            .cloned()
            .collect();
        // Stable: equal orders keep insertion order.
        blocks.sort_by_key(|b| b.order);
        Ok(blocks)
    }

    async fn get_block(
        &self,
        workflow_id: Uuid,
        block_id: Uuid,
    ) -> Result<Option<BlockRow>, DbError> {
        Ok(self
            .lock()?
            .blocks
            .iter()
            .find(|b| b.id == block_id && b.workflow_id == workflow_id)
            .cloned())
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        input: JsonMap,
        triggered_by: &str,
    ) -> Result<ExecutionRow, DbError> {
        let mut state = self.lock()?;
        state.live_workflow_mut(workflow_id)?;

        let row = ExecutionRow {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error_message: None,
            execution_time_ms: None,
            started_at: None,
            completed_at: None,
            triggered_by: triggered_by.to_string(),
            log: Vec::new(),
            created_at: Utc::now(),
        };
        state.executions.push(row.clone());
        Ok(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        self.lock()?.execution_mut(id).map(|e| e.clone())
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
        let mut state = self.lock()?;
        let exec = state.execution_mut(id)?;
        if exec.status != ExecutionStatus::Pending {
            return Ok(false);
        }
        exec.status = ExecutionStatus::Running;
        exec.started_at = Some(started_at);
        Ok(true)
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), DbError> {
        self.lock()?.execution_mut(id)?.log.push(entry);
        Ok(())
    }

    async fn finish_execution(&self, id: Uuid, termination: Termination) -> Result<bool, DbError> {
        let mut state = self.lock()?;
        let exec = state.execution_mut(id)?;
        if exec.status != ExecutionStatus::Running {
            return Ok(false);
        }
        exec.status = termination.status;
        if termination.output.is_some() {
            exec.output = termination.output;
        }
        exec.error_message = termination.error_message;
        exec.completed_at = Some(termination.completed_at);
        exec.execution_time_ms = elapsed_ms(exec.started_at, termination.completed_at);
        Ok(true)
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
        Ok(self
            .lock()?
            .executions
            .iter()
            .rev()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn execution_aggregate(&self, workflow_id: Uuid) -> Result<ExecutionAggregate, DbError> {
        let state = self.lock()?;
        let runs: Vec<&ExecutionRow> = state
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect();

        let completed: Vec<&ExecutionRow> = runs
            .iter()
            .copied()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .collect();
        let timings: Vec<i64> = completed.iter().filter_map(|e| e.execution_time_ms).collect();

        Ok(ExecutionAggregate {
            total: runs.len() as i64,
            completed: completed.len() as i64,
            failed: runs
                .iter()
                .filter(|e| e.status == ExecutionStatus::Failed)
                .count() as i64,
            average_execution_time_ms: (!timings.is_empty())
                .then(|| timings.iter().sum::<i64>() as f64 / timings.len() as f64),
            last_execution: runs.last().map(|e| (*e).clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogLevel, Plan};
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded() -> (MemoryStore, UserRow, WorkflowRow) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser { name: "ada".into(), plan: Plan::Free, credits_limit: 2 })
            .await
            .unwrap();
        let wf = store
            .create_workflow(NewWorkflow::new(user.id, "wf").active())
            .await
            .unwrap();
        (store, user, wf)
    }

    #[tokio::test]
    async fn blocks_list_by_order_and_append_when_unspecified() {
        let (store, _, wf) = seeded().await;
        store.insert_block(wf.id, NewBlock::new("delay", "late", json!({})).at(10)).await.unwrap();
        store.insert_block(wf.id, NewBlock::new("delay", "early", json!({})).at(1)).await.unwrap();
        let appended = store
            .insert_block(wf.id, NewBlock::new("delay", "appended", json!({})))
            .await
            .unwrap();

        assert_eq!(appended.order, 11);
        let names: Vec<String> = store
            .list_blocks(wf.id)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["early", "late", "appended"]);
    }

    #[tokio::test]
    async fn get_block_is_scoped_to_its_workflow() {
        let (store, user, wf) = seeded().await;
        let other = store.create_workflow(NewWorkflow::new(user.id, "other")).await.unwrap();
        let block = store.insert_block(wf.id, NewBlock::new("delay", "b", json!({}))).await.unwrap();

        assert!(store.get_block(wf.id, block.id).await.unwrap().is_some());
        assert!(store.get_block(other.id, block.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finish_is_a_compare_and_swap_on_running() {
        let (store, _, wf) = seeded().await;
        let exec = store.create_execution(wf.id, JsonMap::new(), "manual").await.unwrap();

        let done = Termination {
            status: ExecutionStatus::Completed,
            output: Some(JsonMap::new()),
            error_message: None,
            completed_at: Utc::now(),
        };
        // Still pending: no transition.
        assert!(!store.finish_execution(exec.id, done.clone()).await.unwrap());

        assert!(store.mark_running(exec.id, Utc::now()).await.unwrap());
        assert!(!store.mark_running(exec.id, Utc::now()).await.unwrap());
        assert!(store.finish_execution(exec.id, done.clone()).await.unwrap());
        assert!(!store.finish_execution(exec.id, done).await.unwrap());

        let stored = store.get_execution(exec.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.execution_time_ms.unwrap() >= 0);
    }

    #[tokio::test]
    async fn log_appends_keep_call_order() {
        let (store, _, wf) = seeded().await;
        let exec = store.create_execution(wf.id, JsonMap::new(), "manual").await.unwrap();
        for i in 0..3 {
            store
                .append_log(exec.id, LogEntry::new(LogLevel::Info, format!("entry {i}")))
                .await
                .unwrap();
        }
        let messages: Vec<String> = store
            .get_execution(exec.id)
            .await
            .unwrap()
            .log
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["entry 0", "entry 1", "entry 2"]);
    }

    #[tokio::test]
    async fn credit_deduction_respects_limit() {
        let (store, user, _) = seeded().await;
        assert!(store.try_deduct_credits(user.id, 1).await.unwrap());
        assert!(store.try_deduct_credits(user.id, 1).await.unwrap());
        assert!(!store.try_deduct_credits(user.id, 1).await.unwrap());
        assert_eq!(store.get_user(user.id).await.unwrap().credits_used, 2);

        store.reset_credits(user.id).await.unwrap();
        assert_eq!(store.get_user(user.id).await.unwrap().credits_used, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deductions_never_overspend() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser { name: "ada".into(), plan: Plan::Pro, credits_limit: 5 })
            .await
            .unwrap();
        let user_id = user.id;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_deduct_credits(user_id, 1).await.unwrap() })
            })
            .collect();

        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(store.get_user(user_id).await.unwrap().credits_used, 5);
    }

    #[tokio::test]
    async fn soft_delete_hides_workflow_and_cancels_running() {
        let (store, _, wf) = seeded().await;
        let running = store.create_execution(wf.id, JsonMap::new(), "manual").await.unwrap();
        store.mark_running(running.id, Utc::now()).await.unwrap();
        let pending = store.create_execution(wf.id, JsonMap::new(), "manual").await.unwrap();

        assert_eq!(store.soft_delete_workflow(wf.id, Utc::now()).await.unwrap(), 1);
        assert!(matches!(store.get_workflow(wf.id).await, Err(DbError::NotFound)));
        assert_eq!(
            store.get_execution(running.id).await.unwrap().status,
            ExecutionStatus::Cancelled
        );
        assert_eq!(
            store.get_execution(pending.id).await.unwrap().status,
            ExecutionStatus::Pending
        );
        assert!(matches!(
            store.soft_delete_workflow(wf.id, Utc::now()).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn aggregate_of_no_runs_is_empty() {
        let (store, _, wf) = seeded().await;
        let agg = store.execution_aggregate(wf.id).await.unwrap();
        assert_eq!(agg.total, 0);
        assert!(agg.average_execution_time_ms.is_none());
        assert!(agg.last_execution.is_none());
    }

    #[tokio::test]
    async fn deleted_workflows_accept_no_new_executions() {
        let (store, _, wf) = seeded().await;
        store.soft_delete_workflow(wf.id, Utc::now()).await.unwrap();
        assert!(matches!(
            store.create_execution(wf.id, JsonMap::new(), "manual").await,
            Err(DbError::NotFound)
        ));
    }
}
