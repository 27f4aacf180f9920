//! `Store` over Postgres; every method is one repository call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BlockRow, ExecutionAggregate, ExecutionRow, JsonMap, LogEntry, NewBlock, NewUser,
    NewWorkflow, Termination, UserRow, WorkflowRow,
};
use crate::repository::{blocks, executions, users, workflows};
use crate::{DbError, DbPool, Store};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRow, DbError> {
        users::create_user(&self.pool, &user).await
    }

    async fn get_user(&self, id: Uuid) -> Result<UserRow, DbError> {
        users::get_user(&self.pool, id).await
    }

    async fn try_deduct_credits(&self, user_id: Uuid, amount: i64) -> Result<bool, DbError> {
        users::try_deduct_credits(&self.pool, user_id, amount).await
    }

    async fn reset_credits(&self, user_id: Uuid) -> Result<(), DbError> {
        users::reset_credits(&self.pool, user_id).await
    }

    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, &workflow).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        workflows::record_run(&self.pool, id, at).await
    }

    async fn soft_delete_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64, DbError> {
        workflows::soft_delete_workflow(&self.pool, id, at).await
    }

    async fn insert_block(&self, workflow_id: Uuid, block: NewBlock) -> Result<BlockRow, DbError> {
        blocks::insert_block(&self.pool, workflow_id, &block).await
    }

    async fn list_blocks(&self, workflow_id: Uuid) -> Result<Vec<BlockRow>, DbError> {
        blocks::list_blocks(&self.pool, workflow_id).await
    }

    async fn get_block(
        &self,
        workflow_id: Uuid,
        block_id: Uuid,
    ) -> Result<Option<BlockRow>, DbError> {
        blocks::get_block(&self.pool, workflow_id, block_id).await
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        input: JsonMap,
        triggered_by: &str,
    ) -> Result<ExecutionRow, DbError> {
        executions::create_execution(&self.pool, workflow_id, &input, triggered_by).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
        executions::mark_running(&self.pool, id, started_at).await
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), DbError> {
        executions::append_log(&self.pool, id, &entry).await
    }

    async fn finish_execution(&self, id: Uuid, termination: Termination) -> Result<bool, DbError> {
        executions::finish_execution(&self.pool, id, &termination).await
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
        executions::list_executions(&self.pool, workflow_id).await
    }

    async fn execution_aggregate(&self, workflow_id: Uuid) -> Result<ExecutionAggregate, DbError> {
        executions::execution_aggregate(&self.pool, workflow_id).await
    }
}
