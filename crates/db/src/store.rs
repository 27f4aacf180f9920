//! The `Store` trait — every read and write the engine performs.
//!
//! Implementations must make each method atomic on its own: log appends,
//! counter increments, credit deductions and status transitions are single
//! read-modify-write operations so concurrent executions never lose updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BlockRow, ExecutionAggregate, ExecutionRow, JsonMap, LogEntry, NewBlock,
    NewUser, NewWorkflow, Termination, UserRow, WorkflowRow,
};
use crate::DbError;

#[async_trait]
pub trait Store: Send + Sync {
    // ------ users ------

    async fn create_user(&self, user: NewUser) -> Result<UserRow, DbError>;

    async fn get_user(&self, id: Uuid) -> Result<UserRow, DbError>;

    /// Add `amount` to the user's `credits_used` only if the result stays
    /// within `credits_limit`. Returns whether the deduction happened.
    async fn try_deduct_credits(&self, user_id: Uuid, amount: i64) -> Result<bool, DbError>;

    async fn reset_credits(&self, user_id: Uuid) -> Result<(), DbError>;

    // ------ workflows ------

    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<WorkflowRow, DbError>;

    /// Fetch a workflow; soft-deleted workflows are `DbError::NotFound`.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Atomically increment `execution_count` and set `last_executed_at`.
    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Mark the workflow deleted and cancel its running executions.
    /// Returns the number of executions cancelled.
    async fn soft_delete_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64, DbError>;

    // ------ blocks ------

    async fn insert_block(&self, workflow_id: Uuid, block: NewBlock) -> Result<BlockRow, DbError>;

    /// All blocks of a workflow (enabled or not) by ascending `order`.
    async fn list_blocks(&self, workflow_id: Uuid) -> Result<Vec<BlockRow>, DbError>;

    /// A block, only if it belongs to `workflow_id`.
    async fn get_block(&self, workflow_id: Uuid, block_id: Uuid)
        -> Result<Option<BlockRow>, DbError>;

    // ------ executions ------

    /// Insert a `pending` execution with an empty log.
    async fn create_execution(
        &self,
        workflow_id: Uuid,
        input: JsonMap,
        triggered_by: &str,
    ) -> Result<ExecutionRow, DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError>;

    /// `pending → running`, recording `started_at`. Returns whether the
    /// transition happened.
    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError>;

    /// Append one entry to the execution log.
    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), DbError>;

    /// Compare-and-swap `running → termination.status`, filling in output,
    /// error, `completed_at` and `execution_time_ms` (derived from the stored
    /// `started_at`). Returns `false` when the execution was not running.
    async fn finish_execution(&self, id: Uuid, termination: Termination) -> Result<bool, DbError>;

    /// Executions of a workflow, newest first.
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError>;

    async fn execution_aggregate(&self, workflow_id: Uuid) -> Result<ExecutionAggregate, DbError>;
}

