//! Loop execution engine.
//!
//! `LoopExecutor` is the central orchestrator:
//! 1. Creates the execution record and moves it `pending → running`.
//! 2. Runs the enabled blocks in ascending `order`, threading the context
//!    through them (each block's output is merged over the context).
//! 3. Appends a log entry for every step, mirrored as a `tracing` event.
//! 4. Handles `BlockError::Retryable` (up to `max_retries`, exponential
//!    back-off) and every other failure (abort the run immediately).
//! 5. On success bumps the workflow counter and charges one credit.
//!
//! Block failures end up in the execution record. Only persistence errors
//! are returned to the caller.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use blocks::registry::UNKNOWN_BLOCK_TYPE;
use blocks::{BlockError, BlockInvocation, BlockRegistry, BlockResult, Context, ExecutableBlock};
use db::models::{
    BlockRow, ExecutionRow, ExecutionStatus, LogEntry, LogLevel, Termination, WorkflowRow,
};
use db::{DbError, Store};

use crate::billing::{Billing, StoreBilling, CREDITS_PER_RUN};
use crate::models::{ExecutionStats, Trigger};
use crate::plan::execution_plan;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Ceiling on the back-off between two attempts of one block.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable block failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Upper bound on one block attempt; `None` lets blocks run as long as
    /// they need.
    pub block_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            block_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LoopExecutor
// ---------------------------------------------------------------------------

/// Orchestrates executions of loops.
///
/// One executor can serve any number of concurrent runs; all per-run state
/// lives in the execution record and in the `run` call itself.
pub struct LoopExecutor {
    store: Arc<dyn Store>,
    registry: BlockRegistry,
    billing: Arc<dyn Billing>,
    config: ExecutorConfig,
}

/// How the block loop of one run ended.
enum Outcome {
    Completed,
    Failed(String),
    /// Someone else moved the record out of `running` (a cancel).
    Interrupted,
}

impl LoopExecutor {
    /// Create a new executor.
    pub fn new(
        store: Arc<dyn Store>,
        registry: BlockRegistry,
        billing: Arc<dyn Billing>,
        config: ExecutorConfig,
    ) -> Self {
        Self { store, registry, billing, config }
    }

    /// An executor that charges credits through `store` itself.
    pub fn with_store_billing(
        store: Arc<dyn Store>,
        registry: BlockRegistry,
        config: ExecutorConfig,
    ) -> Self {
        let billing = Arc::new(StoreBilling::new(store.clone()));
        Self::new(store, registry, billing, config)
    }

    /// Fetch a live workflow.
    pub async fn workflow(&self, id: Uuid) -> Result<WorkflowRow, EngineError> {
        match self.store.get_workflow(id).await {
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(id)),
            other => Ok(other?),
        }
    }

    /// Fetch an execution record.
    pub async fn execution(&self, id: Uuid) -> Result<ExecutionRow, EngineError> {
        match self.store.get_execution(id).await {
            Err(DbError::NotFound) => Err(EngineError::ExecutionNotFound(id)),
            other => Ok(other?),
        }
    }

    /// Run `workflow` to completion or failure and return the final record.
    ///
    /// Authorisation, the active/published checks and the credit pre-check
    /// are the caller's job.
    ///
    /// # Errors
    /// Only persistence failures. A failing block yields `Ok` with a
    /// `failed` record.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, trigger = %trigger))]
    pub async fn run(
        &self,
        workflow: &WorkflowRow,
        input: Context,
        trigger: Trigger,
    ) -> Result<ExecutionRow, EngineError> {
        let execution = self
            .store
            .create_execution(workflow.id, input.clone(), trigger.as_str())
            .await?;
        let execution_id = execution.id;

        if !self.store.mark_running(execution_id, Utc::now()).await? {
            warn!(%execution_id, "execution left pending before it could start");
            return Ok(self.store.get_execution(execution_id).await?);
        }
        self.log(&execution, LogEntry::new(LogLevel::Info, "Loop execution started"))
            .await?;

        // ------------------------------------------------------------------
        // Execute enabled blocks sequentially.
        // ------------------------------------------------------------------
        let blocks = self.store.list_blocks(workflow.id).await?;
        let mut context = input;

        let outcome = self.run_blocks(&execution, &blocks, &mut context).await?;

        match outcome {
            Outcome::Completed => self.complete(workflow, &execution, context).await?,
            Outcome::Failed(message) => self.fail(&execution, context, message).await?,
            Outcome::Interrupted => {
                info!(%execution_id, "execution was cancelled mid-run; remaining blocks skipped");
            }
        }

        Ok(self.store.get_execution(execution_id).await?)
    }

    /// Execute one block of `execution`'s workflow against the execution's
    /// original input. The execution record is left untouched.
    ///
    /// # Errors
    /// Only persistence failures. A missing block is a failed `BlockResult`.
    #[instrument(skip_all, fields(execution_id = %execution.id, block_id = %block_id))]
    pub async fn run_single_block(
        &self,
        execution: &ExecutionRow,
        block_id: Uuid,
    ) -> Result<BlockResult, EngineError> {
        let Some(block) = self.store.get_block(execution.workflow_id, block_id).await? else {
            warn!("block does not belong to the execution's loop");
            return Ok(BlockResult::failed("Block not found"));
        };

        info!(block = %block.name, block_type = %block.block_type, "Executing single block");

        let result = match self.execute_block(execution, &block, &execution.input).await {
            Ok(data) => BlockResult::succeeded(data),
            Err(e) if e.is_block_failure() => BlockResult::failed(e.to_string()),
            Err(e) => return Err(e),
        };

        info!(success = result.success, error = ?result.error, "Block execution result");
        Ok(result)
    }

    /// Request cancellation of a running execution.
    ///
    /// Returns `false` (and changes nothing) unless the execution was
    /// `running`. A block that is already executing is not interrupted; the
    /// run stops before its next block.
    #[instrument(skip_all, fields(execution_id = %execution.id))]
    pub async fn cancel(&self, execution: &ExecutionRow) -> Result<bool, EngineError> {
        let termination = Termination {
            status: ExecutionStatus::Cancelled,
            output: None,
            error_message: None,
            completed_at: Utc::now(),
        };

        let cancelled = self.store.finish_execution(execution.id, termination).await?;
        if cancelled {
            self.log(execution, LogEntry::new(LogLevel::Warning, "Loop execution cancelled"))
                .await?;
        } else {
            info!("cancel ignored: execution is not running");
        }
        Ok(cancelled)
    }

    /// Aggregate statistics over every execution of `workflow`.
    pub async fn stats(&self, workflow: &WorkflowRow) -> Result<ExecutionStats, EngineError> {
        let aggregate = self.store.execution_aggregate(workflow.id).await?;

        let success_rate = if aggregate.total == 0 {
            0.0
        } else {
            round2(aggregate.completed as f64 / aggregate.total as f64)
        };

        Ok(ExecutionStats {
            total_executions: aggregate.total,
            successful_executions: aggregate.completed,
            failed_executions: aggregate.failed,
            average_execution_time: aggregate.average_execution_time_ms,
            last_execution: aggregate.last_execution,
            success_rate,
        })
    }

    // -----------------------------------------------------------------------
    // Internal: the block loop and the terminal transitions.
    // -----------------------------------------------------------------------

    async fn run_blocks(
        &self,
        execution: &ExecutionRow,
        blocks: &[BlockRow],
        context: &mut Context,
    ) -> Result<Outcome, EngineError> {
        for block in execution_plan(blocks) {
            if !self.still_running(execution).await? {
                return Ok(Outcome::Interrupted);
            }

            self.log(
                execution,
                LogEntry::new(
                    LogLevel::Info,
                    format!("Executing block: {} ({})", block.name, block.block_type),
                ),
            )
            .await?;

            let started = Instant::now();
            let result = self.execute_block(execution, block, context).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            // A cancel that landed while the block ran: the record is final.
            if !self.still_running(execution).await? {
                return Ok(Outcome::Interrupted);
            }

            let (entry, failure) = match result {
                Ok(data) => {
                    let entry = LogEntry::new(
                        LogLevel::Info,
                        format!("Block completed in {elapsed_ms}ms"),
                    )
                    .with_details(block_details(block, elapsed_ms, Some(&data), None));
                    // Right-biased merge: later blocks win on key conflicts.
                    context.extend(data);
                    (entry, None)
                }
                Err(e) if !e.is_block_failure() => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    let mut details = block_details(block, elapsed_ms, None, Some(&message));
                    if let EngineError::RetryExhausted { attempts, .. } = &e {
                        details["attempts"] = json!(attempts);
                    }
                    let entry = LogEntry::new(
                        LogLevel::Error,
                        format!("Block failed after {elapsed_ms}ms: {message}"),
                    )
                    .with_details(details);
                    (entry, Some(message))
                }
            };

            self.log(execution, entry).await?;

            if let Some(message) = failure {
                return Ok(Outcome::Failed(message));
            }
        }

        Ok(Outcome::Completed)
    }

    async fn complete(
        &self,
        workflow: &WorkflowRow,
        execution: &ExecutionRow,
        context: Context,
    ) -> Result<(), EngineError> {
        let completed_at = Utc::now();
        let termination = Termination {
            status: ExecutionStatus::Completed,
            output: Some(context),
            error_message: None,
            completed_at,
        };

        if !self.store.finish_execution(execution.id, termination).await? {
            info!(execution_id = %execution.id, "execution was cancelled before it could complete");
            return Ok(());
        }

        match self.store.record_workflow_run(workflow.id, completed_at).await {
            Err(DbError::NotFound) => {
                warn!(workflow_id = %workflow.id, "loop was deleted during the run; counter not updated");
            }
            other => other?,
        }

        self.log(
            execution,
            LogEntry::new(LogLevel::Info, "Loop execution completed successfully"),
        )
        .await?;

        if !self.billing.try_deduct(workflow.user_id, CREDITS_PER_RUN).await? {
            self.log(
                execution,
                LogEntry::new(LogLevel::Warning, "Credit limit reached; run was not charged")
                    .with_details(json!({ "user_id": workflow.user_id })),
            )
            .await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        execution: &ExecutionRow,
        context: Context,
        message: String,
    ) -> Result<(), EngineError> {
        self.log(
            execution,
            LogEntry::new(LogLevel::Error, format!("Loop execution failed: {message}")),
        )
        .await?;

        let termination = Termination {
            status: ExecutionStatus::Failed,
            // The context up to the failing block, for diagnosis.
            output: Some(context),
            error_message: Some(message),
            completed_at: Utc::now(),
        };

        if !self.store.finish_execution(execution.id, termination).await? {
            info!(execution_id = %execution.id, "execution was cancelled before it could fail");
        }
        Ok(())
    }

    async fn still_running(&self, execution: &ExecutionRow) -> Result<bool, EngineError> {
        Ok(self.store.get_execution(execution.id).await?.status == ExecutionStatus::Running)
    }

    /// Append `entry` to the record and mirror it as a tracing event.
    async fn log(&self, execution: &ExecutionRow, entry: LogEntry) -> Result<(), EngineError> {
        let (workflow_id, execution_id) = (execution.workflow_id, execution.id);
        match entry.level {
            LogLevel::Info => info!(%workflow_id, %execution_id, "{}", entry.message),
            LogLevel::Warning => warn!(%workflow_id, %execution_id, "{}", entry.message),
            LogLevel::Error => error!(%workflow_id, %execution_id, "{}", entry.message),
        }
        self.store.append_log(execution_id, entry).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single block with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_block(
        &self,
        execution: &ExecutionRow,
        block: &BlockRow,
        context: &Context,
    ) -> Result<Context, EngineError> {
        let implementation = self.registry.resolve(&block.block_type).ok_or_else(|| {
            EngineError::BlockFailed {
                block: block.name.clone(),
                message: UNKNOWN_BLOCK_TYPE.to_string(),
            }
        })?;

        let invocation = BlockInvocation {
            workflow_id: execution.workflow_id,
            execution_id: execution.id,
            block_id: block.id,
            block_name: block.name.clone(),
            config: block.config.clone(),
        };

        self.execute_with_retry(implementation, context, &invocation).await
    }

    async fn execute_with_retry(
        &self,
        block: Arc<dyn ExecutableBlock>,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, EngineError> {
        let name = invocation.block_name.as_str();
        let mut attempts = 0u32;

        loop {
            match self.attempt(block.clone(), context, invocation).await? {
                Ok(output) => return Ok(output),

                Err(e) if e.is_retryable() => {
                    let msg = e.message();
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        warn!("block '{}' gave up after {} attempts: {}", name, attempts, msg);
                        return Err(EngineError::RetryExhausted {
                            block: name.to_owned(),
                            attempts,
                            message: msg,
                        });
                    }

                    let delay = retry_delay(self.config.retry_base_delay, attempts);

                    warn!(
                        "block '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        name, attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }

                Err(e) => {
                    return Err(EngineError::BlockFailed {
                        block: name.to_owned(),
                        message: e.message(),
                    });
                }
            }
        }
    }

    /// One attempt on its own task, so a panic stays inside the block
    /// boundary and a timeout can abort it.
    async fn attempt(
        &self,
        block: Arc<dyn ExecutableBlock>,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Result<Context, BlockError>, EngineError> {
        let name = invocation.block_name.clone();
        let (context, task_invocation) = (context.clone(), invocation.clone());

        let handle = tokio::spawn(
            async move { block.execute(&context, &task_invocation).await }
                .instrument(tracing::Span::current()),
        );
        let abort = handle.abort_handle();

        let joined = match self.config.block_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(EngineError::BlockTimedOut { block: name, timeout: limit });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => Ok(result),
            Err(e) if e.is_panic() => Err(EngineError::BlockPanicked {
                block: name,
                message: panic_message(e.into_panic()),
            }),
            Err(_) => Err(EngineError::BlockFailed {
                block: name,
                message: "block task was cancelled".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for LoopExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopExecutor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Structured details of one block step in the execution log.
fn block_details(
    block: &BlockRow,
    elapsed_ms: u64,
    data: Option<&Context>,
    error: Option<&str>,
) -> Value {
    json!({
        "block_id": block.id,
        "name": block.name,
        "type": block.block_type,
        "execution_time_ms": elapsed_ms,
        "success": error.is_none(),
        "data": data,
        "error": error,
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

/// Back-off before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating at [`MAX_RETRY_DELAY`].
pub(crate) fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
