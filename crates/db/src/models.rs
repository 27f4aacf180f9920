//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no execution behaviour.
//! The orchestrator lives in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// JSON object payload (execution input/output, block config bags).
pub type JsonMap = Map<String, Value>;

// ---------------------------------------------------------------------------
// users
// ---------------------------------------------------------------------------

/// Subscription plan of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free       => write!(f, "free"),
            Self::Pro        => write!(f, "pro"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free"       => Ok(Self::Free),
            "pro"        => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other        => Err(format!("unknown plan: {other}")),
        }
    }
}

/// A persisted user row; only the fields the engine's billing needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub plan: Plan,
    pub credits_used: i64,
    pub credits_limit: i64,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    /// Pre-check performed by callers before requesting an execution.
    pub fn has_credits_remaining(&self) -> bool {
        self.credits_used < self.credits_limit
    }
}

/// Fields supplied when creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub plan: Plan,
    pub credits_limit: i64,
}

// ---------------------------------------------------------------------------
// loops (workflows)
// ---------------------------------------------------------------------------

/// A persisted workflow ("loop") row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// manual | webhook | schedule | email
    pub trigger_type: String,
    pub is_active: bool,
    pub is_published: bool,
    pub execution_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub category: String,
    pub created_at: DateTime<Utc>,
    /// Set on soft delete; deleted workflows are invisible to lookups.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a workflow.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    pub is_active: bool,
    pub is_published: bool,
    pub tags: Vec<String>,
    pub category: String,
}

impl NewWorkflow {
    /// An inactive, unpublished, manually-triggered workflow in `general`.
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            description: None,
            trigger_type: "manual".to_string(),
            is_active: false,
            is_published: false,
            tags: Vec::new(),
            category: "general".to_string(),
        }
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }
}

// ---------------------------------------------------------------------------
// loop_blocks
// ---------------------------------------------------------------------------

/// A persisted block row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    pub description: Option<String>,
    /// Free-form, type-specific configuration.
    pub config: Value,
    pub order: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when adding a block to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Value,
    /// `None` appends after the current highest order.
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl NewBlock {
    pub fn new(block_type: impl Into<String>, name: impl Into<String>, config: Value) -> Self {
        Self {
            block_type: block_type.into(),
            name: name.into(),
            description: None,
            config,
            order: None,
            enabled: true,
        }
    }

    pub fn at(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ---------------------------------------------------------------------------
// loop_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// `completed`, `failed` and `cancelled` are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "pending"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One entry of an execution's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Serialised as an RFC 3339 / ISO-8601 string.
    pub timestamp: DateTime<Utc>,
    /// Structured payload, e.g. a block's id, timing and result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub input: JsonMap,
    pub output: Option<JsonMap>,
    /// Set only when the execution failed.
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// manual | webhook | schedule | …
    pub triggered_by: String,
    pub log: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRow {
    /// Human readable run time: `"850ms"`, `"2.5s"`, `"1.25min"`.
    pub fn duration_label(&self) -> Option<String> {
        let ms = self.execution_time_ms.or_else(|| {
            let (start, end) = (self.started_at?, self.completed_at?);
            Some((end - start).num_milliseconds())
        })?;

        Some(if ms < 1_000 {
            format!("{ms}ms")
        } else if ms < 60_000 {
            format!("{}s", round2(ms as f64 / 1_000.0))
        } else {
            format!("{}min", round2(ms as f64 / 60_000.0))
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The terminal transition applied by [`crate::Store::finish_execution`].
#[derive(Debug, Clone)]
pub struct Termination {
    pub status: ExecutionStatus,
    pub output: Option<JsonMap>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Raw aggregate over one workflow's executions.
#[derive(Debug, Clone)]
pub struct ExecutionAggregate {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    /// Mean `execution_time_ms` over completed runs; `None` without any.
    pub average_execution_time_ms: Option<f64>,
    pub last_execution: Option<ExecutionRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn execution(ms: Option<i64>) -> ExecutionRow {
        ExecutionRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            status: ExecutionStatus::Completed,
            input: JsonMap::new(),
            output: None,
            error_message: None,
            execution_time_ms: ms,
            started_at: None,
            completed_at: None,
            triggered_by: "manual".into(),
            log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn only_finished_statuses_are_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn duration_label_scales_units() {
        assert_eq!(execution(Some(850)).duration_label().as_deref(), Some("850ms"));
        assert_eq!(execution(Some(2_500)).duration_label().as_deref(), Some("2.5s"));
        assert_eq!(execution(Some(75_000)).duration_label().as_deref(), Some("1.25min"));
        assert_eq!(execution(None).duration_label(), None);
    }

    #[test]
    fn duration_label_falls_back_to_timestamps() {
        let mut exec = execution(None);
        let start = Utc::now();
        exec.started_at = Some(start);
        exec.completed_at = Some(start + Duration::milliseconds(120));
        assert_eq!(exec.duration_label().as_deref(), Some("120ms"));
    }

    #[test]
    fn log_entry_serialises_iso_timestamp_and_skips_empty_details() {
        let entry = LogEntry::new(LogLevel::Info, "execution started");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "info");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert!(json.get("details").is_none());
    }

    #[test]
    fn credits_remaining_is_strict() {
        let mut user = UserRow {
            id: Uuid::new_v4(),
            name: "ada".into(),
            plan: Plan::Free,
            credits_used: 9,
            credits_limit: 10,
            created_at: Utc::now(),
        };
        assert!(user.has_credits_remaining());
        user.credits_used = 10;
        assert!(!user.has_credits_remaining());
    }
}
