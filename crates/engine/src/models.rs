//! Engine-facing models: how a run was triggered, loop definition files and
//! execution statistics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blocks::Context;
use db::models::{ExecutionRow, NewBlock, NewWorkflow};

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// What started an execution; stored as `triggered_by`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Webhook,
    Schedule,
    Email,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
            Self::Email => "email",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual"   => Ok(Self::Manual),
            "webhook"  => Ok(Self::Webhook),
            "schedule" => Ok(Self::Schedule),
            "email"    => Ok(Self::Email),
            other      => Err(format!("unknown trigger: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// LoopDefinition
// ---------------------------------------------------------------------------

/// A complete loop as written in a definition file: workflow metadata, its
/// blocks and the input of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Initial context of a run started from this file.
    #[serde(default)]
    pub input: Context,
    pub blocks: Vec<NewBlock>,
}

fn default_category() -> String {
    "general".to_string()
}

impl LoopDefinition {
    /// The active workflow row this definition creates for `user_id`.
    pub fn to_new_workflow(&self, user_id: Uuid) -> NewWorkflow {
        NewWorkflow {
            user_id,
            name: self.name.clone(),
            description: self.description.clone(),
            trigger_type: self.trigger.as_str().to_string(),
            is_active: true,
            is_published: false,
            tags: self.tags.clone(),
            category: self.category.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionStats
// ---------------------------------------------------------------------------

/// Read-only aggregate over one workflow's executions.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    /// Mean `execution_time_ms` of completed runs; `None` without any.
    pub average_execution_time: Option<f64>,
    pub last_execution: Option<ExecutionRow>,
    /// `successful / total` in `0.0..=1.0`, two decimals; `0.0` without runs.
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_round_trips_through_text() {
        for trigger in [Trigger::Manual, Trigger::Webhook, Trigger::Schedule, Trigger::Email] {
            assert_eq!(trigger.as_str().parse::<Trigger>().unwrap(), trigger);
        }
        assert!("cron".parse::<Trigger>().is_err());
    }

    #[test]
    fn definition_fills_defaults() {
        let def: LoopDefinition = serde_json::from_value(json!({
            "name": "welcome",
            "blocks": [{ "type": "delay", "name": "wait", "config": { "delay": 0 } }]
        }))
        .unwrap();

        assert_eq!(def.trigger, Trigger::Manual);
        assert_eq!(def.category, "general");
        assert!(def.input.is_empty());
        assert!(def.blocks[0].enabled);
        assert_eq!(def.blocks[0].order, None);

        let wf = def.to_new_workflow(Uuid::new_v4());
        assert!(wf.is_active);
        assert_eq!(wf.trigger_type, "manual");
    }
}
