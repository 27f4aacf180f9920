//! `delay` — pause the execution for `config.delay` seconds.
//!
//! The wait happens inside the execution's own flow, so it stalls the task
//! driving the orchestration. Configured delays are clamped to
//! `BlockSettings::max_delay` so a single block cannot pin a worker
//! indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::parse_config;
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

fn default_delay() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct DelayConfig {
    #[serde(default = "default_delay")]
    delay: f64,
}

pub struct DelayBlock {
    max_delay: Duration,
}

impl DelayBlock {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }
}

#[async_trait]
impl ExecutableBlock for DelayBlock {
    async fn execute(
        &self,
        _context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: DelayConfig = parse_config(&invocation.config)?;

        if !cfg.delay.is_finite() || cfg.delay < 0.0 {
            return Err(BlockError::InvalidConfig(format!(
                "delay must be a non-negative number of seconds, got {}",
                cfg.delay
            )));
        }

        let mut wait = Duration::try_from_secs_f64(cfg.delay).unwrap_or(Duration::MAX);
        if wait > self.max_delay {
            warn!(
                "block '{}' requested {:?} delay, clamping to {:?}",
                invocation.block_name, wait, self.max_delay
            );
            wait = self.max_delay;
        }

        debug!("block '{}' sleeping for {:?}", invocation.block_name, wait);
        tokio::time::sleep(wait).await;

        Ok(Context::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::invocation;
    use serde_json::json;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn sleeps_for_configured_seconds() {
        let block = DelayBlock::new(Duration::from_secs(60));
        let start = Instant::now();

        let out = block
            .execute(&Context::new(), &invocation(json!({ "delay": 2 })))
            .await
            .expect("delay should succeed");

        assert!(out.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn defaults_to_one_second() {
        let block = DelayBlock::new(Duration::from_secs(60));
        let start = Instant::now();
        block.execute(&Context::new(), &invocation(json!({}))).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn clamps_to_max_delay() {
        let block = DelayBlock::new(Duration::from_secs(1));
        let start = Instant::now();
        block
            .execute(&Context::new(), &invocation(json!({ "delay": 3600 })))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_too_large_for_a_duration_is_clamped() {
        let block = DelayBlock::new(Duration::from_secs(1));
        let start = Instant::now();
        block
            .execute(&Context::new(), &invocation(json!({ "delay": 1e20 })))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_delay_returns_immediately() {
        let block = DelayBlock::new(Duration::from_secs(1));
        let out = block
            .execute(&Context::new(), &invocation(json!({ "delay": 0 })))
            .await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn rejects_negative_and_non_numeric_delay() {
        let block = DelayBlock::new(Duration::from_secs(1));

        let negative = block
            .execute(&Context::new(), &invocation(json!({ "delay": -1 })))
            .await;
        assert!(matches!(negative, Err(BlockError::InvalidConfig(_))));

        let text = block
            .execute(&Context::new(), &invocation(json!({ "delay": "soon" })))
            .await;
        assert!(matches!(text, Err(BlockError::InvalidConfig(_))));
    }
}
