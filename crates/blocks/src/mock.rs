//! `MockBlock` — a test double for `ExecutableBlock`.
//!
//! Useful in unit and integration tests where a real block implementation is
//! either unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

/// Behaviour injected into `MockBlock` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON object (merged with `{"block": name}`).
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with `Retryable` for the first `n` calls, then return the value.
    Flaky { failures: usize, value: Value },
    /// Panic inside `execute`.
    Panic(String),
}

/// A mock block that records every context it receives and returns a
/// programmer-specified result.
pub struct MockBlock {
    /// Label used in test assertions.
    pub name: String,
    /// What the block will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All contexts seen by this block (in call order).
    pub calls: Arc<Mutex<Vec<Context>>>,
    /// Artificial latency applied before the behaviour runs.
    pub latency: Duration,
    attempts: AtomicUsize,
}

impl MockBlock {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Create a mock that panics.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    /// Sleep for `latency` on every call before acting.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times this block has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn output(&self, value: &Value) -> Context {
        // Tag the output with the block's name so tests can trace the data
        // flowing through the pipeline.
        let mut out = Context::new();
        out.insert("block".to_string(), json!(self.name));
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ExecutableBlock for MockBlock {
    async fn execute(
        &self,
        context: &Context,
        _invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        self.calls.lock().unwrap().push(context.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::FailRetryable(msg) => Err(BlockError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(BlockError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if attempt < *failures {
                    Err(BlockError::Retryable(format!(
                        "{} transient failure #{}",
                        self.name,
                        attempt + 1
                    )))
                } else {
                    Ok(self.output(value))
                }
            }
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}
