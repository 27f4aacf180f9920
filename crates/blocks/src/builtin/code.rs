//! `code` — run a subprocess with the context on stdin.
//!
//! ```json
//! { "command": "python3", "args": ["transform.py"], "timeout_secs": 10 }
//! ```
//!
//! The context is written to stdin as JSON. A JSON object on stdout becomes
//! the block's data, any other JSON value is stored under `result`, and
//! plain text under `stdout`. A non-zero exit status fails the block.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::parse_config;
use crate::{BlockError, BlockInvocation, Context, ExecutableBlock};

#[derive(Debug, Deserialize)]
struct CodeConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    timeout_secs: Option<f64>,
}

pub struct CodeBlock {
    max_timeout: Duration,
}

impl CodeBlock {
    pub fn new(max_timeout: Duration) -> Self {
        Self { max_timeout }
    }
}

#[async_trait]
impl ExecutableBlock for CodeBlock {
    async fn execute(
        &self,
        context: &Context,
        invocation: &BlockInvocation,
    ) -> Result<Context, BlockError> {
        let cfg: CodeConfig = parse_config(&invocation.config)?;

        let timeout = cfg
            .timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| Duration::try_from_secs_f64(s).unwrap_or(self.max_timeout))
            .map_or(self.max_timeout, |t| t.min(self.max_timeout));

        let stdin = serde_json::to_vec(context)
            .map_err(|e| BlockError::Fatal(format!("serialising context: {e}")))?;

        let mut child = Command::new(&cfg.command)
            .args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BlockError::Fatal(format!("cannot spawn '{}': {e}", cfg.command)))?;

        // Stdin is fed under the same timeout as the wait.
        let pipe = child.stdin.take();
        let feed = async move {
            if let Some(mut pipe) = pipe {
                // The program may exit without reading its input.
                if let Err(e) = pipe.write_all(&stdin).await {
                    debug!("block '{}' stdin not consumed: {e}", invocation.block_name);
                }
            }
        };
        let run = async move { tokio::join!(feed, child.wait_with_output()).1 };

        let output = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| BlockError::Fatal(format!("'{}' timed out after {timeout:?}", cfg.command)))?
            .map_err(|e| BlockError::Fatal(format!("waiting for '{}': {e}", cfg.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BlockError::Fatal(if stderr.is_empty() {
                format!("'{}' exited with {}", cfg.command, output.status)
            } else {
                stderr
            }));
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_stdout(stdout: &str) -> Context {
    let trimmed = stdout.trim();
    let mut out = Context::new();
    if trimmed.is_empty() {
        return out;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            out.insert("result".to_string(), other);
            out
        }
        Err(_) => {
            out.insert("stdout".to_string(), Value::String(trimmed.to_string()));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, invocation};
    use serde_json::json;

    #[test]
    fn stdout_shapes() {
        assert_eq!(parse_stdout("{\"a\":1}\n")["a"], json!(1));
        assert_eq!(parse_stdout("[1,2]")["result"], json!([1, 2]));
        assert_eq!(parse_stdout("done")["stdout"], json!("done"));
        assert!(parse_stdout("  \n").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echoes_json_object_from_stdout() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "sh", "args": ["-c", "cat > /dev/null; echo '{\"y\": 2}'"] });

        let out = block
            .execute(&context(json!({ "x": 1 })), &invocation(cfg))
            .await
            .expect("script should succeed");

        assert_eq!(out["y"], json!(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn receives_context_on_stdin() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "cat" });

        let out = block
            .execute(&context(json!({ "x": 1 })), &invocation(cfg))
            .await
            .unwrap();

        assert_eq!(out["x"], json!(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "sh", "args": ["-c", "echo nope >&2; exit 3"] });

        let err = block.execute(&Context::new(), &invocation(cfg)).await.unwrap_err();
        assert_eq!(err, BlockError::Fatal("nope".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_script_times_out() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "sleep", "args": ["5"], "timeout_secs": 0.2 });

        let err = block.execute(&Context::new(), &invocation(cfg)).await.unwrap_err();
        assert!(matches!(err, BlockError::Fatal(msg) if msg.contains("timed out")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_a_program_that_never_reads_stdin() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "sleep", "args": ["5"], "timeout_secs": 0.5 });
        let big = context(json!({ "blob": "x".repeat(1 << 20) }));

        let start = std::time::Instant::now();
        let err = block.execute(&big, &invocation(cfg)).await.unwrap_err();

        assert!(matches!(err, BlockError::Fatal(msg) if msg.contains("timed out")));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn huge_timeout_is_capped_instead_of_panicking() {
        let block = CodeBlock::new(Duration::from_secs(10));
        let cfg = json!({ "command": "true", "timeout_secs": 1e20 });

        let out = block.execute(&Context::new(), &invocation(cfg)).await;
        assert!(out.is_ok());
    }
}
