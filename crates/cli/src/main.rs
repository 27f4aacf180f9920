//! `loops` CLI entry-point.
//!
//! Available sub-commands:
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a loop definition JSON file.
//! - `run`      — execute a loop definition end to end and print the record.
//! - `stats`    — print execution statistics of a stored loop.
//! - `cancel`   — cancel a running execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use blocks::{BlockRegistry, BlockSettings, LlmSettings};
use db::models::{ExecutionStatus, NewUser, Plan};
use db::{MemoryStore, PgStore, Store};
use engine::{ExecutorConfig, LoopDefinition, LoopExecutor};

#[derive(Parser)]
#[command(name = "loops", about = "Block-based workflow execution engine", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Engine and block tuning, shared by every sub-command.
#[derive(Args)]
struct Settings {
    /// Retries of a block failing with a transient error.
    #[arg(long, env = "LOOPS_MAX_RETRIES", default_value_t = 3, global = true)]
    max_retries: u32,

    /// Base delay of the exponential retry back-off, in milliseconds.
    #[arg(long, env = "LOOPS_RETRY_BASE_DELAY_MS", default_value_t = 100, global = true)]
    retry_base_delay_ms: u64,

    /// Upper bound of one block attempt, in seconds. Unbounded when unset.
    #[arg(long, env = "LOOPS_BLOCK_TIMEOUT_SECS", global = true)]
    block_timeout_secs: Option<u64>,

    /// Cap applied to `delay` blocks, in seconds.
    #[arg(long, env = "LOOPS_MAX_DELAY_SECS", default_value_t = 300, global = true)]
    max_delay_secs: u64,

    /// Timeout of outbound HTTP requests made by blocks, in seconds.
    #[arg(long, env = "LOOPS_HTTP_TIMEOUT_SECS", default_value_t = 30, global = true)]
    http_timeout_secs: u64,

    /// Wall-clock limit of `code` blocks, in seconds.
    #[arg(long, env = "LOOPS_CODE_TIMEOUT_SECS", default_value_t = 30, global = true)]
    code_timeout_secs: u64,

    #[arg(long, env = "LOOPS_LLM_ENDPOINT", global = true)]
    llm_endpoint: Option<String>,

    #[arg(long, env = "LOOPS_LLM_MODEL", global = true)]
    llm_model: Option<String>,

    #[arg(long, env = "LOOPS_LLM_API_KEY", hide_env_values = true, global = true)]
    llm_api_key: Option<String>,

    /// HTTP relay for `email` and `sms` blocks; messages are only logged
    /// without one.
    #[arg(long, env = "LOOPS_RELAY_URL", global = true)]
    relay_url: Option<String>,
}

impl Settings {
    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            block_timeout: self.block_timeout_secs.map(Duration::from_secs),
        }
    }

    fn block_settings(&self) -> BlockSettings {
        let defaults = LlmSettings::default();
        BlockSettings {
            max_delay: Duration::from_secs(self.max_delay_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            code_timeout: Duration::from_secs(self.code_timeout_secs),
            llm: LlmSettings {
                endpoint: self.llm_endpoint.clone().unwrap_or(defaults.endpoint),
                default_model: self.llm_model.clone().unwrap_or(defaults.default_model),
                api_key: self.llm_api_key.clone(),
            },
            relay_url: self.relay_url.clone(),
        }
    }

    fn executor(&self, store: Arc<dyn Store>) -> LoopExecutor {
        let registry = BlockRegistry::with_builtins(&self.block_settings());
        LoopExecutor::with_store_billing(store, registry, self.executor_config())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a loop definition JSON file.
    Validate {
        /// Path to the loop definition file.
        path: PathBuf,
    },
    /// Execute a loop definition and print the execution record as JSON.
    Run {
        /// Path to the loop definition file.
        path: PathBuf,
        /// Persist to Postgres instead of an in-memory store.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        /// Credit limit of the user created for the run.
        #[arg(long, default_value_t = 100)]
        credits_limit: i64,
    },
    /// Print execution statistics of a stored loop.
    Stats {
        loop_id: Uuid,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Cancel a running execution.
    Cancel {
        execution_id: Uuid,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            let registry = BlockRegistry::with_builtins(&cli.settings.block_settings());
            match engine::validate_definition(&definition, &registry) {
                Ok(order) => println!("Loop '{}' is valid. Execution order: {order:?}", definition.name),
                Err(e) => bail!("validation failed: {e}"),
            }
        }
        Command::Run { path, database_url, credits_limit } => {
            let definition = read_definition(&path)?;
            let registry = BlockRegistry::with_builtins(&cli.settings.block_settings());
            engine::validate_definition(&definition, &registry)
                .with_context(|| format!("{} is not a runnable loop", path.display()))?;

            let store: Arc<dyn Store> = match database_url {
                Some(url) => Arc::new(connect(&url).await?),
                None => Arc::new(MemoryStore::new()),
            };
            run_definition(&cli.settings, store, definition, credits_limit).await?;
        }
        Command::Stats { loop_id, database_url } => {
            let executor = cli.settings.executor(Arc::new(connect(&database_url).await?));
            let workflow = executor.workflow(loop_id).await?;
            let stats = executor.stats(&workflow).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cancel { execution_id, database_url } => {
            let executor = cli.settings.executor(Arc::new(connect(&database_url).await?));
            let execution = executor.execution(execution_id).await?;
            if !executor.cancel(&execution).await? {
                bail!("execution {execution_id} is {} and cannot be cancelled", execution.status);
            }
            println!("Execution {execution_id} cancelled");
        }
    }

    Ok(())
}

fn read_definition(path: &Path) -> Result<LoopDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid loop definition in {}", path.display()))
}

async fn connect(database_url: &str) -> Result<PgStore> {
    let pool = db::pool::create_pool(database_url, 5)
        .await
        .context("failed to connect to database")?;
    Ok(PgStore::new(pool))
}

/// Create a user, the loop and its blocks, run it once and print the record.
async fn run_definition(
    settings: &Settings,
    store: Arc<dyn Store>,
    definition: LoopDefinition,
    credits_limit: i64,
) -> Result<()> {
    let user = store
        .create_user(NewUser { name: "cli".to_string(), plan: Plan::Free, credits_limit })
        .await?;
    let workflow = store.create_workflow(definition.to_new_workflow(user.id)).await?;
    for block in &definition.blocks {
        store.insert_block(workflow.id, block.clone()).await?;
    }
    info!(loop_id = %workflow.id, blocks = definition.blocks.len(), "loop created");

    let executor = settings.executor(store);
    let execution = executor
        .run(&workflow, definition.input.clone(), definition.trigger)
        .await?;

    println!("{}", serde_json::to_string_pretty(&execution)?);

    if execution.status == ExecutionStatus::Failed {
        bail!(
            "execution failed: {}",
            execution.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
