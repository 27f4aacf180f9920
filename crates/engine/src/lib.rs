//! `engine` crate — the loop execution orchestrator, execution planning and
//! the billing collaborator.

pub mod models;
pub mod error;
pub mod plan;
pub mod billing;
pub mod executor;

pub use models::{ExecutionStats, LoopDefinition, Trigger};
pub use error::EngineError;
pub use plan::{can_execute, execution_plan, validate_definition};
pub use billing::{Billing, StoreBilling};
pub use executor::{ExecutorConfig, LoopExecutor};
