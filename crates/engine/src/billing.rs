//! The billing collaborator charged once per completed run.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use db::Store;

use crate::EngineError;

/// Credits charged for one successful end-to-end run.
pub const CREDITS_PER_RUN: i64 = 1;

#[async_trait]
pub trait Billing: Send + Sync {
    /// Charge `amount` credits to `user_id` if that stays within the user's
    /// limit. Returns whether the charge was applied.
    async fn try_deduct(&self, user_id: Uuid, amount: i64) -> Result<bool, EngineError>;
}

/// Charges credits through the store's atomic increment-with-limit.
pub struct StoreBilling {
    store: Arc<dyn Store>,
}

impl StoreBilling {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Billing for StoreBilling {
    async fn try_deduct(&self, user_id: Uuid, amount: i64) -> Result<bool, EngineError> {
        Ok(self.store.try_deduct_credits(user_id, amount).await?)
    }
}
