//! Wallet ledger seam.
//!
//! Refund credits land in a wallet owned by the surrounding application.
//! The lifecycle layer guarantees at most one `credit` call per cancelled
//! appointment; implementations only need to record it.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Credit `amount` (smallest currency unit) to a user's wallet.
    async fn credit(&self, user_id: i64, amount: i64, reason: &str) -> Result<()>;
}

/// One credit recorded by [`RecordingWallet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCredit {
    pub user_id: i64,
    pub amount: i64,
    pub reason: String,
}

/// In-memory ledger for tests and host integration suites.
#[derive(Debug, Default)]
pub struct RecordingWallet {
    credits: Mutex<Vec<WalletCredit>>,
}

impl RecordingWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credits(&self) -> Vec<WalletCredit> {
        self.credits.lock().unwrap().clone()
    }

    pub fn total_for(&self, user_id: i64) -> i64 {
        self.credits
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.amount)
            .sum()
    }
}

#[async_trait]
impl WalletLedger for RecordingWallet {
    async fn credit(&self, user_id: i64, amount: i64, reason: &str) -> Result<()> {
        self.credits.lock().unwrap().push(WalletCredit {
            user_id,
            amount,
            reason: reason.to_string(),
        });
        tracing::info!("wallet credit: {} to user {} ({})", amount, user_id, reason);
        Ok(())
    }
}
