//! Transaction submission and confirmation
//!
//! Nothing here resubmits. A failed or timed-out transaction is reported and
//! the caller decides whether to reprice and send a new one.

use std::sync::Arc;
use std::time::Duration;

use railgun_core::{PopulatedTransaction, TxHash};

use crate::chain::{ChainClient, Confirmation};
use crate::error::{ChainError, OrchestratorError, OrchestratorResult};

/// Default time to wait for inclusion
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct Broadcaster {
    chain: Arc<dyn ChainClient>,
    confirmation_timeout: Duration,
}

impl Broadcaster {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Sign and submit; the transaction is consumed
    pub async fn submit(&self, tx: PopulatedTransaction) -> OrchestratorResult<TxHash> {
        let tx_hash = self.chain.submit(&tx).await.map_err(broadcast_error)?;
        tracing::info!("Submitted transaction {} to {}", tx_hash, tx.to());
        Ok(tx_hash)
    }

    pub async fn await_confirmation(&self, tx_hash: TxHash) -> OrchestratorResult<Confirmation> {
        tracing::info!("Waiting for confirmation of {}...", tx_hash);
        let confirmation = self
            .chain
            .wait_for_confirmation(tx_hash, self.confirmation_timeout)
            .await
            .map_err(broadcast_error)?;

        tracing::info!(
            "Transaction {} confirmed in block {:?} (gas used {})",
            confirmation.tx_hash,
            confirmation.block_number,
            confirmation.gas_used
        );
        Ok(confirmation)
    }

    pub async fn submit_and_confirm(&self, tx: PopulatedTransaction) -> OrchestratorResult<Confirmation> {
        let tx_hash = self.submit(tx).await?;
        self.await_confirmation(tx_hash).await
    }
}

fn broadcast_error(err: ChainError) -> OrchestratorError {
    match err {
        ChainError::Timeout { tx_hash, timeout } => {
            OrchestratorError::ConfirmationTimeout { tx_hash, timeout }
        }
        ChainError::Rejected(msg) => OrchestratorError::Broadcast(msg),
        ChainError::Reverted(hash) => OrchestratorError::Broadcast(format!("{} reverted", hash)),
        other => OrchestratorError::Broadcast(other.to_string()),
    }
}
