//! Provider registration with the engine

use std::sync::Arc;
use std::time::Duration;

use railgun_core::Chain;

use crate::chain::ChainClient;
use crate::engine::{FallbackProviderConfig, ProviderDescriptor, RailgunFees};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::lifecycle::EngineLifecycle;

/// Default interval at which the engine polls the provider set
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Chain the engine can now use, with its fee schedule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectedNetwork {
    pub chain: Chain,
    pub fees: RailgunFees,
}

pub struct ProviderConnector {
    lifecycle: Arc<EngineLifecycle>,
    network_id: u64,
}

impl ProviderConnector {
    /// `network_id` is the chain the operator is configured for
    pub fn new(lifecycle: Arc<EngineLifecycle>, network_id: u64) -> Self {
        Self {
            lifecycle,
            network_id,
        }
    }

    /// Fallback set with one endpoint at the default ranking
    pub fn for_single_url(chain_id: u64, url: impl Into<String>) -> FallbackProviderConfig {
        FallbackProviderConfig {
            chain_id,
            providers: vec![ProviderDescriptor::new(url)],
        }
    }

    /// Register the fallback set with the engine
    ///
    /// Endpoint liveness is not checked here; the engine finds dead endpoints
    /// on first use.
    pub async fn connect(
        &self,
        config: &FallbackProviderConfig,
        polling_interval: Duration,
    ) -> OrchestratorResult<ConnectedNetwork> {
        if config.providers.is_empty() {
            return Err(OrchestratorError::ProviderConfig(format!(
                "no providers for chain {}",
                config.chain_id
            )));
        }
        if config.chain_id != self.network_id {
            return Err(OrchestratorError::ProviderConfig(format!(
                "provider set is for chain {}, active network is {}",
                config.chain_id, self.network_id
            )));
        }

        let mut ordered = config.clone();
        ordered.providers.sort_by_key(|d| d.priority);

        let engine = self.lifecycle.lease().await?;
        let fees = engine
            .load_provider(&ordered, polling_interval)
            .await
            .map_err(|e| OrchestratorError::ProviderConfig(e.to_string()))?;

        tracing::info!(
            "Provider loaded for chain {} ({} endpoint(s))",
            config.chain_id,
            ordered.providers.len()
        );
        for (name, value) in &fees.0 {
            tracing::debug!("Railgun fee {}: {}", name, value);
        }

        Ok(ConnectedNetwork {
            chain: Chain::evm(config.chain_id),
            fees,
        })
    }
}

/// Log block number and signer address; failures only warn
pub async fn probe(chain: &dyn ChainClient) {
    match chain.block_number().await {
        Ok(block) => tracing::info!("Connected to chain {} at block {}", chain.chain_id(), block),
        Err(e) => tracing::warn!("Block number probe failed: {}", e),
    }
    tracing::info!("Public wallet: {}", chain.signer_address());
}
