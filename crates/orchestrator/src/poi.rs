//! Proof-of-innocence reporting
//!
//! Every txid version is handled on its own: an aggregator failure for one
//! version is logged and recorded, never propagated into another version's
//! result.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use railgun_core::{Chain, PoiStatus, TxidVersion, WalletId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::engine::{EngineEvent, PoiProofProgress};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::lifecycle::EngineLifecycle;

/// Result of POI generation for one txid version
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoiOutcome {
    Generated,
    Failed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoiReport {
    pub outcomes: BTreeMap<TxidVersion, PoiOutcome>,
}

impl PoiReport {
    pub fn failed_versions(&self) -> Vec<TxidVersion> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, PoiOutcome::Failed(_)))
            .map(|(version, _)| *version)
            .collect()
    }
}

type CacheKey = (TxidVersion, Chain, WalletId);

pub struct PoiReporter {
    lifecycle: Arc<EngineLifecycle>,
    versions: Vec<TxidVersion>,
    cache: DashMap<CacheKey, PoiStatus>,
}

impl PoiReporter {
    pub fn new(lifecycle: Arc<EngineLifecycle>) -> Self {
        Self {
            lifecycle,
            versions: TxidVersion::ALL.to_vec(),
            cache: DashMap::new(),
        }
    }

    /// Request POI proofs for the wallet's pending txids, per version
    ///
    /// Only a stopped engine fails the whole call.
    pub async fn generate(&self, chain: Chain, wallet: &WalletId) -> OrchestratorResult<PoiReport> {
        let engine = self.lifecycle.lease().await?;
        let mut report = PoiReport::default();

        for version in &self.versions {
            tracing::info!("Generating POIs for wallet {} ({})", wallet, version.label());
            let outcome = match engine.generate_pois(*version, chain, wallet).await {
                Ok(()) => PoiOutcome::Generated,
                Err(e) => {
                    tracing::warn!("POI generation failed for {}: {}", version.label(), e);
                    PoiOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.insert(*version, outcome);
        }

        Ok(report)
    }

    /// Pending-spent and spendable-received txids for one version
    ///
    /// The result is merged into the session cache, so a txid seen spendable
    /// once stays spendable.
    pub async fn summarize(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> OrchestratorResult<PoiStatus> {
        let engine = self.lifecycle.lease().await?;
        let service_error = |e: crate::error::EngineError| OrchestratorError::PoiService {
            version,
            message: e.to_string(),
        };

        let pending = engine
            .pending_spent_pois(version, chain, wallet)
            .await
            .map_err(service_error)?;
        let spendable = engine
            .spendable_received_txids(version, chain, wallet)
            .await
            .map_err(service_error)?;

        let fetched = PoiStatus::new(pending, spendable);
        let mut entry = self
            .cache
            .entry((version, chain, wallet.clone()))
            .or_default();
        entry.merge(fetched);
        let status = entry.clone();
        drop(entry);

        tracing::info!(
            "{}: {} pending spent, {} spendable received",
            version.label(),
            status.pending_spent.len(),
            status.spendable_received.len()
        );
        Ok(status)
    }

    /// Summaries for every version that answered; failures only warn
    pub async fn summarize_all(&self, chain: Chain, wallet: &WalletId) -> BTreeMap<TxidVersion, PoiStatus> {
        let mut summaries = BTreeMap::new();
        for version in &self.versions {
            match self.summarize(*version, chain, wallet).await {
                Ok(status) => {
                    summaries.insert(*version, status);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", version.label(), e),
            }
        }
        summaries
    }

    pub fn cached(&self, version: TxidVersion, chain: Chain, wallet: &WalletId) -> Option<PoiStatus> {
        self.cache
            .get(&(version, chain, wallet.clone()))
            .map(|status| status.clone())
    }

    /// Log POI proof progress events until the channel closes
    pub fn spawn_progress_logger(&self) -> JoinHandle<()> {
        let mut events = self.lifecycle.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::PoiProof(progress)) => log_progress(&progress),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn log_progress(p: &PoiProofProgress) {
    tracing::info!(
        "POI proof {} [{} {}] {:.0}% ({}/{}) list={} txid={}",
        p.status,
        p.txid_version.label(),
        p.chain,
        p.progress * 100.0,
        p.index,
        p.total_count,
        p.list_key,
        p.railgun_txid.as_deref().or(p.txid.as_deref()).unwrap_or("-")
    );
    if let Some(err) = &p.err_message {
        tracing::warn!("POI proof error: {}", err);
    }
}
