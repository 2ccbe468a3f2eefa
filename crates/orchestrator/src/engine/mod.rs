//! Boundary to the cryptographic engine
//!
//! The engine owns key management, merkletree scanning and proof generation.
//! The orchestrator only sequences calls into it through the [`Engine`] trait;
//! [`BridgeEngine`] drives an out-of-process engine over JSON-RPC.

pub mod bridge;
pub mod events;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use railgun_core::{
    Chain, GasDetails, PopulatedTransaction, Recipient, TxidVersion, WalletId, WalletInfo,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::builder::{OperationKind, ShieldKey};
use crate::error::EngineError;
use crate::wallet::{EncryptionKey, Mnemonic};

pub use bridge::BridgeEngine;
pub use events::{EngineEvent, PoiProofProgress, ProofId, ProofProgress};

/// Custom POI list registered at engine start
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiList {
    pub key: String,
    pub name: String,
    pub description: String,
}

/// Arguments of the engine start call
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStartParams {
    pub wallet_source: String,
    pub db_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub debug: bool,
    pub use_native_artifacts: bool,
    pub skip_merkletree_scans: bool,
    #[serde(rename = "poiNodeURLs")]
    pub poi_node_urls: Vec<String>,
    #[serde(rename = "customPOILists")]
    pub custom_poi_lists: Vec<PoiList>,
    pub verbose_scan_logging: bool,
}

/// One RPC endpoint in a fallback provider set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    #[serde(rename = "provider")]
    pub url: String,
    /// Lower is tried first
    pub priority: u32,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_logs_per_batch: Option<u32>,
}

impl ProviderDescriptor {
    /// Descriptor with the default ranking for a single endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 3,
            weight: 2,
            max_logs_per_batch: Some(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackProviderConfig {
    pub chain_id: u64,
    pub providers: Vec<ProviderDescriptor>,
}

/// Railgun fee schedule reported when a provider is loaded
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RailgunFees(pub BTreeMap<String, String>);

/// Spendable balance of one token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token_address: Address,
    pub amount: U256,
}

/// Everything an operation-specific engine call needs
///
/// Secrets are borrowed for the duration of the call only.
#[derive(Clone, Copy, Debug)]
pub struct EngineRequest<'a> {
    pub kind: OperationKind,
    pub txid_version: TxidVersion,
    pub chain: Chain,
    pub recipients: &'a [Recipient],
    pub wallet: Option<&'a WalletId>,
    pub encryption_key: Option<&'a EncryptionKey>,
    pub memo: Option<&'a str>,
    pub shield_key: Option<&'a ShieldKey>,
    /// Public wallet paying for a shield
    pub from_address: Option<Address>,
    pub send_with_public_wallet: bool,
}

/// Cryptographic engine interface
#[async_trait]
pub trait Engine: Send + Sync {
    async fn start(&self, params: &EngineStartParams) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    /// Register the fallback provider set for a chain
    async fn load_provider(
        &self,
        config: &FallbackProviderConfig,
        polling_interval: Duration,
    ) -> Result<RailgunFees, EngineError>;

    async fn create_or_load_wallet(
        &self,
        encryption_key: &EncryptionKey,
        mnemonic: &Mnemonic,
        derivation_index: Option<u32>,
    ) -> Result<WalletInfo, EngineError>;

    async fn shareable_viewing_key(&self, wallet: &WalletId) -> Result<String, EngineError>;

    /// Subscribe to scan, proof and POI progress
    fn events(&self) -> broadcast::Receiver<EngineEvent>;

    /// Kick off UTXO and TXID scans; returns before they finish
    async fn refresh_balances(&self, chain: Chain, wallets: &[WalletId])
        -> Result<(), EngineError>;

    async fn spendable_balances(
        &self,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<TokenBalance>, EngineError>;

    /// Unproven gas estimate
    async fn gas_estimate(
        &self,
        request: &EngineRequest<'_>,
        gas: &GasDetails,
    ) -> Result<U256, EngineError>;

    /// Generate and cache the proof for a transfer or unshield
    ///
    /// Progress events for this call carry `proof_id`.
    async fn generate_proof(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: U256,
        proof_id: ProofId,
    ) -> Result<(), EngineError>;

    /// Populate the transaction; `min_gas_price` is set for proved kinds
    async fn populate(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: Option<U256>,
        gas: &GasDetails,
    ) -> Result<PopulatedTransaction, EngineError>;

    async fn generate_pois(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<(), EngineError>;

    async fn pending_spent_pois(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError>;

    async fn spendable_received_txids(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError>;
}
