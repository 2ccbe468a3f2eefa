//! Wallet session
//!
//! Creates or loads engine wallets and keeps one handle per wallet id. The
//! encryption key and mnemonic are only ever held inside [`WalletHandle`] and
//! the engine call that creates the wallet; nothing else in the crate stores
//! them.

use std::fmt;
use std::sync::Arc;

use alloy::signers::local::coins_bip39::{English, Mnemonic as Bip39Mnemonic};
use dashmap::DashMap;
use railgun_core::{Chain, WalletId, WalletInfo};
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::lifecycle::EngineLifecycle;

/// 32-byte wallet encryption key, hex encoded
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<String>);

impl EncryptionKey {
    pub fn parse(input: &str) -> OrchestratorResult<Self> {
        let hex = input.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OrchestratorError::InvalidCredentials(
                "encryption key must be 32 bytes of hex".into(),
            ));
        }
        Ok(Self(Zeroizing::new(hex.to_ascii_lowercase())))
    }

    /// Raw hex without prefix, for the engine call that needs it
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// BIP-39 English seed phrase
#[derive(Clone)]
pub struct Mnemonic(Zeroizing<String>);

impl Mnemonic {
    pub fn parse(phrase: &str) -> OrchestratorResult<Self> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        Bip39Mnemonic::<English>::new_from_phrase(&normalized)
            .map_err(|e| OrchestratorError::InvalidCredentials(format!("mnemonic: {}", e)))?;
        Ok(Self(Zeroizing::new(normalized)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mnemonic(<redacted>)")
    }
}

/// Loaded wallet
pub struct WalletHandle {
    info: WalletInfo,
    derivation_index: Option<u32>,
    encryption_key: EncryptionKey,
    viewing_key: OnceCell<String>,
}

impl WalletHandle {
    pub fn id(&self) -> &WalletId {
        &self.info.id
    }

    /// 0zk receiving address
    pub fn railgun_address(&self) -> &str {
        &self.info.railgun_address
    }

    pub fn derivation_index(&self) -> Option<u32> {
        self.derivation_index
    }

    pub(crate) fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }
}

impl fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletHandle")
            .field("id", &self.info.id)
            .field("railgun_address", &self.info.railgun_address)
            .field("derivation_index", &self.derivation_index)
            .finish_non_exhaustive()
    }
}

/// Receiving address of a wallet on one chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivingAddress {
    pub chain: Chain,
    pub address: String,
}

impl fmt::Display for ReceivingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

pub struct WalletSession {
    lifecycle: Arc<EngineLifecycle>,
    handles: DashMap<WalletId, Arc<WalletHandle>>,
}

impl WalletSession {
    pub fn new(lifecycle: Arc<EngineLifecycle>) -> Self {
        Self {
            lifecycle,
            handles: DashMap::new(),
        }
    }

    /// Create the wallet, or load it if the engine already knows it
    ///
    /// Identical inputs give the same wallet id, so a repeated call returns
    /// the cached handle.
    pub async fn create_or_load(
        &self,
        encryption_key: EncryptionKey,
        mnemonic: Mnemonic,
        derivation_index: Option<u32>,
    ) -> OrchestratorResult<Arc<WalletHandle>> {
        let engine = self.lifecycle.lease().await?;
        let info = engine
            .create_or_load_wallet(&encryption_key, &mnemonic, derivation_index)
            .await
            .map_err(OrchestratorError::Engine)?;
        drop(mnemonic);

        if let Some(existing) = self.handles.get(&info.id) {
            tracing::debug!("Wallet {} already loaded", info.id);
            return Ok(existing.clone());
        }

        tracing::info!(
            "Loaded wallet {} ({})",
            info.id,
            info.railgun_address
        );

        let handle = Arc::new(WalletHandle {
            info,
            derivation_index,
            encryption_key,
            viewing_key: OnceCell::new(),
        });
        let handle = self
            .handles
            .entry(handle.id().clone())
            .or_insert(handle)
            .clone();
        Ok(handle)
    }

    /// Receiving address on `chain`; no engine call
    pub fn derive_address(&self, handle: &WalletHandle, chain: Chain) -> ReceivingAddress {
        ReceivingAddress {
            chain,
            address: handle.railgun_address().to_string(),
        }
    }

    /// Read-only viewing key, safe to hand to auditors
    pub async fn derive_shareable_viewing_key(
        &self,
        handle: &WalletHandle,
    ) -> OrchestratorResult<String> {
        let key = handle
            .viewing_key
            .get_or_try_init(|| async {
                let engine = self.lifecycle.lease().await?;
                engine
                    .shareable_viewing_key(handle.id())
                    .await
                    .map_err(OrchestratorError::Engine)
            })
            .await?;
        Ok(key.clone())
    }
}
