//! Error types for the orchestrator

use std::time::Duration;

use railgun_core::{Chain, GasError, RecipientError, TxHash, TxidVersion, UnitsError, WalletId};
use thiserror::Error;

/// Failures reported by the cryptographic engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Engine call {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Proof no longer matches the transaction: {0}")]
    StaleProof(String),

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Event stream error: {0}")]
    Events(String),
}

/// Failures reported by the chain RPC layer
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Contract call failed: {0}")]
    Contract(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Transaction {0} reverted")]
    Reverted(TxHash),

    #[error("Timed out after {timeout:?} waiting for {tx_hash}")]
    Timeout { tx_hash: TxHash, timeout: Duration },

    #[error("No chain clients configured")]
    NoClients,
}

/// Top-level orchestrator error
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Engine not running")]
    EngineNotRunning,

    #[error("Engine lifecycle error: {0}")]
    Lifecycle(EngineError),

    #[error("Provider configuration error: {0}")]
    ProviderConfig(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Scan for wallet {wallet} on chain {chain} timed out after {timeout:?}")]
    ScanTimeout {
        wallet: WalletId,
        chain: Chain,
        timeout: Duration,
    },

    #[error("Scan for wallet {wallet} on chain {chain} failed")]
    ScanFailed { wallet: WalletId, chain: Chain },

    #[error("Wallet {wallet} has not completed a scan on chain {chain}")]
    NotScanned { wallet: WalletId, chain: Chain },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(#[from] RecipientError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] UnitsError),

    #[error("Gas details error: {0}")]
    Gas(#[from] GasError),

    #[error("Gas estimation failed: {0}")]
    Estimation(String),

    #[error("Proof generation failed: {0}")]
    ProofGeneration(String),

    #[error("Stale proof: {0}")]
    StaleProof(String),

    #[error("Transaction population failed: {0}")]
    Population(String),

    #[error("Allowance check failed: {0}")]
    Allowance(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Transaction {tx_hash} not confirmed after {timeout:?}")]
    ConfirmationTimeout { tx_hash: TxHash, timeout: Duration },

    #[error("POI service error for {version}: {message}")]
    PoiService {
        version: TxidVersion,
        message: String,
    },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl OrchestratorError {
    /// Whether the caller may retry the failed step without restarting the process
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning
                | Self::ScanTimeout { .. }
                | Self::StaleProof(_)
                | Self::PoiService { .. }
        )
    }

    /// Whether the error concerns the engine resource itself
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning | Self::EngineNotRunning | Self::Lifecycle(_)
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
