//! Railgun Orchestrator - lifecycle sequencing for shield, transfer and unshield
//!
//! Drives one private transaction at a time through the engine, the chain and
//! the POI aggregators, in a fixed order:
//!
//! ```text
//!  start engine ─▶ load provider ─▶ create/load wallet ─▶ scan balances
//!                                                            │
//!        ┌───────────────────────────────────────────────────┘
//!        ▼
//!  gas estimate ─▶ min gas price ─▶ proof* ─▶ populate ─▶ allowance** ─▶ broadcast
//!                                                                          │
//!                                          POI generate / summarize ◀──────┘
//!
//!  * transfer and unshield    ** shield only
//! ```
//!
//! # Key Components
//!
//! - [`lifecycle`] - engine start/stop with leases and an idempotent stop
//! - [`engine`] - engine trait, JSON-RPC bridge and progress events
//! - [`chain`] - chain RPC trait, alloy client and fallback set
//! - [`builder`] - the single shield/transfer/unshield pipeline
//! - [`scan`] - balance scan slots and awaiting
//! - [`poi`] - per-version POI generation and summaries
//! - [`shutdown`] - interrupt-aware runner that stops the engine once

pub mod allowance;
pub mod broadcast;
pub mod builder;
pub mod chain;
pub mod engine;
pub mod error;
pub mod gas;
pub mod lifecycle;
pub mod poi;
pub mod provider;
pub mod scan;
pub mod shutdown;
pub mod wallet;

pub use allowance::{shield_data, AllowanceDecision, AllowanceGuard, ShieldData};
pub use broadcast::{Broadcaster, DEFAULT_CONFIRMATION_TIMEOUT};
pub use builder::{
    Operation, OperationKind, PreparedTransaction, Proof, ShieldKey, TransactionBuilder,
    SHIELD_SIGNATURE_MESSAGE,
};
pub use chain::{
    resolve_token_amount, AlloyChainClient, ChainClient, Confirmation, FallbackChainClient,
    FeeData,
};
pub use engine::{
    BridgeEngine, Engine, EngineEvent, EngineRequest, EngineStartParams, FallbackProviderConfig,
    PoiList, PoiProofProgress, ProofId, ProofProgress, ProviderDescriptor, RailgunFees,
    TokenBalance,
};
pub use error::{ChainError, EngineError, OrchestratorError, OrchestratorResult};
pub use gas::GasPricingService;
pub use lifecycle::{EngineLease, EngineLifecycle, LifecycleConfig, StopOutcome};
pub use poi::{PoiOutcome, PoiReport, PoiReporter};
pub use provider::{probe, ConnectedNetwork, ProviderConnector, DEFAULT_POLLING_INTERVAL};
pub use scan::{BalanceSyncCoordinator, DEFAULT_SCAN_TIMEOUT};
pub use shutdown::{run_until_interrupted, RunOutcome};
pub use wallet::{EncryptionKey, Mnemonic, ReceivingAddress, WalletHandle, WalletSession};
