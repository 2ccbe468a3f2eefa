//! Railgun Core - data model shared by the orchestrator and its operator surface
//!
//! Everything in this crate is plain data plus the invariants that travel with
//! it. Nothing here talks to the engine, the chain or the POI aggregators.

pub mod chain;
pub mod gas;
pub mod poi;
pub mod recipient;
pub mod scan;
pub mod tx;
pub mod units;
pub mod wallet;

pub use chain::{Chain, ChainType, TxidVersion};
pub use gas::{EvmGasType, GasDetails, GasError, GAS_PRICE_FLOOR_WEI};
pub use poi::PoiStatus;
pub use recipient::{Recipient, RecipientAddress, RecipientError};
pub use scan::{ScanKind, ScanState, ScanStatus, ScanUpdate};
pub use tx::{PopulatedTransaction, TxHash};
pub use units::{parse_token_amount, UnitsError};
pub use wallet::{WalletId, WalletInfo};

/// Network id of Ethereum Sepolia, the default operator network
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
