//! Contract-level helpers for the Railgun flows
//!
//! - ERC-20 call bindings used by the allowance guard
//! - Railgun proxy addresses per chain
//! - `(address,uint256,bytes)` payloads for smart-account relaying

pub mod addresses;
pub mod bindings;
pub mod payload;

pub use addresses::RailgunAddresses;
pub use bindings::IERC20;
pub use payload::{decode_call_payload, encode_call_payload, CallPayload, PayloadError};
