//! Railgun deployments
//!
//! The smart wallet proxy is the contract shield and transact calls go to,
//! and therefore the spender a shield allowance must cover.

use alloy_primitives::{address, Address};

/// Railgun contract addresses per chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RailgunAddresses {
    /// Relay adapt contract
    pub relay: Address,
    /// Smart wallet proxy (shield/transact entry point)
    pub smart_wallet: Address,
}

impl RailgunAddresses {
    /// Ethereum mainnet addresses
    pub const fn ethereum() -> Self {
        Self {
            relay: address!("fa7093cdd9ee6932b4eb2c9e1cde7ce00b1fa4b9"),
            smart_wallet: address!("c0BEF2D373A1EfaDE8B952f33c1370E486f209Cc"),
        }
    }

    /// Polygon mainnet addresses
    pub const fn polygon() -> Self {
        Self {
            relay: address!("fa7093cdd9ee6932b4eb2c9e1cde7ce00b1fa4b9"),
            smart_wallet: address!("19b620929f97b7b990801496c3b361ca5def8c71"),
        }
    }

    /// Sepolia testnet addresses
    pub const fn sepolia() -> Self {
        Self {
            relay: address!("464a0c9e62534b3b160c35638DD7d5cf761f429e"),
            smart_wallet: address!("942D5026b421cf2705363A525897576cFAdA5964"),
        }
    }

    /// Get addresses for a chain ID
    pub fn for_chain(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 => Some(Self::ethereum()),
            137 => Some(Self::polygon()),
            11155111 => Some(Self::sepolia()),
            _ => None,
        }
    }

    /// Whether `to` is a Railgun entry point on this chain
    pub fn is_railgun_contract(&self, to: Address) -> bool {
        to == self.smart_wallet || to == self.relay
    }
}
