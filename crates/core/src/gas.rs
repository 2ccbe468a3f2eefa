//! Gas detail records consumed by the proof and transaction builders

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed floor used when the network fee oracle returns nothing (1 gwei)
pub const GAS_PRICE_FLOOR_WEI: u64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GasError {
    #[error("Gas estimate already set to {existing}, refusing to replace with {attempted}")]
    EstimateAlreadySet { existing: U256, attempted: U256 },

    #[error("Gas estimate missing")]
    MissingEstimate,

    #[error("Gas estimate must be greater than zero")]
    ZeroEstimate,
}

/// EVM transaction envelope type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EvmGasType {
    Type0,
    Type1,
    Type2,
}

impl From<EvmGasType> for u8 {
    fn from(value: EvmGasType) -> Self {
        match value {
            EvmGasType::Type0 => 0,
            EvmGasType::Type1 => 1,
            EvmGasType::Type2 => 2,
        }
    }
}

impl TryFrom<u8> for EvmGasType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Type0),
            1 => Ok(Self::Type1),
            2 => Ok(Self::Type2),
            other => Err(format!("unknown EVM gas type {}", other)),
        }
    }
}

/// Gas amount plus price fields
///
/// Once `gas_estimate` is filled, only the price fields may change until the
/// operation restarts from scratch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasDetails {
    #[serde(rename = "evmGasType")]
    pub gas_type: EvmGasType,
    gas_estimate: Option<U256>,
    /// Legacy gas price for type 0/1, max fee for type 2
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl GasDetails {
    /// Type-2 details without an estimate
    pub fn eip1559(max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Self {
        Self {
            gas_type: EvmGasType::Type2,
            gas_estimate: None,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }

    /// Type-2 details at the fixed price floor
    pub fn floor() -> Self {
        let floor = U256::from(GAS_PRICE_FLOOR_WEI);
        Self::eip1559(floor, floor)
    }

    pub fn gas_estimate(&self) -> Option<U256> {
        self.gas_estimate
    }

    /// Record the amount from an estimation step
    pub fn fill_estimate(&mut self, estimate: U256) -> Result<(), GasError> {
        if estimate.is_zero() {
            return Err(GasError::ZeroEstimate);
        }
        match self.gas_estimate {
            Some(existing) if existing != estimate => Err(GasError::EstimateAlreadySet {
                existing,
                attempted: estimate,
            }),
            _ => {
                self.gas_estimate = Some(estimate);
                Ok(())
            }
        }
    }

    /// Update price fields, leaving the amount untouched
    pub fn refine_prices(&mut self, max_fee_per_gas: U256, max_priority_fee_per_gas: U256) {
        self.max_fee_per_gas = max_fee_per_gas;
        self.max_priority_fee_per_gas = max_priority_fee_per_gas;
    }

    /// Overall minimum gas price the batch must pay
    ///
    /// For type 0/1 `max_fee_per_gas` holds the legacy gas price, so every
    /// envelope type reads the same field.
    pub fn overall_gas_price(&self) -> U256 {
        self.max_fee_per_gas
    }

    /// Estimate times overall price
    pub fn total_gas_cost(&self) -> Result<U256, GasError> {
        let estimate = self.gas_estimate.ok_or(GasError::MissingEstimate)?;
        Ok(estimate.saturating_mul(self.overall_gas_price()))
    }
}
