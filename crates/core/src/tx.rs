use alloy_primitives::{keccak256, Address, Bytes, U256};
use serde::{Deserialize, Serialize};

pub use alloy_primitives::TxHash;

/// Transaction produced by the population step
///
/// Immutable once produced. The broadcaster takes it by value so each
/// populated transaction is submitted at most once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedTransaction {
    to: Address,
    #[serde(default)]
    data: Bytes,
    #[serde(default)]
    value: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_priority_fee_per_gas: Option<U256>,
}

impl PopulatedTransaction {
    pub fn new(to: Address, data: Bytes, value: U256) -> Self {
        Self {
            to,
            data,
            value,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    /// Attach inferred gas fields
    pub fn with_gas(
        mut self,
        gas_limit: Option<u64>,
        max_fee_per_gas: Option<U256>,
        max_priority_fee_per_gas: Option<U256>,
    ) -> Self {
        self.gas_limit = gas_limit;
        self.max_fee_per_gas = max_fee_per_gas;
        self.max_priority_fee_per_gas = max_priority_fee_per_gas;
        self
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn gas_limit(&self) -> Option<u64> {
        self.gas_limit
    }

    pub fn max_fee_per_gas(&self) -> Option<U256> {
        self.max_fee_per_gas
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<U256> {
        self.max_priority_fee_per_gas
    }

    /// Digest of the call (to, value, data) for logs
    pub fn call_digest(&self) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(20 + 32 + self.data.len());
        preimage.extend_from_slice(self.to.as_slice());
        preimage.extend_from_slice(&self.value.to_be_bytes::<32>());
        preimage.extend_from_slice(&self.data);
        keccak256(preimage).0
    }
}
