//! Gas pricing
//!
//! Fee data comes from the chain client. A failed or empty fee query never
//! blocks estimation: missing fields fall back to the 1 gwei floor, and the
//! priority fee never exceeds the max fee.

use std::sync::Arc;

use alloy_primitives::U256;
use railgun_core::{Chain, GasDetails, GAS_PRICE_FLOOR_WEI};

use crate::chain::{ChainClient, FeeData};
use crate::error::OrchestratorResult;

pub struct GasPricingService {
    chain: Arc<dyn ChainClient>,
}

impl GasPricingService {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Type-2 gas details priced from live fee data
    pub async fn current_fee_details(&self, chain: Chain) -> GasDetails {
        let fees = match self.chain.fee_data().await {
            Ok(fees) => fees,
            Err(e) => {
                tracing::warn!("Fee data unavailable on {}: {}. Using floor price", chain, e);
                FeeData::default()
            }
        };

        let floor = U256::from(GAS_PRICE_FLOOR_WEI);
        let max_fee = fees.max_fee_per_gas.unwrap_or(floor);
        // maxPriorityFee above maxFee is rejected by nodes
        let priority = fees.max_priority_fee_per_gas.unwrap_or(floor).min(max_fee);
        if fees.max_fee_per_gas.is_none() || fees.max_priority_fee_per_gas.is_none() {
            tracing::debug!("Fee oracle returned partial data on {}, floor applied", chain);
        }

        tracing::info!("Gas price: maxFee={}, maxPriorityFee={}", max_fee, priority);
        GasDetails::eip1559(max_fee, priority)
    }

    /// Merge the estimate into `gas` and return the batch's overall minimum gas price
    pub fn price_from_estimate(gas: &mut GasDetails, estimate: U256) -> OrchestratorResult<U256> {
        gas.fill_estimate(estimate)?;
        Ok(Self::overall_price(gas))
    }

    pub fn overall_price(gas: &GasDetails) -> U256 {
        gas.overall_gas_price()
    }
}
