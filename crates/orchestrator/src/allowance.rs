//! ERC-20 allowance check for the shield path
//!
//! The spender is the destination of the populated shield transaction, so the
//! guard can only run between population and broadcast.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use railgun_contracts::{CallPayload, RailgunAddresses, IERC20};
use railgun_core::PopulatedTransaction;
use serde::Serialize;

use crate::chain::ChainClient;
use crate::error::{OrchestratorError, OrchestratorResult};

/// What has to happen before the shield can be broadcast
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowanceDecision {
    Sufficient { current: U256 },
    /// Unsigned `approve(spender, amount)` to send first
    ApprovalRequired(PopulatedTransaction),
}

impl AllowanceDecision {
    pub fn approval(&self) -> Option<&PopulatedTransaction> {
        match self {
            Self::ApprovalRequired(tx) => Some(tx),
            Self::Sufficient { .. } => None,
        }
    }
}

/// Shield calls encoded for a relaying smart account
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve_payload: Option<Bytes>,
    pub shield_payload: Bytes,
}

pub struct AllowanceGuard {
    chain: Arc<dyn ChainClient>,
}

impl AllowanceGuard {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    pub async fn ensure_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> OrchestratorResult<AllowanceDecision> {
        let current = self
            .chain
            .erc20_allowance(token, owner, spender)
            .await
            .map_err(|e| OrchestratorError::Allowance(e.to_string()))?;

        if current >= required {
            tracing::info!("Allowance {} covers {}, no approval needed", current, required);
            return Ok(AllowanceDecision::Sufficient { current });
        }

        tracing::info!(
            "Allowance {} below {}, approval for {} required",
            current,
            required,
            spender
        );
        Ok(AllowanceDecision::ApprovalRequired(approval_transaction(
            token, spender, required,
        )))
    }

    /// Check the allowance against the destination of a populated shield
    pub async fn ensure_allowance_for(
        &self,
        shield: &PopulatedTransaction,
        token: Address,
        owner: Address,
        required: U256,
    ) -> OrchestratorResult<AllowanceDecision> {
        let spender = shield.to();
        if let Some(addresses) = RailgunAddresses::for_chain(self.chain.chain_id()) {
            if !addresses.is_railgun_contract(spender) {
                tracing::warn!("Shield transaction targets {}, not a known Railgun contract", spender);
            }
        }
        self.ensure_allowance(token, owner, spender, required).await
    }
}

/// `approve(spender, amount)` on `token`
pub fn approval_transaction(token: Address, spender: Address, amount: U256) -> PopulatedTransaction {
    let data = IERC20::approveCall { spender, amount }.abi_encode();
    PopulatedTransaction::new(token, data.into(), U256::ZERO)
}

/// Encode the shield and optional approval as `(to, 0, data)` payloads
pub fn shield_data(shield: &PopulatedTransaction, decision: &AllowanceDecision) -> ShieldData {
    let encode = |tx: &PopulatedTransaction| CallPayload::new(tx.to(), U256::ZERO, tx.data().clone()).encode();
    ShieldData {
        approve_payload: decision.approval().map(encode),
        shield_payload: encode(shield),
    }
}
