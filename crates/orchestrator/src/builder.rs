//! Transaction builder for shield, transfer and unshield
//!
//! The three kinds share one pipeline:
//!
//! ```text
//! validate ─▶ unproven gas estimate ─▶ min gas price ─▶ proof* ─▶ populate
//!                                                     (* transfer/unshield)
//! ```
//!
//! A [`Proof`] is bound to the exact recipients, memo, wallet and minimum gas
//! price it was generated for. Populating with anything else fails with
//! `StaleProof` and the caller restarts from the estimate.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256, U256};
use railgun_core::{
    Chain, GasDetails, PopulatedTransaction, Recipient, RecipientError, TxidVersion, WalletId,
};
use tokio::sync::{broadcast, mpsc};

use crate::engine::{EngineEvent, EngineRequest, ProofId};
use crate::error::{EngineError, OrchestratorError, OrchestratorResult};
use crate::gas::GasPricingService;
use crate::lifecycle::EngineLifecycle;
use crate::scan::BalanceSyncCoordinator;
use crate::wallet::WalletHandle;

/// Message signed by the public wallet to derive the shield key
///
/// Fixed by the Railgun protocol; receivers derive the same key from it.
pub const SHIELD_SIGNATURE_MESSAGE: &str = "RAILGUN_SHIELD";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Shield,
    Transfer,
    Unshield,
}

impl OperationKind {
    pub fn requires_proof(&self) -> bool {
        !matches!(self, Self::Shield)
    }

    /// Shield and transfer pay into 0zk addresses, unshield pays out to 0x
    pub fn expects_private_recipients(&self) -> bool {
        !matches!(self, Self::Unshield)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Shield => "shield",
            Self::Transfer => "transfer",
            Self::Unshield => "unshield",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Private value binding a shield commitment to its depositor
#[derive(Clone, PartialEq, Eq)]
pub struct ShieldKey(B256);

impl ShieldKey {
    /// keccak256 of the public wallet's signature over [`SHIELD_SIGNATURE_MESSAGE`]
    pub fn from_signature(signature: &[u8]) -> Self {
        Self(keccak256(signature))
    }

    /// keccak256 of a smart-account address, for flows with no signer
    pub fn from_account(account: Address) -> Self {
        Self(keccak256(account.as_slice()))
    }

    pub fn to_hex(&self) -> String {
        format!("{:?}", self.0)
    }
}

impl fmt::Debug for ShieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShieldKey(<redacted>)")
    }
}

/// One shield, transfer or unshield request
#[derive(Clone, Debug)]
pub struct Operation {
    kind: OperationKind,
    txid_version: TxidVersion,
    chain: Chain,
    recipients: Vec<Recipient>,
    wallet: Option<Arc<WalletHandle>>,
    memo: Option<String>,
    shield_key: Option<ShieldKey>,
    from_address: Option<Address>,
}

impl Operation {
    pub fn shield(
        txid_version: TxidVersion,
        chain: Chain,
        recipients: Vec<Recipient>,
        shield_key: ShieldKey,
        from_address: Address,
    ) -> OrchestratorResult<Self> {
        let op = Self {
            kind: OperationKind::Shield,
            txid_version,
            chain,
            recipients,
            wallet: None,
            memo: None,
            shield_key: Some(shield_key),
            from_address: Some(from_address),
        };
        op.validate()?;
        Ok(op)
    }

    pub fn transfer(
        txid_version: TxidVersion,
        chain: Chain,
        wallet: Arc<WalletHandle>,
        recipients: Vec<Recipient>,
        memo: Option<String>,
    ) -> OrchestratorResult<Self> {
        let op = Self {
            kind: OperationKind::Transfer,
            txid_version,
            chain,
            recipients,
            wallet: Some(wallet),
            memo,
            shield_key: None,
            from_address: None,
        };
        op.validate()?;
        Ok(op)
    }

    pub fn unshield(
        txid_version: TxidVersion,
        chain: Chain,
        wallet: Arc<WalletHandle>,
        recipients: Vec<Recipient>,
    ) -> OrchestratorResult<Self> {
        let op = Self {
            kind: OperationKind::Unshield,
            txid_version,
            chain,
            recipients,
            wallet: Some(wallet),
            memo: None,
            shield_key: None,
            from_address: None,
        };
        op.validate()?;
        Ok(op)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn txid_version(&self) -> TxidVersion {
        self.txid_version
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn wallet_id(&self) -> Option<&WalletId> {
        self.wallet.as_ref().map(|w| w.id())
    }

    fn validate(&self) -> OrchestratorResult<()> {
        if self.recipients.is_empty() {
            return Err(RecipientError::Empty.into());
        }
        let expects_private = self.kind.expects_private_recipients();
        for recipient in &self.recipients {
            recipient.validate()?;
            let address = recipient.recipient_address();
            if address.is_private() != expects_private {
                return Err(RecipientError::WrongAddressKind {
                    expected: if expects_private { "private" } else { "public" },
                    got: address.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn engine_request(&self) -> EngineRequest<'_> {
        EngineRequest {
            kind: self.kind,
            txid_version: self.txid_version,
            chain: self.chain,
            recipients: &self.recipients,
            wallet: self.wallet.as_ref().map(|w| w.id()),
            encryption_key: self.wallet.as_ref().map(|w| w.encryption_key()),
            memo: self.memo.as_deref(),
            shield_key: self.shield_key.as_ref(),
            from_address: self.from_address,
            send_with_public_wallet: self.kind.requires_proof(),
        }
    }

    fn binding(&self, min_gas_price: U256) -> ProofBinding {
        ProofBinding {
            txid_version: self.txid_version,
            wallet: self.wallet_id().cloned(),
            recipients: self.recipients.clone(),
            memo: self.memo.clone(),
            min_gas_price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ProofBinding {
    txid_version: TxidVersion,
    wallet: Option<WalletId>,
    recipients: Vec<Recipient>,
    memo: Option<String>,
    min_gas_price: U256,
}

impl ProofBinding {
    /// First field that differs, for the stale-proof message
    fn mismatch(&self, other: &ProofBinding) -> Option<&'static str> {
        if self.txid_version != other.txid_version {
            Some("txid version")
        } else if self.wallet != other.wallet {
            Some("wallet")
        } else if self.recipients != other.recipients {
            Some("recipients")
        } else if self.memo != other.memo {
            Some("memo")
        } else if self.min_gas_price != other.min_gas_price {
            Some("minimum gas price")
        } else {
            None
        }
    }
}

/// Generated proof, usable for exactly one populate call
#[derive(Debug)]
pub struct Proof {
    binding: ProofBinding,
    progress: f64,
}

impl Proof {
    pub fn min_gas_price(&self) -> U256 {
        self.binding.min_gas_price
    }

    /// Last progress value reported before completion
    pub fn progress(&self) -> f64 {
        self.progress
    }
}

/// Output of the full pipeline
#[derive(Debug)]
pub struct PreparedTransaction {
    pub kind: OperationKind,
    pub gas: GasDetails,
    pub min_gas_price: U256,
    pub transaction: PopulatedTransaction,
}

pub struct TransactionBuilder {
    lifecycle: Arc<EngineLifecycle>,
    scans: Arc<BalanceSyncCoordinator>,
}

impl TransactionBuilder {
    pub fn new(lifecycle: Arc<EngineLifecycle>, scans: Arc<BalanceSyncCoordinator>) -> Self {
        Self { lifecycle, scans }
    }

    /// Unproven gas estimate
    ///
    /// Transfer and unshield need a completed balance scan first. Fails with
    /// `Estimation` when the engine cannot build the transaction, e.g. when
    /// the amount exceeds the spendable balance.
    pub async fn estimate_gas(&self, op: &Operation, gas: &GasDetails) -> OrchestratorResult<U256> {
        self.ensure_spendable(op)?;

        let engine = self.lifecycle.lease().await?;
        let estimate = engine
            .gas_estimate(&op.engine_request(), gas)
            .await
            .map_err(|e| OrchestratorError::Estimation(e.to_string()))?;

        if estimate.is_zero() {
            return Err(OrchestratorError::Estimation(
                "engine returned a zero gas estimate".into(),
            ));
        }

        tracing::info!("{} gas estimate: {}", op.kind, estimate);
        Ok(estimate)
    }

    /// Generate the proof for a transfer or unshield
    ///
    /// Progress values of this proof are forwarded to `progress` in increasing
    /// order; other proofs running on the engine are ignored. If the returned
    /// future is dropped the engine keeps proving; its progress is just no
    /// longer observed.
    pub async fn prove(
        &self,
        op: &Operation,
        min_gas_price: U256,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> OrchestratorResult<Proof> {
        if !op.kind.requires_proof() {
            return Err(OrchestratorError::ProofGeneration(format!(
                "{} does not take a proof",
                op.kind
            )));
        }
        self.ensure_spendable(op)?;

        let engine = self.lifecycle.lease().await?;
        let mut events = engine.events();
        let request = op.engine_request();
        let proof_id = ProofId::next();
        let call = engine.generate_proof(&request, min_gas_price, proof_id);
        tokio::pin!(call);

        tracing::info!("Generating {} proof {}...", op.kind, proof_id);
        let mut last = 0.0f64;
        let mut forward = |event: EngineEvent| {
            let EngineEvent::ProofProgress(update) = event else {
                return;
            };
            if update.proof_id == proof_id && update.progress > last {
                last = update.progress;
                tracing::debug!("{} proof {} progress: {:.2}", op.kind, proof_id, last);
                if let Some(tx) = &progress {
                    let _ = tx.send(last);
                }
            }
        };

        let mut events_open = true;
        let result = loop {
            tokio::select! {
                biased;
                res = &mut call => break res,
                event = events.recv(), if events_open => match event {
                    Ok(event) => forward(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Skipped {} engine events during proof", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
            }
        };
        // Progress published in the same poll that finished the call
        while let Ok(event) = events.try_recv() {
            forward(event);
        }
        drop(forward);

        result.map_err(|e| OrchestratorError::ProofGeneration(e.to_string()))?;
        tracing::info!("{} proof generated", op.kind);

        Ok(Proof {
            binding: op.binding(min_gas_price),
            progress: last,
        })
    }

    /// Populate the transaction
    ///
    /// Shield takes no proof. Transfer and unshield consume the proof, which
    /// must match `op` and the overall gas price of `gas`.
    pub async fn populate(
        &self,
        op: &Operation,
        proof: Option<Proof>,
        gas: &GasDetails,
    ) -> OrchestratorResult<PopulatedTransaction> {
        if gas.gas_estimate().is_none() {
            return Err(railgun_core::GasError::MissingEstimate.into());
        }

        let min_gas_price = match (op.kind.requires_proof(), proof) {
            (false, None) => None,
            (false, Some(_)) => {
                return Err(OrchestratorError::Population(format!(
                    "{} does not take a proof",
                    op.kind
                )))
            }
            (true, None) => {
                return Err(OrchestratorError::Population(format!(
                    "{} requires a proof",
                    op.kind
                )))
            }
            (true, Some(proof)) => {
                let current = op.binding(GasPricingService::overall_price(gas));
                if let Some(field) = proof.binding.mismatch(&current) {
                    return Err(OrchestratorError::StaleProof(format!(
                        "{} changed since the proof was generated",
                        field
                    )));
                }
                Some(proof.binding.min_gas_price)
            }
        };

        let engine = self.lifecycle.lease().await?;
        let populated = engine
            .populate(&op.engine_request(), min_gas_price, gas)
            .await
            .map_err(|e| match e {
                EngineError::StaleProof(msg) => OrchestratorError::StaleProof(msg),
                other => OrchestratorError::Population(other.to_string()),
            })?;

        tracing::info!("Populated {} transaction to {}", op.kind, populated.to());
        Ok(populated)
    }

    /// Run the whole pipeline for one operation
    pub async fn run(
        &self,
        op: &Operation,
        gas_pricing: &GasPricingService,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> OrchestratorResult<PreparedTransaction> {
        let mut gas = gas_pricing.current_fee_details(op.chain).await;
        let estimate = self.estimate_gas(op, &gas).await?;
        let min_gas_price = GasPricingService::price_from_estimate(&mut gas, estimate)?;
        tracing::info!("Overall min gas price: {}", min_gas_price);

        let proof = if op.kind.requires_proof() {
            Some(self.prove(op, min_gas_price, progress).await?)
        } else {
            None
        };

        let transaction = self.populate(op, proof, &gas).await?;
        Ok(PreparedTransaction {
            kind: op.kind,
            gas,
            min_gas_price,
            transaction,
        })
    }

    fn ensure_spendable(&self, op: &Operation) -> OrchestratorResult<()> {
        match (op.kind.requires_proof(), op.wallet_id()) {
            (true, Some(wallet)) => self.scans.ensure_scanned(wallet, op.chain),
            (true, None) => Err(OrchestratorError::Estimation(format!(
                "{} needs a spending wallet",
                op.kind
            ))),
            (false, _) => Ok(()),
        }
    }
}
