//! Shield, transfer and unshield through the builder, allowance guard and broadcaster

mod common;

use alloy_primitives::U256;
use railgun_core::{parse_token_amount, GasDetails, Recipient, RecipientError, TxidVersion};
use railgun_orchestrator::{
    resolve_token_amount, shield_data, AllowanceDecision, AllowanceGuard, Broadcaster,
    ChainClient, FeeData, GasPricingService, Operation, OperationKind, OrchestratorError,
    ShieldKey, TransactionBuilder, SHIELD_SIGNATURE_MESSAGE,
};
use tokio::sync::mpsc;

use common::*;

fn builder(h: &Harness) -> TransactionBuilder {
    TransactionBuilder::new(h.lifecycle.clone(), h.scans.clone())
}

async fn priced(h: &Harness, op: &Operation) -> (GasDetails, U256) {
    let mut gas = GasPricingService::new(h.chain.clone())
        .current_fee_details(chain())
        .await;
    let estimate = builder(h).estimate_gas(op, &gas).await.unwrap();
    let price = GasPricingService::price_from_estimate(&mut gas, estimate).unwrap();
    (gas, price)
}

#[tokio::test]
async fn test_shield_one_unit_with_six_decimals() {
    let h = started().await;
    let amount = resolve_token_amount(h.chain.as_ref(), token(), "1.0")
        .await
        .unwrap();
    assert_eq!(amount, U256::from(1_000_000u64));

    let signature = h
        .chain
        .sign_message(SHIELD_SIGNATURE_MESSAGE.as_bytes())
        .await
        .unwrap();
    let op = Operation::shield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        vec![Recipient::parse(token(), amount, ZK_ADDR).unwrap()],
        ShieldKey::from_signature(&signature),
        h.chain.signer_address(),
    )
    .unwrap();

    let gas_pricing = GasPricingService::new(h.chain.clone());
    let prepared = builder(&h).run(&op, &gas_pricing, None).await.unwrap();
    assert_eq!(prepared.kind, OperationKind::Shield);
    assert!(!h.engine.called("generate_proof"));

    let guard = AllowanceGuard::new(h.chain.clone());
    let owner = h.chain.signer_address();

    h.chain.set_allowance(U256::from(999_999u64));
    let decision = guard
        .ensure_allowance_for(&prepared.transaction, token(), owner, amount)
        .await
        .unwrap();
    let approval = decision.approval().cloned().expect("approval required");
    assert_eq!(approval.to(), token());

    h.chain.set_allowance(U256::from(1_000_000u64));
    let decision = guard
        .ensure_allowance_for(&prepared.transaction, token(), owner, amount)
        .await
        .unwrap();
    assert_eq!(
        decision,
        AllowanceDecision::Sufficient {
            current: U256::from(1_000_000u64)
        }
    );

    // Approval goes out before the shield
    let broadcaster = Broadcaster::new(h.chain.clone());
    broadcaster.submit_and_confirm(approval).await.unwrap();
    broadcaster
        .submit_and_confirm(prepared.transaction.clone())
        .await
        .unwrap();
    let sent = h.chain.submitted();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to(), token());
    assert_eq!(sent[1], prepared.transaction);
}

#[tokio::test]
async fn test_shield_data_export() {
    let h = started().await;
    let account = public_recipient();
    let op = Operation::shield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        vec![private_recipient(1_000_000)],
        ShieldKey::from_account(account),
        account,
    )
    .unwrap();

    let gas_pricing = GasPricingService::new(h.chain.clone());
    let prepared = builder(&h).run(&op, &gas_pricing, None).await.unwrap();
    let decision = AllowanceGuard::new(h.chain.clone())
        .ensure_allowance_for(&prepared.transaction, token(), account, U256::from(1_000_000u64))
        .await
        .unwrap();

    let data = shield_data(&prepared.transaction, &decision);
    assert!(data.approve_payload.is_some());
    assert!(h.chain.submitted().is_empty());
}

#[tokio::test]
async fn test_zero_amount_never_reaches_engine() {
    let h = started().await;
    assert!(parse_token_amount("0", 6).is_err());
    assert!(parse_token_amount("0.000000", 6).is_err());
    assert_eq!(
        Recipient::parse(token(), U256::ZERO, ZK_ADDR).unwrap_err(),
        RecipientError::ZeroAmount
    );

    let wallet = h.wallet().await;
    let err = Operation::transfer(TxidVersion::V2PoseidonMerkle, chain(), wallet, Vec::new(), None)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRecipient(RecipientError::Empty)));
    assert!(!h.engine.called("gas_estimate"));
}

#[tokio::test]
async fn test_recipient_kind_checked_per_operation() {
    let h = started().await;
    let wallet = h.wallet().await;

    let err = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet.clone(),
        vec![private_recipient(1)],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidRecipient(RecipientError::WrongAddressKind { .. })
    ));

    assert!(Operation::transfer(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        public_recipients(1),
        None
    )
    .is_err());
}

#[tokio::test]
async fn test_spend_requires_completed_scan() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.engine.set_balance(token(), U256::from(10u64));
    let op = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet.clone(),
        public_recipients(5),
    )
    .unwrap();

    let err = builder(&h)
        .estimate_gas(&op, &GasDetails::floor())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotScanned { .. }));
    assert!(!h.engine.called("gas_estimate"));

    h.complete_scan(wallet.id());
    assert!(builder(&h).estimate_gas(&op, &GasDetails::floor()).await.is_ok());
}

#[tokio::test]
async fn test_unshield_over_balance_fails_at_estimate() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(500u64));

    let op = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        public_recipients(501),
    )
    .unwrap();

    let gas_pricing = GasPricingService::new(h.chain.clone());
    let err = builder(&h).run(&op, &gas_pricing, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Estimation(_)));
    assert!(h.engine.called("gas_estimate:unshield"));
    assert!(!h.engine.called("generate_proof"));
    assert!(!h.engine.called("populate"));
}

#[tokio::test]
async fn test_transfer_pipeline_forwards_proof_progress() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(1_000u64));
    h.chain.set_fees(Some(FeeData {
        max_fee_per_gas: Some(U256::from(30_000_000_000u64)),
        max_priority_fee_per_gas: Some(U256::from(2_000_000_000u64)),
    }));

    let op = Operation::transfer(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        vec![private_recipient(400)],
        Some("thanks".into()),
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let gas_pricing = GasPricingService::new(h.chain.clone());
    let prepared = builder(&h).run(&op, &gas_pricing, Some(tx)).await.unwrap();

    assert_eq!(prepared.min_gas_price, U256::from(30_000_000_000u64));
    assert_eq!(prepared.gas.gas_estimate(), Some(U256::from(GAS_ESTIMATE)));
    assert_eq!(prepared.transaction.gas_limit(), Some(GAS_ESTIMATE));

    let mut progress = Vec::new();
    while let Ok(value) = rx.try_recv() {
        progress.push(value);
    }
    assert_eq!(progress, vec![0.1, 0.5, 1.0]);
}

#[tokio::test]
async fn test_concurrent_proofs_keep_their_own_progress() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(1_000u64));

    let transfer = Operation::transfer(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet.clone(),
        vec![private_recipient(400)],
        None,
    )
    .unwrap();
    let unshield = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        public_recipients(300),
    )
    .unwrap();

    let price = U256::from(30_000_000_000u64);
    let (transfer_tx, mut transfer_rx) = mpsc::unbounded_channel();
    let (unshield_tx, mut unshield_rx) = mpsc::unbounded_channel();
    let builder = builder(&h);
    let (a, b) = tokio::join!(
        builder.prove(&transfer, price, Some(transfer_tx)),
        builder.prove(&unshield, price, Some(unshield_tx)),
    );
    a.unwrap();
    b.unwrap();

    let drain = |rx: &mut mpsc::UnboundedReceiver<f64>| {
        let mut values = Vec::new();
        while let Ok(value) = rx.try_recv() {
            values.push(value);
        }
        values
    };
    assert_eq!(drain(&mut transfer_rx), vec![0.1, 0.5, 1.0]);
    assert_eq!(drain(&mut unshield_rx), vec![0.2, 0.6, 0.9, 1.0]);
}

#[tokio::test]
async fn test_fee_oracle_failure_uses_floor() {
    let h = started().await;
    h.chain.set_fees(None);
    let gas = GasPricingService::new(h.chain.clone())
        .current_fee_details(chain())
        .await;
    assert_eq!(gas, GasDetails::floor());

    h.chain.set_fees(Some(FeeData {
        max_fee_per_gas: Some(U256::from(5_000_000_000u64)),
        max_priority_fee_per_gas: None,
    }));
    let gas = GasPricingService::new(h.chain.clone())
        .current_fee_details(chain())
        .await;
    assert_eq!(gas.max_fee_per_gas, U256::from(5_000_000_000u64));
    assert_eq!(gas.max_priority_fee_per_gas, U256::from(1_000_000_000u64));

    // Legacy price below the floor caps the priority fee
    h.chain.set_fees(Some(FeeData {
        max_fee_per_gas: Some(U256::from(100_000_000u64)),
        max_priority_fee_per_gas: None,
    }));
    let gas = GasPricingService::new(h.chain.clone())
        .current_fee_details(chain())
        .await;
    assert_eq!(gas.max_fee_per_gas, U256::from(100_000_000u64));
    assert_eq!(gas.max_priority_fee_per_gas, U256::from(100_000_000u64));
}

#[tokio::test]
async fn test_proof_rejected_when_recipients_change() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(1_000u64));

    let proved = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet.clone(),
        public_recipients(100),
    )
    .unwrap();
    let changed = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        public_recipients(101),
    )
    .unwrap();

    let (gas, price) = priced(&h, &proved).await;
    let proof = builder(&h).prove(&proved, price, None).await.unwrap();

    let err = builder(&h)
        .populate(&changed, Some(proof), &gas)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StaleProof(_)));
    assert!(err.is_recoverable());
    assert!(!h.engine.called("populate"));
}

#[tokio::test]
async fn test_proof_rejected_when_gas_price_changes() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(1_000u64));

    let op = Operation::transfer(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        vec![private_recipient(100)],
        None,
    )
    .unwrap();

    let (gas, price) = priced(&h, &op).await;
    let proof = builder(&h).prove(&op, price, None).await.unwrap();

    let mut repriced = gas.clone();
    repriced.refine_prices(price + U256::from(1u64), repriced.max_priority_fee_per_gas);
    let err = builder(&h)
        .populate(&op, Some(proof), &repriced)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StaleProof(_)));

    // Same inputs with a fresh proof go through
    let proof = builder(&h).prove(&op, price, None).await.unwrap();
    let populated = builder(&h).populate(&op, Some(proof), &gas).await.unwrap();
    assert_eq!(populated.max_fee_per_gas(), Some(price));
}

#[tokio::test]
async fn test_engine_side_stale_proof_is_reported() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());
    h.engine.set_balance(token(), U256::from(1_000u64));

    let first = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet.clone(),
        public_recipients(100),
    )
    .unwrap();
    let second = Operation::unshield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        public_recipients(200),
    )
    .unwrap();

    let (gas, price) = priced(&h, &first).await;
    let first_proof = builder(&h).prove(&first, price, None).await.unwrap();
    // The engine keeps only the latest proof
    let _second_proof = builder(&h).prove(&second, price, None).await.unwrap();

    let err = builder(&h)
        .populate(&first, Some(first_proof), &gas)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StaleProof(_)));
}

#[tokio::test]
async fn test_populate_requires_estimate_and_proof() {
    let h = started().await;
    let wallet = h.wallet().await;
    h.complete_scan(wallet.id());

    let op = Operation::transfer(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        wallet,
        vec![private_recipient(1)],
        None,
    )
    .unwrap();

    let err = builder(&h)
        .populate(&op, None, &GasDetails::floor())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Gas(_)));

    let mut gas = GasDetails::floor();
    gas.fill_estimate(U256::from(GAS_ESTIMATE)).unwrap();
    let err = builder(&h).populate(&op, None, &gas).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Population(_)));
}

#[tokio::test]
async fn test_operations_fail_after_stop() {
    let h = started().await;
    let account = public_recipient();
    let op = Operation::shield(
        TxidVersion::V2PoseidonMerkle,
        chain(),
        vec![private_recipient(1)],
        ShieldKey::from_account(account),
        account,
    )
    .unwrap();

    h.lifecycle.stop().await.unwrap();
    let err = builder(&h)
        .estimate_gas(&op, &GasDetails::floor())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::EngineNotRunning));
}
