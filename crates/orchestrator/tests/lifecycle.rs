//! Engine lifecycle, wallet session and interrupt handling

mod common;

use std::sync::Arc;
use std::time::Duration;

use railgun_orchestrator::{
    run_until_interrupted, EncryptionKey, EngineLifecycle, Mnemonic, OrchestratorError,
    RunOutcome, StopOutcome, WalletSession,
};

use common::*;

#[tokio::test]
async fn test_start_prepares_storage() {
    let h = started().await;
    assert!(h.dir.path().join("artifacts").is_dir());
    assert!(h.dir.path().join("db").is_dir());
    assert!(h.lifecycle.is_running().await);
    assert_eq!(h.engine.starts(), 1);
}

#[tokio::test]
async fn test_second_start_is_already_running() {
    let h = started().await;
    let err = h.lifecycle.start(&h.config()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyRunning));
    assert!(err.is_recoverable());
    assert_eq!(h.engine.starts(), 1);
}

#[tokio::test]
async fn test_double_stop_then_not_running() {
    let h = started().await;

    let first = h.lifecycle.stop().await.unwrap();
    assert_eq!(first, StopOutcome::Stopped { drained: true });
    let second = h.lifecycle.stop().await.unwrap();
    assert_eq!(second, StopOutcome::AlreadyStopped);
    assert_eq!(h.engine.stops(), 1);

    let err = h
        .wallets
        .create_or_load(
            EncryptionKey::parse(&"01".repeat(32)).unwrap(),
            Mnemonic::parse(TEST_MNEMONIC).unwrap(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::EngineNotRunning));
    assert_eq!(err.to_string(), "Engine not running");
}

#[tokio::test]
async fn test_failed_stop_can_be_retried() {
    let h = started().await;
    h.engine.fail_stops(1);

    let err = h.lifecycle.stop().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Lifecycle(_)));
    assert!(h.lifecycle.is_running().await);

    let retry = h.lifecycle.stop().await.unwrap();
    assert_eq!(retry, StopOutcome::Stopped { drained: true });
    assert!(!h.lifecycle.is_running().await);
    assert_eq!(h.lifecycle.stop().await.unwrap(), StopOutcome::AlreadyStopped);
    assert_eq!(h.engine.stops(), 2);
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let engine = FakeEngine::new();
    let lifecycle = EngineLifecycle::new(engine.clone());
    assert_eq!(lifecycle.stop().await.unwrap(), StopOutcome::NotStarted);
    assert_eq!(engine.stops(), 0);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = started().await;
    h.lifecycle.stop().await.unwrap();
    h.lifecycle.start(&h.config()).await.unwrap();
    assert_eq!(h.engine.starts(), 2);
    assert!(h.lifecycle.lease().await.is_ok());
}

#[tokio::test]
async fn test_stop_waits_for_leases_up_to_timeout() {
    let h = started().await;
    let lease = h.lifecycle.lease().await.unwrap();

    let outcome = h.lifecycle.stop().await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped { drained: false });
    drop(lease);
    assert!(matches!(
        h.lifecycle.lease().await,
        Err(OrchestratorError::EngineNotRunning)
    ));
}

#[tokio::test]
async fn test_invalid_wallet_source_fails_before_start() {
    let engine = FakeEngine::new();
    let lifecycle = EngineLifecycle::new(engine.clone());
    let dir = tempfile::tempdir().unwrap();
    let mut config = lifecycle_config(&dir);
    config.wallet_source = "Railgun Test Wallet".into();

    let err = lifecycle.start(&config).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert_eq!(engine.starts(), 0);
}

#[tokio::test]
async fn test_create_or_load_is_idempotent() {
    let h = started().await;
    let first = h.wallet().await;
    let second = h.wallet().await;
    assert_eq!(first.id(), second.id());
    assert!(Arc::ptr_eq(&first, &second));

    let other = h
        .wallets
        .create_or_load(
            EncryptionKey::parse(&"01".repeat(32)).unwrap(),
            Mnemonic::parse(TEST_MNEMONIC).unwrap(),
            Some(1),
        )
        .await
        .unwrap();
    assert_ne!(other.id(), first.id());
}

#[tokio::test]
async fn test_viewing_key_cached_per_handle() {
    let h = started().await;
    let wallet = h.wallet().await;

    let a = h.wallets.derive_shareable_viewing_key(&wallet).await.unwrap();
    let b = h.wallets.derive_shareable_viewing_key(&wallet).await.unwrap();
    assert_eq!(a, b);
    let calls = h
        .engine
        .calls()
        .into_iter()
        .filter(|c| c == "shareable_viewing_key")
        .count();
    assert_eq!(calls, 1);

    let address = h.wallets.derive_address(&wallet, chain());
    assert_eq!(address.to_string(), ZK_ADDR);
}

#[tokio::test]
async fn test_interrupt_stops_engine_once() {
    let h = started().await;
    let never = std::future::pending::<Result<(), OrchestratorError>>();

    let outcome = run_until_interrupted(h.lifecycle.clone(), never, async {})
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Interrupted));
    assert_eq!(h.engine.stops(), 1);

    // Another exit handler running later is harmless
    assert_eq!(h.lifecycle.stop().await.unwrap(), StopOutcome::AlreadyStopped);
    assert_eq!(h.engine.stops(), 1);
}

#[tokio::test]
async fn test_failed_operation_still_stops_engine() {
    let h = started().await;
    let failing = async { Err::<(), _>(OrchestratorError::Estimation("balance too low".into())) };

    let err = run_until_interrupted(
        h.lifecycle.clone(),
        failing,
        tokio::time::sleep(Duration::from_secs(60)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::Estimation(_)));
    assert_eq!(h.engine.stops(), 1);
    assert!(!h.lifecycle.is_running().await);
}

#[tokio::test]
async fn test_session_on_unstarted_engine() {
    let lifecycle = Arc::new(EngineLifecycle::new(FakeEngine::new()));
    let session = WalletSession::new(lifecycle);
    let err = session
        .create_or_load(
            EncryptionKey::parse(&"02".repeat(32)).unwrap(),
            Mnemonic::parse(TEST_MNEMONIC).unwrap(),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_lifecycle());
}
