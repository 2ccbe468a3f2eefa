//! Balance scan coordination
//!
//! Each (wallet, chain, scan kind) slot keeps the latest [`ScanState`] in a
//! `watch` channel and republishes every accepted update on a `broadcast`
//! channel, so several tasks can await the same wallet without racing on
//! shared state. The UTXO scan gates spending; TXID progress is tracked and
//! logged alongside it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use railgun_core::{Chain, ScanKind, ScanState, ScanStatus, ScanUpdate, WalletId};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::engine::{EngineEvent, TokenBalance};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::lifecycle::EngineLifecycle;

/// Default time `await_scan` waits for a terminal status
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const SLOT_UPDATE_CAPACITY: usize = 64;

type SlotKey = (WalletId, Chain, ScanKind);

struct ScanSlot {
    state: watch::Sender<ScanState>,
    updates: broadcast::Sender<ScanState>,
    completed_once: AtomicBool,
}

impl ScanSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(ScanState::default());
        let (updates, _) = broadcast::channel(SLOT_UPDATE_CAPACITY);
        Self {
            state,
            updates,
            completed_once: AtomicBool::new(false),
        }
    }

    fn apply(&self, status: ScanStatus, progress: f64) -> Option<ScanState> {
        let mut accepted = None;
        self.state.send_if_modified(|state| {
            accepted = state.apply(status, progress);
            accepted.is_some()
        });

        if let Some(next) = accepted {
            if next.status == ScanStatus::Complete {
                self.completed_once.store(true, Ordering::Release);
            }
            let _ = self.updates.send(next);
        }
        accepted
    }

    /// Begin a new scan run; `completed_once` is kept
    fn restart(&self) {
        self.state.send_replace(ScanState::default());
    }
}

pub struct BalanceSyncCoordinator {
    lifecycle: Arc<EngineLifecycle>,
    slots: DashMap<SlotKey, Arc<ScanSlot>>,
}

impl BalanceSyncCoordinator {
    pub fn new(lifecycle: Arc<EngineLifecycle>) -> Self {
        Self {
            lifecycle,
            slots: DashMap::new(),
        }
    }

    /// Feed engine scan events into the slots until the event channel closes
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut events = self.lifecycle.subscribe_events();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::Scan(update)) => coordinator.record(&update),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Scan event pump lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Scan event pump stopped");
        })
    }

    /// Apply one engine update
    ///
    /// Updates without a wallet id apply to every wallet registered on the chain.
    pub fn record(&self, update: &ScanUpdate) {
        match &update.wallet_id {
            Some(wallet) => {
                let slot = self.slot(wallet, update.chain, update.kind);
                if slot.apply(update.status, update.progress).is_some() {
                    log_update(Some(wallet), update);
                }
            }
            None => {
                let matching: Vec<Arc<ScanSlot>> = self
                    .slots
                    .iter()
                    .filter(|entry| {
                        let (_, chain, kind) = entry.key();
                        *chain == update.chain && *kind == update.kind
                    })
                    .map(|entry| Arc::clone(entry.value()))
                    .collect();

                let mut accepted = false;
                for slot in matching {
                    accepted |= slot.apply(update.status, update.progress).is_some();
                }
                if accepted {
                    log_update(None, update);
                }
            }
        }
    }

    /// Trigger UTXO and TXID scans for `wallets`; returns before they finish
    ///
    /// Each slot restarts at NOT_STARTED so a later `await_scan` waits for
    /// this run rather than returning on an earlier COMPLETE.
    pub async fn start_scan(&self, wallets: &[WalletId], chain: Chain) -> OrchestratorResult<()> {
        let engine = self.lifecycle.lease().await?;
        for wallet in wallets {
            self.slot(wallet, chain, ScanKind::Utxo).restart();
            self.slot(wallet, chain, ScanKind::Txid).restart();
        }

        engine
            .refresh_balances(chain, wallets)
            .await
            .map_err(OrchestratorError::Engine)?;

        tracing::info!("Started balance scan for {} wallet(s) on {}", wallets.len(), chain);
        Ok(())
    }

    /// Wait until the wallet's UTXO scan on `chain` reaches COMPLETE or ERROR
    ///
    /// Every distinct progress value observed while waiting is forwarded to
    /// `progress`, starting with the current one if a scan is under way.
    pub async fn await_scan(
        &self,
        wallet: &WalletId,
        chain: Chain,
        timeout: Duration,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> OrchestratorResult<()> {
        let slot = self.slot(wallet, chain, ScanKind::Utxo);

        let wait = async {
            // Subscribe before reading the current state so nothing falls in between
            let mut updates = slot.updates.subscribe();
            let mut last: Option<f64> = None;

            let mut observe = |state: ScanState| -> Option<OrchestratorResult<()>> {
                if state.status != ScanStatus::NotStarted
                    && last.map_or(true, |prev| state.progress > prev)
                {
                    last = Some(state.progress);
                    if let Some(tx) = &progress {
                        let _ = tx.send(state.progress);
                    }
                }
                match state.status {
                    ScanStatus::Complete => Some(Ok(())),
                    ScanStatus::Error => Some(Err(OrchestratorError::ScanFailed {
                        wallet: wallet.clone(),
                        chain,
                    })),
                    _ => None,
                }
            };

            let current = *slot.state.borrow();
            if let Some(done) = observe(current) {
                return done;
            }

            loop {
                let state = match updates.recv().await {
                    Ok(state) => state,
                    Err(broadcast::error::RecvError::Lagged(_)) => *slot.state.borrow(),
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(OrchestratorError::ScanFailed {
                            wallet: wallet.clone(),
                            chain,
                        })
                    }
                };
                if let Some(done) = observe(state) {
                    return done;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => {
                if result.is_ok() {
                    tracing::info!("Balance scan complete for wallet {} on {}", wallet, chain);
                }
                result
            }
            Err(_) => Err(OrchestratorError::ScanTimeout {
                wallet: wallet.clone(),
                chain,
                timeout,
            }),
        }
    }

    /// Fails with `NotScanned` unless the wallet's UTXO scan completed this session
    pub fn ensure_scanned(&self, wallet: &WalletId, chain: Chain) -> OrchestratorResult<()> {
        let key = (wallet.clone(), chain, ScanKind::Utxo);
        let scanned = self
            .slots
            .get(&key)
            .map(|slot| slot.completed_once.load(Ordering::Acquire))
            .unwrap_or(false);

        if scanned {
            Ok(())
        } else {
            Err(OrchestratorError::NotScanned {
                wallet: wallet.clone(),
                chain,
            })
        }
    }

    pub fn scan_state(&self, wallet: &WalletId, chain: Chain, kind: ScanKind) -> ScanState {
        self.slots
            .get(&(wallet.clone(), chain, kind))
            .map(|slot| *slot.state.borrow())
            .unwrap_or_default()
    }

    /// Spendable token balances; requires a completed scan
    pub async fn spendable_balances(
        &self,
        wallet: &WalletId,
        chain: Chain,
    ) -> OrchestratorResult<Vec<TokenBalance>> {
        self.ensure_scanned(wallet, chain)?;
        let engine = self.lifecycle.lease().await?;
        engine
            .spendable_balances(chain, wallet)
            .await
            .map_err(OrchestratorError::Engine)
    }

    fn slot(&self, wallet: &WalletId, chain: Chain, kind: ScanKind) -> Arc<ScanSlot> {
        self.slots
            .entry((wallet.clone(), chain, kind))
            .or_insert_with(|| Arc::new(ScanSlot::new()))
            .clone()
    }
}

fn log_update(wallet: Option<&WalletId>, update: &ScanUpdate) {
    let kind = match update.kind {
        ScanKind::Utxo => "UTXO",
        ScanKind::Txid => "TXID",
    };
    let scope = wallet.map(|w| w.to_string()).unwrap_or_else(|| "*".to_string());
    match update.status {
        ScanStatus::Error => tracing::warn!(
            "{} merkletree scan failed on {} (wallet {})",
            kind,
            update.chain,
            scope
        ),
        status => tracing::debug!(
            "{} merkletree scan on {} (wallet {}): {:?} {:.2}",
            kind,
            update.chain,
            scope,
            status,
            update.progress
        ),
    }
}
