//! Shared fakes for railgun-orchestrator tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, U256};
use async_trait::async_trait;
use railgun_contracts::RailgunAddresses;
use railgun_core::{
    recipient::total_by_token, Chain, GasDetails, PopulatedTransaction, Recipient, ScanKind,
    ScanStatus, ScanUpdate, TxHash, TxidVersion, WalletId, WalletInfo,
};
use railgun_orchestrator::{
    BalanceSyncCoordinator, ChainClient, ChainError, Confirmation, EncryptionKey, Engine,
    EngineError, EngineEvent, EngineLifecycle, EngineRequest, EngineStartParams,
    FallbackProviderConfig, FeeData, LifecycleConfig, Mnemonic, OperationKind, ProofId,
    ProofProgress, RailgunFees, TokenBalance, WalletHandle, WalletSession,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const CHAIN_ID: u64 = 11_155_111;
pub const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";
pub const ZK_ADDR: &str = "0zk1qyk9nn28x0u3rwn5pknglda68wrn7gw6anjw8gg94mcj6eq5u48tlrv7j6fe3z53lama02nutwtcqc979wnce0qwly4y7w4rls5cq040g7z8eagshxrw5ajy990";
pub const GAS_ESTIMATE: u64 = 250_000;

pub fn chain() -> Chain {
    Chain::evm(CHAIN_ID)
}

pub fn token() -> Address {
    "0xb7F1CAD2080fA7EfF168eB1d3CD25a6094FD4A99".parse().unwrap()
}

pub fn public_recipient() -> Address {
    "0x1000000000000000000000000000000000000000".parse().unwrap()
}

pub fn private_recipient(amount: u64) -> Recipient {
    Recipient::parse(token(), U256::from(amount), ZK_ADDR).unwrap()
}

pub fn public_recipients(amount: u64) -> Vec<Recipient> {
    vec![Recipient::new(
        token(),
        U256::from(amount),
        railgun_core::RecipientAddress::Public(public_recipient()),
    )
    .unwrap()]
}

#[derive(Clone, Debug, PartialEq)]
struct ProvedBinding {
    kind: OperationKind,
    recipients: Vec<Recipient>,
    min_gas_price: U256,
}

/// Scripted engine: records calls, enforces balances and proof bindings
pub struct FakeEngine {
    events: broadcast::Sender<EngineEvent>,
    calls: Mutex<Vec<String>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    failing_stops: AtomicUsize,
    balances: Mutex<HashMap<Address, U256>>,
    proved: Mutex<Option<ProvedBinding>>,
    scan_script: Mutex<Vec<(ScanStatus, f64)>>,
    poi: Mutex<HashMap<TxidVersion, Result<(Vec<String>, Vec<String>), String>>>,
    proof_progress: HashMap<OperationKind, Vec<f64>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            calls: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            failing_stops: AtomicUsize::new(0),
            balances: Mutex::new(HashMap::new()),
            proved: Mutex::new(None),
            scan_script: Mutex::new(vec![(ScanStatus::Complete, 1.0)]),
            poi: Mutex::new(HashMap::new()),
            proof_progress: HashMap::from([
                (OperationKind::Transfer, vec![0.1, 0.5, 0.5, 1.0]),
                (OperationKind::Unshield, vec![0.2, 0.6, 0.9, 1.0]),
            ]),
        })
    }

    pub fn set_balance(&self, token: Address, amount: U256) {
        self.balances.lock().unwrap().insert(token, amount);
    }

    /// Make the next `n` stop calls fail
    pub fn fail_stops(&self, n: usize) {
        self.failing_stops.store(n, Ordering::SeqCst);
    }

    pub fn set_scan_script(&self, script: Vec<(ScanStatus, f64)>) {
        *self.scan_script.lock().unwrap() = script;
    }

    pub fn set_poi(
        &self,
        version: TxidVersion,
        result: Result<(Vec<String>, Vec<String>), String>,
    ) {
        self.poi.lock().unwrap().insert(version, result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(name))
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn start(&self, _params: &EngineStartParams) -> Result<(), EngineError> {
        self.record("start");
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.record("stop");
        self.stops.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failing_stops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(EngineError::Rpc {
                method: "stopRailgunEngine".into(),
                code: -32000,
                message: "database busy".into(),
            });
        }
        Ok(())
    }

    async fn load_provider(
        &self,
        config: &FallbackProviderConfig,
        _polling_interval: Duration,
    ) -> Result<RailgunFees, EngineError> {
        self.record(format!("load_provider:{}", config.chain_id));
        let mut fees = RailgunFees::default();
        fees.0.insert("shieldFeeV2".into(), "25".into());
        fees.0.insert("unshieldFeeV2".into(), "25".into());
        Ok(fees)
    }

    async fn create_or_load_wallet(
        &self,
        encryption_key: &EncryptionKey,
        mnemonic: &Mnemonic,
        derivation_index: Option<u32>,
    ) -> Result<WalletInfo, EngineError> {
        self.record("create_or_load_wallet");
        let seed = format!(
            "{}|{}|{}",
            mnemonic.expose(),
            encryption_key.expose(),
            derivation_index.unwrap_or(0)
        );
        let digest = keccak256(seed.as_bytes());
        Ok(WalletInfo {
            id: WalletId::new(format!("{:x}", digest)),
            railgun_address: ZK_ADDR.to_string(),
        })
    }

    async fn shareable_viewing_key(&self, wallet: &WalletId) -> Result<String, EngineError> {
        self.record("shareable_viewing_key");
        Ok(format!("vk-{}", wallet))
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn refresh_balances(&self, chain: Chain, _wallets: &[WalletId]) -> Result<(), EngineError> {
        self.record("refresh_balances");
        let script = self.scan_script.lock().unwrap().clone();
        for (status, progress) in script {
            for kind in [ScanKind::Utxo, ScanKind::Txid] {
                self.emit(EngineEvent::Scan(ScanUpdate {
                    wallet_id: None,
                    chain,
                    kind,
                    status,
                    progress,
                }));
            }
        }
        Ok(())
    }

    async fn spendable_balances(
        &self,
        _chain: Chain,
        _wallet: &WalletId,
    ) -> Result<Vec<TokenBalance>, EngineError> {
        self.record("spendable_balances");
        Ok(self
            .balances
            .lock()
            .unwrap()
            .iter()
            .map(|(token, amount)| TokenBalance {
                token_address: *token,
                amount: *amount,
            })
            .collect())
    }

    async fn gas_estimate(
        &self,
        request: &EngineRequest<'_>,
        _gas: &GasDetails,
    ) -> Result<U256, EngineError> {
        self.record(format!("gas_estimate:{}", request.kind));
        if request.kind != OperationKind::Shield {
            let balances = self.balances.lock().unwrap();
            for (token, total) in total_by_token(request.recipients) {
                let available = balances.get(&token).copied().unwrap_or_default();
                if total > available {
                    return Err(EngineError::Rpc {
                        method: "gasEstimate".into(),
                        code: -32000,
                        message: format!("balance too low: {} < {}", available, total),
                    });
                }
            }
        }
        Ok(U256::from(GAS_ESTIMATE))
    }

    async fn generate_proof(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: U256,
        proof_id: ProofId,
    ) -> Result<(), EngineError> {
        self.record(format!("generate_proof:{}", request.kind));
        let script = self.proof_progress.get(&request.kind).cloned().unwrap_or_default();
        for progress in script {
            self.emit(EngineEvent::ProofProgress(ProofProgress { proof_id, progress }));
            tokio::task::yield_now().await;
        }
        *self.proved.lock().unwrap() = Some(ProvedBinding {
            kind: request.kind,
            recipients: request.recipients.to_vec(),
            min_gas_price,
        });
        Ok(())
    }

    async fn populate(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: Option<U256>,
        gas: &GasDetails,
    ) -> Result<PopulatedTransaction, EngineError> {
        self.record(format!("populate:{}", request.kind));
        if let Some(min_gas_price) = min_gas_price {
            let expected = ProvedBinding {
                kind: request.kind,
                recipients: request.recipients.to_vec(),
                min_gas_price,
            };
            if self.proved.lock().unwrap().as_ref() != Some(&expected) {
                return Err(EngineError::StaleProof("no cached proof matches".into()));
            }
        }

        let gas_limit = gas.gas_estimate().map(|g| g.saturating_to::<u64>());
        Ok(PopulatedTransaction::new(
            RailgunAddresses::sepolia().relay,
            vec![0xcau8, 0xfe].into(),
            U256::ZERO,
        )
        .with_gas(
            gas_limit,
            Some(gas.max_fee_per_gas),
            Some(gas.max_priority_fee_per_gas),
        ))
    }

    async fn generate_pois(
        &self,
        version: TxidVersion,
        _chain: Chain,
        _wallet: &WalletId,
    ) -> Result<(), EngineError> {
        self.record(format!("generate_pois:{}", version));
        match self.poi.lock().unwrap().get(&version) {
            Some(Err(message)) => Err(EngineError::Transport(message.clone())),
            _ => Ok(()),
        }
    }

    async fn pending_spent_pois(
        &self,
        version: TxidVersion,
        _chain: Chain,
        _wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError> {
        match self.poi.lock().unwrap().get(&version) {
            Some(Ok((pending, _))) => Ok(pending.clone()),
            Some(Err(message)) => Err(EngineError::Transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn spendable_received_txids(
        &self,
        version: TxidVersion,
        _chain: Chain,
        _wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError> {
        match self.poi.lock().unwrap().get(&version) {
            Some(Ok((_, spendable))) => Ok(spendable.clone()),
            Some(Err(message)) => Err(EngineError::Transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// Chain with a settable allowance and fee oracle
pub struct FakeChain {
    pub decimals: u8,
    allowance: Mutex<U256>,
    fees: Mutex<Option<FeeData>>,
    submitted: Mutex<Vec<PopulatedTransaction>>,
}

impl FakeChain {
    pub fn new(decimals: u8) -> Arc<Self> {
        Arc::new(Self {
            decimals,
            allowance: Mutex::new(U256::ZERO),
            fees: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn set_allowance(&self, allowance: U256) {
        *self.allowance.lock().unwrap() = allowance;
    }

    /// `None` makes the fee query fail
    pub fn set_fees(&self, fees: Option<FeeData>) {
        *self.fees.lock().unwrap() = fees;
    }

    pub fn submitted(&self) -> Vec<PopulatedTransaction> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    fn signer_address(&self) -> Address {
        Address::repeat_byte(0x0a)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(7_000_000)
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        self.fees
            .lock()
            .unwrap()
            .ok_or_else(|| ChainError::Transport("fee oracle down".into()))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, ChainError> {
        let mut signature = keccak256(message).to_vec();
        signature.resize(65, 0x1b);
        Ok(signature)
    }

    async fn erc20_decimals(&self, _token: Address) -> Result<u8, ChainError> {
        Ok(self.decimals)
    }

    async fn erc20_allowance(
        &self,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> Result<U256, ChainError> {
        Ok(*self.allowance.lock().unwrap())
    }

    async fn submit(&self, tx: &PopulatedTransaction) -> Result<TxHash, ChainError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(tx.clone());
        Ok(keccak256(tx.call_digest()))
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        _timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        Ok(Confirmation {
            tx_hash,
            block_number: Some(7_000_001),
            gas_used: GAS_ESTIMATE,
        })
    }
}

/// Started engine with storage in a temp directory
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub chain: Arc<FakeChain>,
    pub lifecycle: Arc<EngineLifecycle>,
    pub scans: Arc<BalanceSyncCoordinator>,
    pub wallets: WalletSession,
    pub dir: TempDir,
}

impl Harness {
    pub fn config(&self) -> LifecycleConfig {
        lifecycle_config(&self.dir)
    }

    pub async fn wallet(&self) -> Arc<WalletHandle> {
        self.wallets
            .create_or_load(
                EncryptionKey::parse(&"01".repeat(32)).unwrap(),
                Mnemonic::parse(TEST_MNEMONIC).unwrap(),
                None,
            )
            .await
            .unwrap()
    }

    /// Mark the wallet's UTXO scan complete
    pub fn complete_scan(&self, wallet: &WalletId) {
        self.scans.record(&ScanUpdate {
            wallet_id: Some(wallet.clone()),
            chain: chain(),
            kind: ScanKind::Utxo,
            status: ScanStatus::Complete,
            progress: 1.0,
        });
    }
}

pub fn lifecycle_config(dir: &TempDir) -> LifecycleConfig {
    LifecycleConfig::new(
        "railguntest",
        dir.path().join("db").join("engine.db"),
        dir.path().join("artifacts"),
    )
    .with_flush_timeout(Duration::from_millis(200))
}

pub async fn started() -> Harness {
    let engine = FakeEngine::new();
    let chain = FakeChain::new(6);
    let lifecycle = Arc::new(EngineLifecycle::new(engine.clone()));
    let dir = tempfile::tempdir().unwrap();

    lifecycle.start(&lifecycle_config(&dir)).await.unwrap();

    let scans = Arc::new(BalanceSyncCoordinator::new(lifecycle.clone()));
    let wallets = WalletSession::new(lifecycle.clone());
    Harness {
        engine,
        chain,
        lifecycle,
        scans,
        wallets,
        dir,
    }
}
