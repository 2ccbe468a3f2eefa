//! Operator subcommands
//!
//! Every subcommand opens a [`Session`] first: engine start, chain client,
//! liveness probe, provider registration. The caller owns the lifecycle so it
//! can stop the engine whichever way the command ends.

use std::sync::Arc;

use alloy_primitives::U256;
use clap::{Parser, Subcommand};
use railgun_core::{Recipient, RecipientAddress, TxidVersion};
use railgun_orchestrator::{
    probe, resolve_token_amount, shield_data, AllowanceDecision, AllowanceGuard,
    BalanceSyncCoordinator, Broadcaster, BridgeEngine, ChainClient, Confirmation,
    ConnectedNetwork, EngineLifecycle, FallbackChainClient, GasPricingService, Operation,
    OrchestratorError, OrchestratorResult, PoiReporter, ProviderConnector, ShieldKey,
    TransactionBuilder, WalletHandle, WalletSession, DEFAULT_POLLING_INTERVAL,
    DEFAULT_SCAN_TIMEOUT, SHIELD_SIGNATURE_MESSAGE,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::OperatorConfig;

#[derive(Debug, Parser)]
#[command(
    name = "railgun-flow",
    author,
    version,
    about = "Railgun private transaction flows",
    long_about = "Shield, transfer and unshield ERC-20 tokens through Railgun.\n\
                  Configuration is read from .env and the environment (RAILGUN_TEST_RPC is required)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start the engine, register the provider and load the wallet
    Init,
    /// Print the 0zk address, shareable viewing key and account index as JSON
    Address,
    /// Scan the wallet and list spendable private balances
    Balances,
    /// Shield SHIELD_AMOUNT of ERC20_TOKEN_ADDRESS into the operator's wallet
    Shield,
    /// Print shield and approval payloads for ACCOUNT_ADDRESS without broadcasting
    ShieldData,
    /// Send SHIELD_AMOUNT privately to RECIPIENT_RAILGUN_ADDRESS
    Transfer,
    /// Unshield SHIELD_AMOUNT to the operator's public wallet
    Unshield,
    /// Generate POIs and summarize them per txid version
    Pois,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Address => "address",
            Self::Balances => "balances",
            Self::Shield => "shield",
            Self::ShieldData => "shield-data",
            Self::Transfer => "transfer",
            Self::Unshield => "unshield",
            Self::Pois => "pois",
        }
    }
}

/// Engine bridge for the configured sidecar
pub fn bridge_engine(config: &OperatorConfig) -> BridgeEngine {
    let engine = BridgeEngine::new(config.engine_url.clone());
    match &config.engine_ws_url {
        Some(ws_url) => engine.with_event_stream(ws_url.clone()),
        None => engine,
    }
}

/// Run one subcommand on an unstarted lifecycle
pub async fn execute(
    command: Command,
    config: OperatorConfig,
    lifecycle: Arc<EngineLifecycle>,
) -> OrchestratorResult<()> {
    let session = Session::open(config, lifecycle).await?;
    match command {
        Command::Init => session.init().await,
        Command::Address => session.address().await,
        Command::Balances => session.balances().await,
        Command::Shield => session.shield().await,
        Command::ShieldData => session.shield_data().await,
        Command::Transfer => session.transfer().await,
        Command::Unshield => session.unshield().await,
        Command::Pois => session.pois().await,
    }
}

/// Started engine plus everything the subcommands share
pub struct Session {
    config: OperatorConfig,
    lifecycle: Arc<EngineLifecycle>,
    chain: Arc<dyn ChainClient>,
    network: ConnectedNetwork,
    scans: Arc<BalanceSyncCoordinator>,
    wallets: WalletSession,
    version: TxidVersion,
}

impl Session {
    pub async fn open(config: OperatorConfig, lifecycle: Arc<EngineLifecycle>) -> OrchestratorResult<Self> {
        lifecycle.start(&config.lifecycle_config()).await?;

        let chain: Arc<dyn ChainClient> = Arc::new(FallbackChainClient::from_config(
            &config.provider_config(),
            &config.mnemonic,
        )?);
        probe(chain.as_ref()).await;

        let network = ProviderConnector::new(lifecycle.clone(), config.network_id)
            .connect(&config.provider_config(), DEFAULT_POLLING_INTERVAL)
            .await?;

        let scans = Arc::new(BalanceSyncCoordinator::new(lifecycle.clone()));
        scans.spawn_event_pump();
        let wallets = WalletSession::new(lifecycle.clone());

        Ok(Self {
            config,
            lifecycle,
            chain,
            network,
            scans,
            wallets,
            version: TxidVersion::default(),
        })
    }

    async fn init(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        print_json(&json!({
            "chain": self.network.chain,
            "fees": self.network.fees,
            "publicAddress": self.chain.signer_address(),
            "railgunAddress": wallet.railgun_address(),
        }));
        Ok(())
    }

    async fn address(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        let address = self.wallets.derive_address(&wallet, self.network.chain);
        let viewing_key = self.wallets.derive_shareable_viewing_key(&wallet).await?;
        print_json(&json!({
            "zerozkAddress": address.to_string(),
            "viewingKey": viewing_key,
            "accountIndex": wallet.derivation_index().unwrap_or(0),
        }));
        Ok(())
    }

    async fn balances(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        self.scan(&wallet).await?;
        let balances = self
            .scans
            .spendable_balances(wallet.id(), self.network.chain)
            .await?;
        if balances.is_empty() {
            tracing::info!("No spendable balances for {}", wallet.railgun_address());
        }
        print_json(&json!(balances));
        Ok(())
    }

    async fn shield(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        let amount = self.amount().await?;
        let owner = self.chain.signer_address();

        let signature = self
            .chain
            .sign_message(SHIELD_SIGNATURE_MESSAGE.as_bytes())
            .await?;
        let op = Operation::shield(
            self.version,
            self.network.chain,
            vec![Recipient::parse(self.config.token, amount, wallet.railgun_address())?],
            ShieldKey::from_signature(&signature),
            owner,
        )?;
        let prepared = self.builder().run(&op, &self.gas_pricing(), None).await?;

        let decision = AllowanceGuard::new(self.chain.clone())
            .ensure_allowance_for(&prepared.transaction, self.config.token, owner, amount)
            .await?;
        let broadcaster = Broadcaster::new(self.chain.clone());
        if let AllowanceDecision::ApprovalRequired(approval) = decision {
            let approved = broadcaster.submit_and_confirm(approval).await?;
            tracing::info!("Approval confirmed: {}", approved.tx_hash);
        }

        let confirmation = broadcaster.submit_and_confirm(prepared.transaction).await?;
        print_confirmation("shield", &confirmation);
        Ok(())
    }

    async fn shield_data(&self) -> OrchestratorResult<()> {
        let account = self.config.account_address.ok_or_else(|| missing("ACCOUNT_ADDRESS"))?;
        let recipient = self.recipient_railgun_address()?;
        let amount = self.amount().await?;

        let op = Operation::shield(
            self.version,
            self.network.chain,
            vec![Recipient::parse(self.config.token, amount, recipient)?],
            ShieldKey::from_account(account),
            self.chain.signer_address(),
        )?;
        let prepared = self.builder().run(&op, &self.gas_pricing(), None).await?;

        let decision = AllowanceGuard::new(self.chain.clone())
            .ensure_allowance_for(&prepared.transaction, self.config.token, account, amount)
            .await?;
        print_json(&json!(shield_data(&prepared.transaction, &decision)));
        Ok(())
    }

    async fn transfer(&self) -> OrchestratorResult<()> {
        let recipient = self.recipient_railgun_address()?;
        let wallet = self.wallet().await?;
        self.scan(&wallet).await?;
        let amount = self.amount().await?;

        let op = Operation::transfer(
            self.version,
            self.network.chain,
            wallet,
            vec![Recipient::parse(self.config.token, amount, recipient)?],
            self.config.memo.clone(),
        )?;
        self.prove_and_broadcast(op).await
    }

    async fn unshield(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        self.scan(&wallet).await?;
        let amount = self.amount().await?;

        let op = Operation::unshield(
            self.version,
            self.network.chain,
            wallet,
            vec![Recipient::new(
                self.config.token,
                amount,
                RecipientAddress::Public(self.chain.signer_address()),
            )?],
        )?;
        self.prove_and_broadcast(op).await
    }

    async fn pois(&self) -> OrchestratorResult<()> {
        let wallet = self.wallet().await?;
        self.scan(&wallet).await?;

        let reporter = PoiReporter::new(self.lifecycle.clone());
        let logger = reporter.spawn_progress_logger();
        let report = reporter.generate(self.network.chain, wallet.id()).await?;
        let summaries = reporter.summarize_all(self.network.chain, wallet.id()).await;
        logger.abort();

        let mut output = serde_json::Map::new();
        for (version, status) in &summaries {
            output.insert(version.label().to_string(), json!(status));
        }
        let failed: Vec<&str> = report.failed_versions().iter().map(|v| v.label()).collect();
        print_json(&json!({ "summaries": output, "failedGeneration": failed }));
        Ok(())
    }

    async fn prove_and_broadcast(&self, op: Operation) -> OrchestratorResult<()> {
        let (progress, logger) = progress_logger("Proof");
        let prepared = self
            .builder()
            .run(&op, &self.gas_pricing(), Some(progress))
            .await;
        let _ = logger.await;
        let prepared = prepared?;

        let confirmation = Broadcaster::new(self.chain.clone())
            .submit_and_confirm(prepared.transaction)
            .await?;
        print_confirmation(op.kind().name(), &confirmation);
        Ok(())
    }

    async fn wallet(&self) -> OrchestratorResult<Arc<WalletHandle>> {
        self.wallets
            .create_or_load(
                self.config.encryption_key.clone(),
                self.config.mnemonic.clone(),
                self.config.account_index,
            )
            .await
    }

    async fn scan(&self, wallet: &WalletHandle) -> OrchestratorResult<()> {
        self.scans
            .start_scan(std::slice::from_ref(wallet.id()), self.network.chain)
            .await?;

        let (progress, logger) = progress_logger("Balance scan");
        let scanned = self
            .scans
            .await_scan(wallet.id(), self.network.chain, DEFAULT_SCAN_TIMEOUT, Some(progress))
            .await;
        let _ = logger.await;
        scanned
    }

    async fn amount(&self) -> OrchestratorResult<U256> {
        resolve_token_amount(self.chain.as_ref(), self.config.token, &self.config.amount).await
    }

    fn recipient_railgun_address(&self) -> OrchestratorResult<&str> {
        self.config
            .recipient_railgun_address
            .as_deref()
            .ok_or_else(|| missing("RECIPIENT_RAILGUN_ADDRESS"))
    }

    fn builder(&self) -> TransactionBuilder {
        TransactionBuilder::new(self.lifecycle.clone(), self.scans.clone())
    }

    fn gas_pricing(&self) -> GasPricingService {
        GasPricingService::new(self.chain.clone())
    }
}

fn missing(key: &str) -> OrchestratorError {
    OrchestratorError::Configuration(format!("{} is not set", key))
}

/// Log every value sent on the returned channel until it is dropped
fn progress_logger(label: &'static str) -> (mpsc::UnboundedSender<f64>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
    let handle = tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            tracing::info!("{} progress: {:.0}%", label, value * 100.0);
        }
    });
    (tx, handle)
}

fn print_confirmation(kind: &str, confirmation: &Confirmation) {
    tracing::info!("{} confirmed in block {:?}", kind, confirmation.block_number);
    print_json(&json!({
        "operation": kind,
        "txHash": confirmation.tx_hash,
        "blockNumber": confirmation.block_number,
        "gasUsed": confirmation.gas_used,
    }));
}

fn print_json(value: &Value) {
    println!("{:#}", value);
}
