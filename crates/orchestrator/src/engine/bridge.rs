//! JSON-RPC bridge to an out-of-process engine
//!
//! The sidecar hosts the Railgun wallet SDK and exposes its functions under
//! their SDK names. Parameters are sent by name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use railgun_core::{
    Chain, GasDetails, PopulatedTransaction, ScanKind, ScanStatus, ScanUpdate, TxidVersion,
    WalletId, WalletInfo,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};

use super::events::EventStream;
use super::{
    Engine, EngineEvent, EngineRequest, EngineStartParams, FallbackProviderConfig, ProofId,
    RailgunFees, TokenBalance,
};
use crate::builder::OperationKind;
use crate::error::EngineError;
use crate::wallet::{EncryptionKey, Mnemonic};

/// Error code the sidecar uses when a populate call finds no matching proof
pub const STALE_PROOF_CODE: i64 = -32010;

/// Error code for a second start on a running engine
pub const ALREADY_RUNNING_CODE: i64 = -32011;

const EVENT_CAPACITY: usize = 256;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasEstimateResponse {
    gas_estimate: U256,
}

#[derive(Deserialize)]
struct PopulateResponse {
    transaction: PopulatedTransaction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadProviderResponse {
    #[serde(default)]
    fees_serialized: RailgunFees,
}

/// HTTP side of the bridge; cheap to clone into spawned tasks
#[derive(Clone)]
struct JsonRpcTransport {
    url: String,
    http_client: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcTransport {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("engine -> {} (id {})", method, id);

        let response = self
            .http_client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id,
            }))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if let Some(error) = json.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown engine error")
                .to_string();
            return Err(match code {
                STALE_PROOF_CODE => EngineError::StaleProof(message),
                ALREADY_RUNNING_CODE => EngineError::AlreadyRunning,
                _ => EngineError::Rpc {
                    method: method.to_string(),
                    code,
                    message,
                },
            });
        }

        let result = json
            .get("result")
            .cloned()
            .ok_or_else(|| EngineError::Decode(format!("{}: no result in response", method)))?;

        serde_json::from_value(result).map_err(|e| EngineError::Decode(format!("{}: {}", method, e)))
    }
}

pub struct BridgeEngine {
    transport: JsonRpcTransport,
    ws_url: Option<String>,
    events: broadcast::Sender<EngineEvent>,
    stream: Mutex<Option<EventStream>>,
    reconnect_delay: Duration,
}

impl BridgeEngine {
    pub fn new(url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport: JsonRpcTransport {
                url: url.into(),
                http_client: reqwest::Client::new(),
                next_id: Arc::new(AtomicU64::new(1)),
            },
            ws_url: None,
            events,
            stream: Mutex::new(None),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    /// Receive progress over a WebSocket instead of synthesizing scan events
    pub fn with_event_stream(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.transport.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, EngineError> {
        self.transport.call(method, params).await
    }

    /// Wait for the sidecar's own scan completion and publish it as events
    fn synthesize_scan_completion(&self, chain: Chain, wallets: &[WalletId]) {
        for wallet in wallets {
            let transport = self.transport.clone();
            let events = self.events.clone();
            let wallet = wallet.clone();

            tokio::spawn(async move {
                let params = json!({ "walletId": wallet, "chain": chain });
                let status = match transport.call::<Value>("awaitWalletScan", params).await {
                    Ok(_) => ScanStatus::Complete,
                    Err(e) => {
                        tracing::warn!("awaitWalletScan failed for {}: {}", wallet, e);
                        ScanStatus::Error
                    }
                };
                for kind in [ScanKind::Utxo, ScanKind::Txid] {
                    let _ = events.send(EngineEvent::Scan(ScanUpdate {
                        wallet_id: Some(wallet.clone()),
                        chain,
                        kind,
                        status,
                        progress: 1.0,
                    }));
                }
            });
        }
    }
}

fn gas_estimate_method(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Shield => "gasEstimateForShield",
        OperationKind::Transfer => "gasEstimateForUnprovenTransfer",
        OperationKind::Unshield => "gasEstimateForUnprovenUnshield",
    }
}

fn proof_method(kind: OperationKind) -> Option<&'static str> {
    match kind {
        OperationKind::Shield => None,
        OperationKind::Transfer => Some("generateTransferProof"),
        OperationKind::Unshield => Some("generateUnshieldProof"),
    }
}

fn populate_method(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Shield => "populateShield",
        OperationKind::Transfer => "populateProvedTransfer",
        OperationKind::Unshield => "populateProvedUnshield",
    }
}

/// Named parameters shared by every operation-specific call
fn request_params(request: &EngineRequest<'_>) -> Value {
    let mut params = json!({
        "txidVersion": request.txid_version,
        "chain": request.chain,
        "erc20AmountRecipients": request.recipients,
        "nftAmountRecipients": [],
    });

    match request.kind {
        OperationKind::Shield => {
            params["shieldPrivateKey"] = json!(request.shield_key.map(|k| k.to_hex()));
            params["fromWalletAddress"] = json!(request.from_address);
        }
        OperationKind::Transfer | OperationKind::Unshield => {
            params["walletId"] = json!(request.wallet);
            params["encryptionKey"] = json!(request.encryption_key.map(|k| k.expose()));
            params["feeTokenDetails"] = Value::Null;
            params["sendWithPublicWallet"] = json!(request.send_with_public_wallet);
            if request.kind == OperationKind::Transfer {
                params["memoText"] = json!(request.memo);
                params["showSenderAddressToRecipient"] = json!(true);
            }
        }
    }
    params
}

#[async_trait]
impl Engine for BridgeEngine {
    async fn start(&self, params: &EngineStartParams) -> Result<(), EngineError> {
        self.call::<Value>("startRailgunEngine", json!(params)).await?;

        if let Some(ws_url) = &self.ws_url {
            let stream = EventStream::spawn(ws_url.clone(), self.events.clone(), self.reconnect_delay)?;
            *self.stream.lock().await = Some(stream);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if let Some(stream) = self.stream.lock().await.take() {
            stream.close().await;
        }
        self.call::<Value>("stopRailgunEngine", json!({})).await?;
        Ok(())
    }

    async fn load_provider(
        &self,
        config: &FallbackProviderConfig,
        polling_interval: Duration,
    ) -> Result<RailgunFees, EngineError> {
        let response: LoadProviderResponse = self
            .call(
                "loadProvider",
                json!({
                    "config": config,
                    "pollingInterval": polling_interval.as_millis() as u64,
                }),
            )
            .await?;
        Ok(response.fees_serialized)
    }

    async fn create_or_load_wallet(
        &self,
        encryption_key: &EncryptionKey,
        mnemonic: &Mnemonic,
        derivation_index: Option<u32>,
    ) -> Result<WalletInfo, EngineError> {
        self.call(
            "createRailgunWallet",
            json!({
                "encryptionKey": encryption_key.expose(),
                "mnemonic": mnemonic.expose(),
                "creationBlockNumbers": Value::Null,
                "derivationIndex": derivation_index,
            }),
        )
        .await
    }

    async fn shareable_viewing_key(&self, wallet: &WalletId) -> Result<String, EngineError> {
        self.call("getWalletShareableViewingKey", json!({ "walletId": wallet }))
            .await
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn refresh_balances(&self, chain: Chain, wallets: &[WalletId]) -> Result<(), EngineError> {
        self.call::<Value>(
            "refreshBalances",
            json!({ "chain": chain, "walletIdFilter": wallets }),
        )
        .await?;

        if self.ws_url.is_none() {
            self.synthesize_scan_completion(chain, wallets);
        }
        Ok(())
    }

    async fn spendable_balances(
        &self,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<TokenBalance>, EngineError> {
        self.call(
            "getSpendableERC20Balances",
            json!({ "chain": chain, "walletId": wallet }),
        )
        .await
    }

    async fn gas_estimate(
        &self,
        request: &EngineRequest<'_>,
        gas: &GasDetails,
    ) -> Result<U256, EngineError> {
        let mut params = request_params(request);
        if request.kind != OperationKind::Shield {
            params["originalGasDetails"] = json!(gas);
        }
        let response: GasEstimateResponse =
            self.call(gas_estimate_method(request.kind), params).await?;
        Ok(response.gas_estimate)
    }

    async fn generate_proof(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: U256,
        proof_id: ProofId,
    ) -> Result<(), EngineError> {
        let method = proof_method(request.kind).ok_or_else(|| EngineError::Rpc {
            method: "generateProof".into(),
            code: -32602,
            message: format!("{:?} does not take a proof", request.kind),
        })?;

        let mut params = request_params(request);
        params["overallBatchMinGasPrice"] = json!(min_gas_price);
        params["proofId"] = json!(proof_id);
        self.call::<Value>(method, params).await?;
        Ok(())
    }

    async fn populate(
        &self,
        request: &EngineRequest<'_>,
        min_gas_price: Option<U256>,
        gas: &GasDetails,
    ) -> Result<PopulatedTransaction, EngineError> {
        let mut params = request_params(request);
        params["gasDetails"] = json!(gas);
        if let Some(price) = min_gas_price {
            params["overallBatchMinGasPrice"] = json!(price);
        }
        let response: PopulateResponse = self.call(populate_method(request.kind), params).await?;
        Ok(response.transaction)
    }

    async fn generate_pois(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<(), EngineError> {
        self.call::<Value>(
            "generatePOIsForWallet",
            json!({ "txidVersion": version, "chain": chain, "walletId": wallet }),
        )
        .await?;
        Ok(())
    }

    async fn pending_spent_pois(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError> {
        self.call(
            "getChainTxidsStillPendingSpentPOIs",
            json!({ "txidVersion": version, "chain": chain, "walletId": wallet }),
        )
        .await
    }

    async fn spendable_received_txids(
        &self,
        version: TxidVersion,
        chain: Chain,
        wallet: &WalletId,
    ) -> Result<Vec<String>, EngineError> {
        self.call(
            "getSpendableReceivedChainTxids",
            json!({ "txidVersion": version, "chain": chain, "walletId": wallet }),
        )
        .await
    }
}
