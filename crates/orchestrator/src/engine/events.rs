//! Engine progress events and the WebSocket stream that carries them

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use railgun_core::{Chain, ScanUpdate, TxidVersion};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::EngineError;

/// Progress reported by the engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum EngineEvent {
    /// UTXO or TXID merkletree scan update
    Scan(ScanUpdate),
    /// Proof generation progress for one `generate_proof` call
    ProofProgress(ProofProgress),
    /// Wallet POI proof progress
    PoiProof(PoiProofProgress),
}

/// Tags the progress events of one proof generation call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofId(pub u64);

impl ProofId {
    /// Process-unique id for the next proof
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ProofId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofProgress {
    pub proof_id: ProofId,
    /// In [0, 1]
    pub progress: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiProofProgress {
    pub status: String,
    pub txid_version: TxidVersion,
    pub chain: Chain,
    pub progress: f64,
    #[serde(default)]
    pub list_key: String,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub railgun_txid: Option<String>,
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub err_message: Option<String>,
}

/// Handle to a running event subscription
pub struct EventStream {
    cancel_tx: mpsc::Sender<()>,
}

impl EventStream {
    /// Subscribe to engine events at `ws_url`, reconnecting after drops
    ///
    /// Every decoded event is published on `events`.
    pub fn spawn(
        ws_url: impl Into<String>,
        events: broadcast::Sender<EngineEvent>,
        reconnect_delay: Duration,
    ) -> Result<Self, EngineError> {
        let ws_url = ws_url.into();
        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(EngineError::Events(format!("not a WebSocket URL: {}", ws_url)));
        }

        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                match run_subscription(&ws_url, &events, &mut cancel_rx).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::warn!(
                            "Engine event stream disconnected: {}. Reconnecting in {:?}...",
                            e,
                            reconnect_delay
                        );

                        tokio::select! {
                            _ = cancel_rx.recv() => break,
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                    }
                }
            }
            tracing::debug!("Engine event stream closed");
        });

        Ok(Self { cancel_tx })
    }

    /// Stop the subscription and close the WebSocket connection
    pub async fn close(self) {
        let _ = self.cancel_tx.send(()).await;
    }
}

async fn run_subscription(
    ws_url: &str,
    events: &broadcast::Sender<EngineEvent>,
    cancel_rx: &mut mpsc::Receiver<()>,
) -> Result<(), EngineError> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| EngineError::Events(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe_msg = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "subscribeEngineEvents",
        "params": [],
    });
    write
        .send(Message::Text(subscribe_msg.to_string().into()))
        .await
        .map_err(|e| EngineError::Events(e.to_string()))?;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_notification(&text)? {
                            // No receivers is fine, nobody is waiting yet
                            let _ = events.send(event);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(EngineError::Events("connection closed".into()));
                    }
                    Some(Err(e)) => {
                        return Err(EngineError::Events(e.to_string()));
                    }
                    _ => {}
                }
            }
            _ = cancel_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Decode one WebSocket frame
///
/// Subscription acks and unknown notifications yield `None`; a rejected
/// subscription is an error.
fn parse_notification(text: &str) -> Result<Option<EngineEvent>, EngineError> {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to parse engine event frame: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = json.get("error") {
        return Err(EngineError::Events(error.to_string()));
    }

    if json.get("method").and_then(|m| m.as_str()) != Some("engineEvent") {
        return Ok(None);
    }

    let Some(result) = json.get("params").and_then(|p| p.get("result")) else {
        return Ok(None);
    };

    match serde_json::from_value(result.clone()) {
        Ok(event) => Ok(Some(event)),
        Err(e) => {
            tracing::warn!("Failed to decode engine event: {}", e);
            Ok(None)
        }
    }
}
