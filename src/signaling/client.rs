//! WebSocket Client für den Chat-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay-Server:
//! - Read-Task: eingehende Frames parsen und per Broadcast verteilen
//! - Write-Task: ausgehende Frames aus einer Queue senden
//! - Heartbeat gegen Idle-Timeouts

use super::messages::{RelayMessage, PING_EVENT};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to relay server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// RELAY TRANSPORT
// ============================================================================

/// Sende-Seite des Relays
///
/// `send` ist fire-and-forget: es reiht den Frame ein und wartet nicht
/// auf Zustellung.
pub trait RelayTransport: Send + Sync {
    fn send(&self, event: &str, payload: Value) -> Result<(), SignalingError>;
}

/// Frame wie er über die Leitung geht
#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    data: Value,
    timestamp: i64,
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
}

// ============================================================================
// RELAY CLIENT
// ============================================================================

/// WebSocket Client für den Relay-Server
pub struct RelayClient {
    server_url: String,
    state: Arc<RwLock<ClientState>>,
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<RelayMessage>,
}

impl RelayClient {
    /// Erstellt einen neuen RelayClient
    pub fn new(server_url: String, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            server_url,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: None,
            event_tx,
        }
    }

    /// Gibt einen Receiver für eingehende Frames zurück
    pub fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.event_tx.subscribe()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Relay-Server
    pub async fn connect(&mut self) -> Result<(), SignalingError> {
        tracing::info!("Connecting to relay server: {}", self.server_url);

        let (ws_stream, _) = connect_async(self.server_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(100);
        self.tx = Some(tx);
        self.state.write().is_connected = true;

        // Read-Task
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Some(message) = Self::decode_frame(&text) {
                            // Keine Subscriber ist kein Fehler
                            let _ = event_tx.send(message);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state.write().is_connected = false;
            tracing::info!("Relay read task finished");
        });

        // Write-Task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        Ok(())
    }

    /// Startet einen Heartbeat-Task
    pub fn start_heartbeat(self: Arc<Self>, period: Duration) {
        let client = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !client.is_connected() {
                    tracing::info!("Heartbeat: client disconnected, stopping heartbeat task");
                    break;
                }
                if let Err(e) = client.send(PING_EVENT, Value::Null) {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        });
    }

    fn encode_frame(event: &str, data: Value) -> Result<String, SignalingError> {
        let frame = OutboundFrame {
            event,
            data,
            timestamp: Utc::now().timestamp_millis(),
        };
        serde_json::to_string(&frame).map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn decode_frame(text: &str) -> Option<RelayMessage> {
        match serde_json::from_str::<RelayMessage>(text) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Dropping undecodable relay frame: {}", e);
                None
            }
        }
    }
}

impl RelayTransport for RelayClient {
    fn send(&self, event: &str, payload: Value) -> Result<(), SignalingError> {
        let tx = self.tx.as_ref().ok_or(SignalingError::NotConnected)?;
        let frame = Self::encode_frame(event, payload)?;

        // try_send ist non-blocking
        tx.try_send(frame)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
