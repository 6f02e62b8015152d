//! Peer Call - P2P Audio/Video-Anrufe in Chat-Konversationen
//!
//! Anrufe werden über den bestehenden Chat-Relay ausgehandelt:
//! - WebSocket-Relay für Offer/Answer/ICE und Call-Benachrichtigungen
//! - WebRTC für die eigentlichen Medienströme
//! - Ein Controller-Task pro Client, gesteuert über einen `CallHandle`

pub mod call_engine;
pub mod config;
pub mod signaling;

#[cfg(test)]
mod test_utils;

use call_engine::{
    CallController, CallEvent, CallHandle, MediaDevices, PeerTransportFactory,
    WebRtcTransportFactory,
};
use config::{CallConfig, ConfigError};
use signaling::{RelayClient, RelayMessage, RelayTransport, SignalingError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging
///
/// `RUST_LOG` hat Vorrang; mehrfacher Aufruf ist unschädlich.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("peer_call=debug,webrtc=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

// ============================================================================
// CALL APP
// ============================================================================

/// Laufender Call-Client: Controller-Task plus Handle
pub struct CallApp {
    handle: CallHandle,
    event_tx: broadcast::Sender<CallEvent>,
    task: JoinHandle<()>,
}

impl CallApp {
    /// Startet den Controller-Task über einem beliebigen Relay
    pub fn spawn(
        config: &CallConfig,
        relay: Arc<dyn RelayTransport>,
        inbound: broadcast::Receiver<RelayMessage>,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn PeerTransportFactory>,
    ) -> Self {
        let controller = CallController::new(config, relay, devices, transports);
        let event_tx = controller.event_sender();

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(controller.run(rx, inbound));

        Self {
            handle: CallHandle::new(tx),
            event_tx,
            task,
        }
    }

    /// Verbindet mit dem Relay und startet den Controller mit WebRTC-Backend
    pub async fn connect(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self, AppError> {
        tracing::info!("Initializing call client...");

        let url = config.relay_url()?;
        let mut client = RelayClient::new(url.to_string(), config.event_capacity);
        let inbound = client.subscribe();
        client.connect().await?;

        let client = Arc::new(client);
        Arc::clone(&client).start_heartbeat(config.heartbeat_interval());

        tracing::info!("Connected to relay at {}", url);
        Ok(Self::spawn(
            &config,
            client,
            inbound,
            devices,
            Arc::new(WebRtcTransportFactory::new()),
        ))
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Gibt einen Event-Receiver für die Render-Schicht zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Legt einen laufenden Anruf auf und stoppt den Controller
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.hang_up().await {
            tracing::debug!("Controller already stopped: {}", e);
        }
        self.task.abort();
        tracing::info!("Call client shut down");
    }
}

impl std::fmt::Debug for CallApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallApp")
            .field("running", &!self.task.is_finished())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
