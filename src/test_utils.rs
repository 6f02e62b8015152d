//! Test-Doubles für Relay, Geräte und Peer Connections
//!
//! Alle Doubles schreiben in ein gemeinsames `CallLog`, damit Tests die
//! Reihenfolge der Plattform-Aufrufe prüfen können.

use crate::call_engine::{
    CallController, CallEvent, CaptureSource, LocalMedia, LocalTrack, MediaAcquisitionError,
    MediaConstraints, MediaDevices, MediaKind, MediaSession, NegotiationError, PeerEventSink,
    PeerTransport, PeerTransportFactory,
};
use crate::config::{CallConfig, IceServer};
use crate::signaling::{
    NetworkCandidate, RelayTransport, SessionDescription, SignalDispatcher, SignalingError,
    SIGNAL_EVENT,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Notify};
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// CALL LOG
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// ============================================================================
// RELAY
// ============================================================================

/// Zeichnet alle gesendeten Frames auf
#[derive(Debug, Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingRelay {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    /// Nur die `call:signal` Envelopes
    pub fn signals(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(event, _)| event == SIGNAL_EVENT)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl RelayTransport for RecordingRelay {
    fn send(&self, event: &str, payload: Value) -> Result<(), SignalingError> {
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }
}

// ============================================================================
// DEVICES
// ============================================================================

struct LoggedSource {
    kind: MediaKind,
    log: CallLog,
}

impl CaptureSource for LoggedSource {
    fn stop(&mut self) {
        self.log.push(format!("stop:{}", self.kind));
    }
}

/// Geräte, die beim nächsten `open` optional fehlschlagen oder hängen
pub struct ScriptedDevices {
    log: CallLog,
    failure: Mutex<Option<MediaAcquisitionError>>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedDevices {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failure: Mutex::new(None),
            hold: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, error: MediaAcquisitionError) {
        *self.failure.lock() = Some(error);
    }

    /// Das nächste `open` wartet, bis der zurückgegebene Notify auslöst
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl MediaDevices for ScriptedDevices {
    async fn open(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMedia, MediaAcquisitionError> {
        self.log.push("acquire");
        let gate = self.hold.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }

        let mut media = LocalMedia::new("local");
        for kind in constraints.kinds() {
            let source = LoggedSource {
                kind,
                log: self.log.clone(),
            };
            media.push(LocalTrack::new(kind, "local", Some(Box::new(source))));
        }
        Ok(media)
    }
}

// ============================================================================
// PEER TRANSPORT
// ============================================================================

/// Peer Connection, die jeden Aufruf als `<op>#<n>` protokolliert
///
/// Eine Remote Description mit SDP `bad` schlägt fehl.
pub struct RecordingTransport {
    n: usize,
    log: CallLog,
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    async fn add_track(
        &self,
        _track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), NegotiationError> {
        self.log.push(format!("add_track#{}", self.n));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.log.push(format!("create_offer#{}", self.n));
        Ok(SessionDescription::offer(format!("v=0 offer {}", self.n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.log.push(format!("create_answer#{}", self.n));
        Ok(SessionDescription::answer(format!("v=0 answer {}", self.n)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.log
            .push(format!("set_local#{}:{}", self.n, description.kind));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if description.sdp == "bad" {
            return Err(NegotiationError::Description("bad".to_string()));
        }
        self.log.push(format!(
            "set_remote#{}:{}:{}",
            self.n, description.kind, description.sdp
        ));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: NetworkCandidate) -> Result<(), NegotiationError> {
        self.log
            .push(format!("candidate#{}:{}", self.n, candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.log.push(format!("close#{}", self.n));
        Ok(())
    }
}

pub struct RecordingTransportFactory {
    log: CallLog,
    sinks: Mutex<Vec<PeerEventSink>>,
    fail_create: Mutex<bool>,
}

impl RecordingTransportFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            sinks: Mutex::new(Vec::new()),
            fail_create: Mutex::new(false),
        }
    }

    pub fn fail_next_create(&self) {
        *self.fail_create.lock() = true;
    }

    /// Event-Sink der n-ten erzeugten Connection (ab 1)
    pub fn sink(&self, n: usize) -> PeerEventSink {
        self.sinks.lock()[n - 1].clone()
    }

    pub fn created(&self) -> usize {
        self.sinks.lock().len()
    }
}

#[async_trait]
impl PeerTransportFactory for RecordingTransportFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        if std::mem::take(&mut *self.fail_create.lock()) {
            return Err(NegotiationError::TransportCreation("scripted".to_string()));
        }

        let n = {
            let mut sinks = self.sinks.lock();
            sinks.push(events);
            sinks.len()
        };
        self.log.push(format!("create#{}", n));

        Ok(Arc::new(RecordingTransport {
            n,
            log: self.log.clone(),
        }))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub config: CallConfig,
    pub log: CallLog,
    pub relay: Arc<RecordingRelay>,
    pub devices: Arc<ScriptedDevices>,
    pub transports: Arc<RecordingTransportFactory>,
    pub events: broadcast::Sender<CallEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        let (events, _) = broadcast::channel(64);

        Self {
            config: CallConfig::default(),
            relay: Arc::new(RecordingRelay::default()),
            devices: Arc::new(ScriptedDevices::new(log.clone())),
            transports: Arc::new(RecordingTransportFactory::new(log.clone())),
            log,
            events,
        }
    }

    /// MediaSession ohne Controller; Peer-Events laufen ins Leere
    pub fn media_session(&self) -> MediaSession {
        let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
        MediaSession::new(
            &self.config,
            SignalDispatcher::new(self.relay.clone()),
            self.devices.clone(),
            self.transports.clone(),
            peer_tx,
            self.events.clone(),
        )
    }

    pub fn controller(&self) -> CallController {
        CallController::new(
            &self.config,
            self.relay.clone(),
            self.devices.clone(),
            self.transports.clone(),
        )
    }
}
