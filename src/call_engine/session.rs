//! Media Session
//!
//! Besitzt die aktive Call-Session: lokaler Capture-Stream, Peer Connection
//! und den Verhandlungszustand. Führt initiate/accept/receive_signal/teardown
//! aus; die Phasen verwaltet der `CallController`.
//!
//! Der Aufbau einer Session ist zweigeteilt: `prepare` liefert ein
//! eigenständiges Future, `install` übernimmt dessen Ergebnis. Dazwischen
//! kann der Controller den Aufbau abbrechen.

use super::controller::{CallError, CallEvent};
use super::media::{LocalMedia, MediaConstraints, MediaDevices};
use super::platform::{
    ConnectionState, NegotiationError, PeerEvent, PeerEventSink, PeerTransport,
    PeerTransportFactory, RemoteMedia, TaggedPeerEvent,
};
use crate::config::{CallConfig, IceServer};
use crate::signaling::{
    classify, ClassifiedSignal, ConversationId, NetworkCandidate, SdpKind, SessionDescription,
    SignalDispatcher, SignalMessage, UserId,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// CALL SESSION
// ============================================================================

/// Wer das erste Offer erzeugt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Die eine aktive Call-Session
///
/// Transport und lokale Medien existieren nur gemeinsam.
pub struct CallSession {
    generation: u64,
    conversation_id: ConversationId,
    peer_id: UserId,
    role: CallRole,
    transport: Arc<dyn PeerTransport>,
    local_media: LocalMedia,
    remote_media: Option<RemoteMedia>,
    remote_description_set: bool,
    pending_candidates: VecDeque<NetworkCandidate>,
}

impl CallSession {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn peer_id(&self) -> UserId {
        self.peer_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn local_media(&self) -> &LocalMedia {
        &self.local_media
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote_media.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("generation", &self.generation)
            .field("conversation_id", &self.conversation_id)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

/// Geöffnete Geräte plus Peer Connection, noch keiner Session zugeordnet
pub struct PreparedSession {
    generation: u64,
    local_media: LocalMedia,
    transport: Arc<dyn PeerTransport>,
}

impl PreparedSession {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stoppt die Capture-Tracks und schließt die Peer Connection
    pub async fn discard(mut self) {
        self.local_media.stop_all();
        if let Err(e) = self.transport.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}

impl std::fmt::Debug for PreparedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedSession")
            .field("generation", &self.generation)
            .field("tracks", &self.local_media.tracks().len())
            .finish()
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Warum ein Signal verworfen wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoSession,
    ConversationMismatch,
    Unrecognized,
}

/// Ergebnis von `receive_signal`
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Ignored(DropReason),
    /// Candidate vor der Remote Description, wird nachgereicht
    Queued,
    CandidateApplied,
    DescriptionApplied(SdpKind),
    Failed(NegotiationError),
}

/// Ergebnis eines Peer-Callbacks
#[derive(Debug, Clone)]
pub enum PeerEventOutcome {
    Stale,
    CandidateSent,
    RemoteMedia(RemoteMedia),
    Connection(ConnectionState),
}

// ============================================================================
// MEDIA SESSION
// ============================================================================

pub struct MediaSession {
    devices: Arc<dyn MediaDevices>,
    transports: Arc<dyn PeerTransportFactory>,
    dispatcher: SignalDispatcher,
    ice_servers: Vec<IceServer>,
    constraints: MediaConstraints,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    event_tx: broadcast::Sender<CallEvent>,
    generation: u64,
    active: Option<CallSession>,
}

impl MediaSession {
    pub fn new(
        config: &CallConfig,
        dispatcher: SignalDispatcher,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn PeerTransportFactory>,
        peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            devices,
            transports,
            dispatcher,
            ice_servers: config.ice_servers.clone(),
            constraints: config.media,
            peer_tx,
            event_tx,
            generation: 0,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&CallSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Startet einen ausgehenden Anruf und sendet das Offer
    ///
    /// Nur ein Fehler beim Öffnen der Geräte oder beim Aufbau der Peer
    /// Connection wird zurückgegeben; Fehler beim Offer werden geloggt.
    pub async fn initiate(
        &mut self,
        callee_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        let setup = self.prepare().await;
        let prepared = setup.await?;
        self.install(prepared, callee_id, conversation_id, CallRole::Caller)
            .await;
        self.send_offer().await;
        Ok(())
    }

    /// Bereitet die Session für einen eingehenden Anruf vor
    ///
    /// Das Answer entsteht erst, wenn das Offer über `receive_signal` ankommt.
    pub async fn accept(
        &mut self,
        caller_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        let setup = self.prepare().await;
        let prepared = setup.await?;
        self.install(prepared, caller_id, conversation_id, CallRole::Callee)
            .await;
        Ok(())
    }

    /// Beendet die aktive Session und gibt den Aufbau der nächsten zurück
    ///
    /// Das Future öffnet die Geräte, erzeugt die Peer Connection und hängt
    /// die lokalen Tracks an. Es hält keine Referenz auf die `MediaSession`
    /// und kann daher in einem eigenen Task laufen. Schlägt ein Schritt
    /// fehl, ist alles bereits Geöffnete wieder freigegeben.
    pub async fn prepare(&mut self) -> BoxFuture<'static, Result<PreparedSession, CallError>> {
        self.teardown().await;

        self.generation += 1;
        let generation = self.generation;

        let devices = Arc::clone(&self.devices);
        let transports = Arc::clone(&self.transports);
        let ice_servers = self.ice_servers.clone();
        let constraints = self.constraints;
        let sink = PeerEventSink::new(generation, self.peer_tx.clone());

        async move {
            let mut local_media = devices.open(&constraints).await?;

            let transport = match transports.create(&ice_servers, sink).await {
                Ok(transport) => transport,
                Err(e) => {
                    local_media.stop_all();
                    return Err(e.into());
                }
            };

            let tracks: Vec<_> = local_media.tracks().iter().map(|t| t.rtp_track()).collect();
            for track in tracks {
                if let Err(e) = transport.add_track(track).await {
                    local_media.stop_all();
                    if let Err(close_err) = transport.close().await {
                        tracing::warn!("Failed to close peer connection: {}", close_err);
                    }
                    return Err(e.into());
                }
            }

            Ok(PreparedSession {
                generation,
                local_media,
                transport,
            })
        }
        .boxed()
    }

    /// Übernimmt einen fertigen Aufbau als aktive Session
    ///
    /// Ein Aufbau aus einer älteren Generation wird verworfen; dann ist
    /// das Ergebnis `false`.
    pub async fn install(
        &mut self,
        prepared: PreparedSession,
        peer_id: UserId,
        conversation_id: ConversationId,
        role: CallRole,
    ) -> bool {
        if prepared.generation != self.generation || self.active.is_some() {
            tracing::info!("Discarding outdated call setup {}", prepared.generation);
            prepared.discard().await;
            return false;
        }

        let PreparedSession {
            generation,
            local_media,
            transport,
        } = prepared;

        let _ = self
            .event_tx
            .send(CallEvent::LocalMedia(local_media.info()));

        tracing::info!(
            "Call session {} started as {:?} with {} (conversation {})",
            generation,
            role,
            peer_id,
            conversation_id
        );

        self.active = Some(CallSession {
            generation,
            conversation_id,
            peer_id,
            role,
            transport,
            local_media,
            remote_media: None,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
        });
        true
    }

    /// Erzeugt das Offer der aktiven Session und sendet es an die Gegenseite
    pub async fn send_offer(&mut self) {
        let Some(session) = self.active.as_ref() else {
            return;
        };
        let transport = Arc::clone(&session.transport);
        let peer_id = session.peer_id;
        let conversation_id = session.conversation_id;

        let offer = match Self::create_local(transport.as_ref(), SdpKind::Offer).await {
            Ok(offer) => offer,
            Err(e) => {
                self.report(&e);
                return;
            }
        };

        tracing::info!(
            "Sending offer to {} (conversation {})",
            peer_id,
            conversation_id
        );
        if let Err(e) = self.dispatcher.send_signal(
            peer_id,
            conversation_id,
            SignalMessage::SessionDescription(offer),
        ) {
            tracing::error!("Failed to send offer: {}", e);
            self.report(&e);
        }
    }

    /// Verarbeitet ein eingehendes Signal der Gegenseite
    pub async fn receive_signal(
        &mut self,
        from_id: UserId,
        conversation_id: ConversationId,
        payload: &Value,
    ) -> SignalOutcome {
        match self.active.as_ref() {
            None => {
                tracing::debug!("Dropping signal from {}: no active call", from_id);
                return SignalOutcome::Ignored(DropReason::NoSession);
            }
            Some(session) if session.conversation_id != conversation_id => {
                tracing::debug!(
                    "Dropping signal for conversation {} (active: {})",
                    conversation_id,
                    session.conversation_id
                );
                return SignalOutcome::Ignored(DropReason::ConversationMismatch);
            }
            Some(_) => {}
        }

        match classify(payload) {
            ClassifiedSignal::SessionDescription(description) => {
                self.apply_description(from_id, description).await
            }
            ClassifiedSignal::NetworkCandidate(candidate) => self.apply_candidate(candidate).await,
            ClassifiedSignal::Unrecognized => {
                tracing::debug!("Dropping unrecognized signal from {}", from_id);
                SignalOutcome::Ignored(DropReason::Unrecognized)
            }
        }
    }

    /// Verarbeitet einen Callback der Peer Connection
    ///
    /// Events einer älteren Generation stammen von einer bereits beendeten
    /// Session und werden ignoriert.
    pub fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) -> PeerEventOutcome {
        let Some(session) = self
            .active
            .as_mut()
            .filter(|s| s.generation == tagged.generation)
        else {
            tracing::debug!(
                "Ignoring peer event from stale session {}",
                tagged.generation
            );
            return PeerEventOutcome::Stale;
        };

        match tagged.event {
            PeerEvent::LocalCandidate(candidate) => {
                tracing::debug!("Sending ICE candidate to {}", session.peer_id);
                if let Err(e) = self.dispatcher.send_signal(
                    session.peer_id,
                    session.conversation_id,
                    SignalMessage::NetworkCandidate(candidate),
                ) {
                    tracing::error!("Failed to send ICE candidate: {}", e);
                }
                PeerEventOutcome::CandidateSent
            }
            PeerEvent::RemoteTrack(track) => {
                tracing::info!("Received remote {} track {}", track.kind, track.id);
                let media = session.remote_media.get_or_insert_with(RemoteMedia::default);
                media.attach(track);
                PeerEventOutcome::RemoteMedia(media.clone())
            }
            PeerEvent::ConnectionState(state) => {
                tracing::info!("Peer connection state: {:?}", state);
                PeerEventOutcome::Connection(state)
            }
        }
    }

    /// Beendet die aktive Session (idempotent)
    ///
    /// Gibt `true` zurück, wenn eine Session beendet wurde.
    pub async fn teardown(&mut self) -> bool {
        let Some(mut session) = self.active.take() else {
            return false;
        };

        session.local_media.stop_all();
        if let Err(e) = session.transport.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }

        tracing::info!(
            "Call session {} torn down (conversation {})",
            session.generation,
            session.conversation_id
        );
        true
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn apply_description(
        &mut self,
        from_id: UserId,
        description: SessionDescription,
    ) -> SignalOutcome {
        let Some(session) = self.active.as_ref() else {
            return SignalOutcome::Ignored(DropReason::NoSession);
        };
        let transport = Arc::clone(&session.transport);
        let conversation_id = session.conversation_id;
        let kind = description.kind;

        tracing::info!("Applying remote {} from {}", kind, from_id);
        if let Err(e) = transport.set_remote_description(description).await {
            self.report(&e);
            return SignalOutcome::Failed(e);
        }

        // Candidates, die vor der Remote Description kamen, in Reihenfolge nachreichen
        let pending = match self.active.as_mut() {
            Some(session) => {
                session.remote_description_set = true;
                std::mem::take(&mut session.pending_candidates)
            }
            None => VecDeque::new(),
        };
        if !pending.is_empty() {
            tracing::debug!("Applying {} queued ICE candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                self.report(&e);
            }
        }

        if kind == SdpKind::Offer {
            let answer = match Self::create_local(transport.as_ref(), SdpKind::Answer).await {
                Ok(answer) => answer,
                Err(e) => {
                    self.report(&e);
                    return SignalOutcome::Failed(e);
                }
            };

            tracing::info!("Sending answer to {}", from_id);
            if let Err(e) = self.dispatcher.send_signal(
                from_id,
                conversation_id,
                SignalMessage::SessionDescription(answer),
            ) {
                tracing::error!("Failed to send answer: {}", e);
                self.report(&e);
            }
        }

        SignalOutcome::DescriptionApplied(kind)
    }

    async fn apply_candidate(&mut self, candidate: NetworkCandidate) -> SignalOutcome {
        let Some(session) = self.active.as_mut() else {
            return SignalOutcome::Ignored(DropReason::NoSession);
        };

        if !session.remote_description_set {
            tracing::debug!("Remote description not set yet, queuing candidate");
            session.pending_candidates.push_back(candidate);
            return SignalOutcome::Queued;
        }

        let transport = Arc::clone(&session.transport);
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => SignalOutcome::CandidateApplied,
            Err(e) => {
                self.report(&e);
                SignalOutcome::Failed(e)
            }
        }
    }

    /// Erzeugt Offer oder Answer und setzt es als Local Description
    async fn create_local(
        transport: &dyn PeerTransport,
        kind: SdpKind,
    ) -> Result<SessionDescription, NegotiationError> {
        let description = match kind {
            SdpKind::Offer => transport.create_offer().await?,
            SdpKind::Answer => transport.create_answer().await?,
        };
        transport.set_local_description(description.clone()).await?;
        Ok(description)
    }

    /// Loggt einen Verhandlungsfehler und meldet ihn der UI; die Phase bleibt
    fn report(&self, error: &dyn std::fmt::Display) {
        tracing::warn!("Negotiation error: {}", error);
        let _ = self.event_tx.send(CallEvent::Error(error.to_string()));
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("generation", &self.generation)
            .field("active", &self.active)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::{MediaAcquisitionError, MediaKind};
    use crate::signaling::SIGNAL_EVENT;
    use crate::test_utils::Harness;
    use serde_json::json;

    #[tokio::test]
    async fn test_initiate_sends_single_offer() {
        let h = Harness::new();
        let mut session = h.media_session();

        session.initiate(UserId(2), ConversationId(7)).await.unwrap();

        let sent = h.relay.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SIGNAL_EVENT);
        assert_eq!(sent[0].1["targetUserId"], 2);
        assert_eq!(sent[0].1["conversationId"], 7);
        assert_eq!(sent[0].1["data"]["type"], "offer");

        let active = session.active().unwrap();
        assert_eq!(active.role(), CallRole::Caller);
        assert_eq!(active.local_media().tracks().len(), 2);
        assert!(active.local_media().tracks().iter().all(|t| t.is_live()));
        assert_eq!(
            h.log.entries(),
            vec![
                "acquire",
                "create#1",
                "add_track#1",
                "add_track#1",
                "create_offer#1",
                "set_local#1:offer",
            ]
        );
    }

    #[tokio::test]
    async fn test_acquisition_failure_leaves_no_state() {
        let h = Harness::new();
        h.devices
            .fail_next(MediaAcquisitionError::PermissionDenied(MediaKind::Video));
        let mut session = h.media_session();

        let err = session.initiate(UserId(2), ConversationId(7)).await.unwrap_err();

        assert!(matches!(err, CallError::MediaAcquisition(_)));
        assert!(!session.is_active());
        assert!(h.relay.sent().is_empty());
        assert_eq!(h.log.entries(), vec!["acquire"]);
    }

    #[tokio::test]
    async fn test_transport_failure_releases_media() {
        let h = Harness::new();
        h.transports.fail_next_create();
        let mut session = h.media_session();

        let err = session.accept(UserId(1), ConversationId(7)).await.unwrap_err();

        assert!(matches!(err, CallError::Negotiation(_)));
        assert!(!session.is_active());
        assert_eq!(h.log.entries(), vec!["acquire", "stop:audio", "stop:video"]);
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued_then_flushed_in_order() {
        let h = Harness::new();
        let mut session = h.media_session();
        session.accept(UserId(1), ConversationId(7)).await.unwrap();
        h.log.clear();

        let a = session
            .receive_signal(UserId(1), ConversationId(7), &json!({ "candidate": "A" }))
            .await;
        let b = session
            .receive_signal(UserId(1), ConversationId(7), &json!({ "candidate": "B" }))
            .await;
        assert!(matches!(a, SignalOutcome::Queued));
        assert!(matches!(b, SignalOutcome::Queued));
        assert_eq!(session.active().unwrap().pending_candidates(), 2);
        assert!(h.log.entries().is_empty());

        let d = session
            .receive_signal(
                UserId(1),
                ConversationId(7),
                &json!({ "type": "offer", "sdp": "D" }),
            )
            .await;
        assert!(matches!(d, SignalOutcome::DescriptionApplied(SdpKind::Offer)));

        assert_eq!(
            h.log.entries(),
            vec![
                "set_remote#1:offer:D",
                "candidate#1:A",
                "candidate#1:B",
                "create_answer#1",
                "set_local#1:answer",
            ]
        );
        assert_eq!(session.active().unwrap().pending_candidates(), 0);

        let c = session
            .receive_signal(UserId(1), ConversationId(7), &json!({ "candidate": "C" }))
            .await;
        assert!(matches!(c, SignalOutcome::CandidateApplied));
    }

    #[tokio::test]
    async fn test_answer_is_applied_without_reply() {
        let h = Harness::new();
        let mut session = h.media_session();
        session.initiate(UserId(2), ConversationId(7)).await.unwrap();
        h.relay.clear();

        let outcome = session
            .receive_signal(
                UserId(2),
                ConversationId(7),
                &json!({ "type": "answer", "sdp": "v=0 answer" }),
            )
            .await;

        assert!(matches!(
            outcome,
            SignalOutcome::DescriptionApplied(SdpKind::Answer)
        ));
        assert!(h.relay.sent().is_empty());
        assert!(session.active().unwrap().has_remote_description());
    }

    #[tokio::test]
    async fn test_signals_without_matching_session_are_dropped() {
        let h = Harness::new();
        let mut session = h.media_session();

        let outcome = session
            .receive_signal(UserId(1), ConversationId(7), &json!({ "candidate": "A" }))
            .await;
        assert!(matches!(
            outcome,
            SignalOutcome::Ignored(DropReason::NoSession)
        ));

        session.accept(UserId(1), ConversationId(7)).await.unwrap();
        h.log.clear();

        let outcome = session
            .receive_signal(
                UserId(1),
                ConversationId(9),
                &json!({ "type": "offer", "sdp": "v=0" }),
            )
            .await;
        assert!(matches!(
            outcome,
            SignalOutcome::Ignored(DropReason::ConversationMismatch)
        ));

        let outcome = session
            .receive_signal(UserId(1), ConversationId(7), &json!({ "foo": 1 }))
            .await;
        assert!(matches!(
            outcome,
            SignalOutcome::Ignored(DropReason::Unrecognized)
        ));

        assert!(h.log.entries().is_empty());
        assert!(h.relay.sent().is_empty());
        assert_eq!(session.active().unwrap().pending_candidates(), 0);
    }

    #[tokio::test]
    async fn test_negotiation_failure_keeps_session() {
        let h = Harness::new();
        let mut session = h.media_session();
        let mut events = h.events.subscribe();
        session.accept(UserId(1), ConversationId(7)).await.unwrap();

        let outcome = session
            .receive_signal(
                UserId(1),
                ConversationId(7),
                &json!({ "type": "offer", "sdp": "bad" }),
            )
            .await;

        assert!(matches!(
            outcome,
            SignalOutcome::Failed(NegotiationError::Description(_))
        ));
        assert!(session.is_active());
        assert!(!session.active().unwrap().has_remote_description());
        assert!(h.relay.sent().is_empty());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CallEvent::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let h = Harness::new();
        let mut session = h.media_session();
        session.initiate(UserId(2), ConversationId(7)).await.unwrap();
        h.log.clear();

        assert!(session.teardown().await);
        assert!(!session.teardown().await);

        assert!(!session.is_active());
        assert_eq!(h.log.entries(), vec!["stop:audio", "stop:video", "close#1"]);
    }

    #[tokio::test]
    async fn test_reinitiate_tears_down_before_acquiring() {
        let h = Harness::new();
        let mut session = h.media_session();
        session.initiate(UserId(2), ConversationId(7)).await.unwrap();
        h.log.clear();

        session.initiate(UserId(3), ConversationId(8)).await.unwrap();

        let entries = h.log.entries();
        let close = entries.iter().position(|e| e == "close#1").unwrap();
        let stop = entries.iter().position(|e| e == "stop:video").unwrap();
        let acquire = entries.iter().position(|e| e == "acquire").unwrap();
        assert!(close < acquire);
        assert!(stop < acquire);
        assert_eq!(session.active().unwrap().conversation_id(), ConversationId(8));
        assert_eq!(session.active().unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn test_outdated_setup_is_discarded() {
        let h = Harness::new();
        let mut session = h.media_session();

        let first = session.prepare().await;
        let _second = session.prepare().await;
        assert_eq!(session.generation(), 2);

        let prepared = first.await.unwrap();
        assert_eq!(prepared.generation(), 1);
        h.log.clear();

        let installed = session
            .install(prepared, UserId(2), ConversationId(7), CallRole::Caller)
            .await;

        assert!(!installed);
        assert!(!session.is_active());
        assert_eq!(h.log.entries(), vec!["stop:audio", "stop:video", "close#1"]);
        assert!(h.relay.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stale_peer_events_are_ignored() {
        let h = Harness::new();
        let mut session = h.media_session();
        session.initiate(UserId(2), ConversationId(7)).await.unwrap();
        let old_sink = h.transports.sink(1);
        session.initiate(UserId(2), ConversationId(8)).await.unwrap();
        h.relay.clear();

        let outcome = session.handle_peer_event(TaggedPeerEvent {
            generation: old_sink.generation(),
            event: PeerEvent::LocalCandidate(NetworkCandidate::new("stale")),
        });
        assert!(matches!(outcome, PeerEventOutcome::Stale));
        assert!(h.relay.sent().is_empty());

        let outcome = session.handle_peer_event(TaggedPeerEvent {
            generation: 2,
            event: PeerEvent::LocalCandidate(NetworkCandidate::new("fresh")),
        });
        assert!(matches!(outcome, PeerEventOutcome::CandidateSent));
        let sent = h.relay.sent();
        assert_eq!(sent[0].1["conversationId"], 8);
        assert_eq!(sent[0].1["data"]["candidate"], "fresh");
    }
}
