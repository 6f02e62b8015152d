//! Plattform-Schnittstellen der Call Engine
//!
//! Die Session arbeitet nur gegen diese Traits. Callbacks der Peer
//! Connection (ICE Candidates, Remote Tracks, Verbindungsstatus) laufen
//! über einen Kanal, jedes Event mit der Generation der Session markiert,
//! die die Connection erzeugt hat.

use super::media::MediaKind;
use crate::config::IceServer;
use crate::signaling::{NetworkCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum NegotiationError {
    #[error("Failed to create peer connection: {0}")]
    TransportCreation(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Failed to apply session description: {0}")]
    Description(String),

    #[error("Failed to add ICE candidate: {0}")]
    Candidate(String),

    #[error("Failed to attach local track: {0}")]
    Track(String),

    #[error("WebRTC error: {0}")]
    WebRTC(String),
}

// ============================================================================
// PEER EVENTS
// ============================================================================

/// Verbindungsstatus der Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Eingehender Track der Gegenseite (nur zum Rendern, nicht im Besitz der Session)
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            rtp: None,
        }
    }

    pub fn with_rtp(mut self, track: Arc<TrackRemote>) -> Self {
        self.rtp = Some(track);
        self
    }

    /// RTP-Track zum Lesen der Pakete (nur beim WebRTC-Backend vorhanden)
    pub fn rtp(&self) -> Option<&Arc<TrackRemote>> {
        self.rtp.as_ref()
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Remote Stream, wie er gerendert wird
#[derive(Debug, Clone, Default)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    /// Hängt einen Track an; ein Track aus einem anderen Stream ersetzt den Stream
    pub fn attach(&mut self, track: RemoteTrack) {
        if self.stream_id != track.stream_id {
            self.stream_id = track.stream_id.clone();
            self.tracks.clear();
        }
        self.tracks.retain(|t| t.id != track.id);
        self.tracks.push(track);
    }
}

/// Callbacks der Peer Connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(NetworkCandidate),
    RemoteTrack(RemoteTrack),
    ConnectionState(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub generation: u64,
    pub event: PeerEvent,
}

/// Sender, den eine Peer Connection für ihre Callbacks bekommt
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        let tagged = TaggedPeerEvent {
            generation: self.generation,
            event,
        };
        if self.tx.send(tagged).is_err() {
            tracing::trace!("Call controller gone, dropping peer event");
        }
    }
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Eine Peer-to-Peer Verbindung (RTCPeerConnection)
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: NetworkCandidate) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Erzeugt Peer Connections; die Callbacks gehen an `events`
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_media_replaces_stream() {
        let mut media = RemoteMedia::default();
        media.attach(RemoteTrack::new("a1", "s1", MediaKind::Audio));
        media.attach(RemoteTrack::new("v1", "s1", MediaKind::Video));
        assert_eq!(media.tracks.len(), 2);

        media.attach(RemoteTrack::new("v1", "s1", MediaKind::Video));
        assert_eq!(media.tracks.len(), 2);

        media.attach(RemoteTrack::new("a2", "s2", MediaKind::Audio));
        assert_eq!(media.stream_id, "s2");
        assert_eq!(media.tracks.len(), 1);
    }

    #[test]
    fn test_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(3, tx);

        sink.emit(PeerEvent::ConnectionState(ConnectionState::Connected));

        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.generation, 3);
        assert!(matches!(
            tagged.event,
            PeerEvent::ConnectionState(ConnectionState::Connected)
        ));
    }
}
