//! WebRTC Backend
//!
//! `PeerTransport` auf Basis von `webrtc-rs`. Die Callbacks der
//! RTCPeerConnection werden in `PeerEvent`s übersetzt.

use super::media::MediaKind;
use super::platform::{
    ConnectionState, NegotiationError, PeerEvent, PeerEventSink, PeerTransport,
    PeerTransportFactory, RemoteTrack,
};
use crate::config::IceServer;
use crate::signaling::{NetworkCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt RTCPeerConnections mit Default-Codecs und -Interceptors
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        // Media Engine mit Opus/VP8 konfigurieren
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NegotiationError::TransportCreation(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| NegotiationError::TransportCreation(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| NegotiationError::TransportCreation(e.to_string()))?,
        );

        install_handlers(&pc, events);
        tracing::debug!("Peer connection created");

        Ok(Arc::new(WebRtcTransport { pc }))
    }
}

/// Registriert die Callbacks der Peer Connection
fn install_handlers(pc: &RTCPeerConnection, events: PeerEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // `None` markiert das Ende der Candidate-Sammlung
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => sink.emit(PeerEvent::LocalCandidate(NetworkCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                })),
                Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_track(Box::new(move |track, _, _| {
        let kind = match track.kind() {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        };
        sink.emit(PeerEvent::RemoteTrack(
            RemoteTrack::new(track.id(), track.stream_id(), kind).with_rtp(track),
        ));
        Box::pin(async {})
    }));

    let sink = events;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let state = match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        };
        sink.emit(PeerEvent::ConnectionState(state));
        Box::pin(async {})
    }));
}

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    fn to_rtc(
        description: SessionDescription,
    ) -> Result<RTCSessionDescription, NegotiationError> {
        match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))
    }

    fn from_rtc(
        description: RTCSessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        match description.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
            other => Err(NegotiationError::InvalidSdp(format!(
                "unexpected description type {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), NegotiationError> {
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;

        // RTCP muss gelesen werden, sonst laufen die Interceptors nicht
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::WebRTC(e.to_string()))?;
        Self::from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::WebRTC(e.to_string()))?;
        Self::from_rtc(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_local_description(Self::to_rtc(description)?)
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(Self::to_rtc(description)?)
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: NetworkCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::Candidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::WebRTC(e.to_string()))
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("state", &self.pc.connection_state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
