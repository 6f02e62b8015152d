//! Call Engine Module - Sessions, Medien und Phasen
//!
//! Dieses Modul verwaltet:
//! - Lokale Capture-Tracks (Audio/Video)
//! - Die aktive Call-Session und ihre Peer Connection
//! - Den Phasen-Automaten des Anrufs
//! - Das WebRTC-Backend

mod controller;
mod media;
mod platform;
mod session;
mod webrtc_peer;

pub use controller::{
    CallCommand, CallController, CallError, CallEvent, CallHandle, CallPhase, BUSY_REASON,
};
pub use media::{
    CaptureSource, ExternalSampleDevices, LocalMedia, LocalStreamInfo, LocalTrack,
    MediaAcquisitionError, MediaConstraints, MediaDevices, MediaKind, TrackInfo,
    AUDIO_CLOCK_RATE, VIDEO_CLOCK_RATE,
};
pub use platform::{
    ConnectionState, NegotiationError, PeerEvent, PeerEventSink, PeerTransport,
    PeerTransportFactory, RemoteMedia, RemoteTrack, TaggedPeerEvent,
};
pub use session::{
    CallRole, CallSession, DropReason, MediaSession, PeerEventOutcome, PreparedSession,
    SignalOutcome,
};
pub use webrtc_peer::{WebRtcTransport, WebRtcTransportFactory};
