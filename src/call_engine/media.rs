//! Lokale Medien - Capture-Tracks und Geräte-Abstraktion
//!
//! Ein `LocalMedia` Stream gehört exklusiv zur aktiven Call-Session.
//! Jeder Track stoppt seine Capture-Quelle genau einmal, spätestens beim Drop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate für Opus
pub const AUDIO_CLOCK_RATE: u32 = 48000;

/// RTP Clock Rate für Video
pub const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAcquisitionError {
    #[error("Permission for {0} capture denied")]
    PermissionDenied(MediaKind),

    #[error("No {0} capture device found")]
    NoDevice(MediaKind),

    #[error("Neither audio nor video requested")]
    NothingRequested,

    #[error("Capture device error: {0}")]
    Device(String),
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Welche Geräte für einen Anruf geöffnet werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

/// Quelle eines Capture-Tracks (Mikrofon, Kamera, ...)
pub trait CaptureSource: Send + Sync {
    fn stop(&mut self);
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

/// Ein lokal aufgenommener Track
///
/// Die encodierten Samples werden von der Capture-Quelle in den
/// `TrackLocalStaticSample` geschrieben.
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    source: Option<Box<dyn CaptureSource>>,
    live: bool,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, stream_id: &str, source: Option<Box<dyn CaptureSource>>) -> Self {
        let codec = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: AUDIO_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            format!("{}-{}", kind, Uuid::new_v4()),
            stream_id.to_owned(),
        ));

        Self {
            kind,
            track,
            source,
            live: true,
        }
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Track, in den die Capture-Quelle Samples schreibt
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Track für die Peer Connection
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Stoppt die Capture-Quelle (idempotent)
    pub fn stop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        if let Some(source) = self.source.as_mut() {
            source.stop();
        }
        tracing::debug!("Stopped local {} track {}", self.kind, self.track.id());
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("live", &self.live)
            .finish()
    }
}

// ============================================================================
// LOCAL MEDIA
// ============================================================================

/// Beschreibung eines Tracks für die Render-Schicht
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: MediaKind,
}

/// Beschreibung des lokalen Streams für die Render-Schicht
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalStreamInfo {
    pub stream_id: String,
    pub tracks: Vec<TrackInfo>,
}

/// Lokaler Capture-Stream (Audio + Video)
#[derive(Debug)]
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn push(&mut self, track: LocalTrack) {
        self.tracks.push(track);
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Stoppt alle Tracks
    pub fn stop_all(&mut self) {
        for track in &mut self.tracks {
            track.stop();
        }
    }

    pub fn info(&self) -> LocalStreamInfo {
        LocalStreamInfo {
            stream_id: self.stream_id.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackInfo {
                    id: t.id().to_owned(),
                    kind: t.kind(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// DEVICES
// ============================================================================

/// Zugriff auf Capture-Geräte der Plattform
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Öffnet die angeforderten Geräte; schlägt fehl, wenn eines fehlt
    async fn open(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMedia, MediaAcquisitionError>;
}

/// Geräte, deren encodierte Samples die einbettende Anwendung liefert
///
/// `available` beschreibt, welche Quellen die Anwendung bereitstellt.
/// Die Anwendung schreibt über `LocalTrack::sample_track` in die Tracks.
#[derive(Debug, Clone)]
pub struct ExternalSampleDevices {
    available: MediaConstraints,
}

impl ExternalSampleDevices {
    pub fn new(available: MediaConstraints) -> Self {
        Self { available }
    }
}

#[async_trait]
impl MediaDevices for ExternalSampleDevices {
    async fn open(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMedia, MediaAcquisitionError> {
        let kinds = constraints.kinds();
        if kinds.is_empty() {
            return Err(MediaAcquisitionError::NothingRequested);
        }

        for kind in &kinds {
            let available = match kind {
                MediaKind::Audio => self.available.audio,
                MediaKind::Video => self.available.video,
            };
            if !available {
                return Err(MediaAcquisitionError::NoDevice(*kind));
            }
        }

        let mut media = LocalMedia::new(Uuid::new_v4().to_string());
        for kind in kinds {
            let track = LocalTrack::new(kind, &media.stream_id, None);
            media.push(track);
        }
        Ok(media)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CountingSource(Arc<Mutex<u32>>);

    impl CaptureSource for CountingSource {
        fn stop(&mut self) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn test_track_stops_once() {
        let stops = Arc::new(Mutex::new(0));
        let mut track = LocalTrack::new(
            MediaKind::Audio,
            "stream",
            Some(Box::new(CountingSource(Arc::clone(&stops)))),
        );

        track.stop();
        track.stop();
        drop(track);

        assert_eq!(*stops.lock(), 1);
    }

    #[test]
    fn test_drop_stops_track() {
        let stops = Arc::new(Mutex::new(0));
        {
            let mut media = LocalMedia::new("stream");
            media.push(LocalTrack::new(
                MediaKind::Video,
                "stream",
                Some(Box::new(CountingSource(Arc::clone(&stops)))),
            ));
        }
        assert_eq!(*stops.lock(), 1);
    }

    #[test]
    fn test_track_ids_and_info() {
        let mut media = LocalMedia::new("s1");
        media.push(LocalTrack::new(MediaKind::Audio, "s1", None));
        media.push(LocalTrack::new(MediaKind::Video, "s1", None));

        let info = media.info();
        assert_eq!(info.stream_id, "s1");
        assert_eq!(info.tracks.len(), 2);
        assert!(info.tracks[0].id.starts_with("audio-"));
        assert_eq!(info.tracks[1].kind, MediaKind::Video);
        assert_eq!(media.tracks()[0].rtp_track().stream_id(), "s1");
    }

    #[tokio::test]
    async fn test_external_devices() {
        let devices = ExternalSampleDevices::new(MediaConstraints::audio_only());

        let media = devices.open(&MediaConstraints::audio_only()).await.unwrap();
        assert_eq!(media.tracks().len(), 1);
        assert_eq!(media.tracks()[0].kind(), MediaKind::Audio);

        let err = devices.open(&MediaConstraints::default()).await.unwrap_err();
        assert_eq!(err, MediaAcquisitionError::NoDevice(MediaKind::Video));

        let none = MediaConstraints {
            audio: false,
            video: false,
        };
        assert_eq!(
            devices.open(&none).await.unwrap_err(),
            MediaAcquisitionError::NothingRequested
        );
    }
}
