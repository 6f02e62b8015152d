//! Konfiguration
//!
//! Relay-URL, ICE Server und Medien-Constraints. Kann aus
//! Umgebungsvariablen geladen werden:
//! - `CALL_RELAY_URL` - WebSocket-URL des Relays (http/https wird umgeschrieben)
//! - `CALL_STUN_URLS` - kommagetrennte STUN-URLs
//! - `CALL_TURN_URL`, `CALL_TURN_USERNAME`, `CALL_TURN_CREDENTIAL` - optionaler TURN-Server
//! - `CALL_AUDIO_ONLY` - `1`/`true` deaktiviert Video

use crate::call_engine::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(#[from] url::ParseError),

    #[error("Unsupported relay URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Ein STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn stun(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: String::new(),
            credential: String::new(),
        }
    }
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        }
    }
}

/// Standard STUN Konfiguration
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun(vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
        "stun:stun2.l.google.com:19302".to_string(),
    ])]
}

// ============================================================================
// CALL CONFIG
// ============================================================================

const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/ws";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub relay_url: String,
    pub ice_servers: Vec<IceServer>,
    pub media: MediaConstraints,
    pub heartbeat_secs: u64,
    /// Kapazität der Broadcast-Kanäle (Relay-Frames, Call-Events)
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: default_ice_servers(),
            media: MediaConstraints::default(),
            heartbeat_secs: 25,
            event_capacity: 100,
        }
    }
}

impl CallConfig {
    /// Lädt die Konfiguration aus Umgebungsvariablen
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("CALL_RELAY_URL") {
            config.relay_url = url;
        }
        // Früh validieren, connect() soll nicht erst daran scheitern
        config.relay_url()?;

        if let Some(urls) = lookup("CALL_STUN_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_owned)
                .collect();
            if urls.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "CALL_STUN_URLS",
                    value: String::new(),
                });
            }
            config.ice_servers = vec![IceServer::stun(urls)];
        }

        if let Some(url) = lookup("CALL_TURN_URL") {
            config = config.with_turn_server(
                url,
                lookup("CALL_TURN_USERNAME").unwrap_or_default(),
                lookup("CALL_TURN_CREDENTIAL").unwrap_or_default(),
            );
        }

        if let Some(value) = lookup("CALL_AUDIO_ONLY") {
            let audio_only = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "CALL_AUDIO_ONLY",
                        value,
                    })
                }
            };
            if audio_only {
                config.media = MediaConstraints::audio_only();
            }
        }

        Ok(config)
    }

    /// Fügt einen TURN-Server mit Credentials hinzu
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(IceServer {
            urls: vec![url],
            username,
            credential,
        });
        self
    }

    /// Validierte WebSocket-URL des Relays
    pub fn relay_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.relay_url)?;
        let scheme = match url.scheme() {
            "ws" | "wss" => return Ok(url),
            "http" => "ws",
            "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
        Ok(url)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

// ============================================================================
// TESTS
// ============================================================================
