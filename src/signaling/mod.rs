//! Signaling Module - Protokoll über den Chat-Relay
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay-Server:
//! - WebSocket-Verbindung aufbauen und halten
//! - Signale (Offer/Answer/ICE) klassifizieren und verpacken
//! - Eingehende Frames in typisierte Events übersetzen
//!

mod client;
mod dispatcher;
mod messages;

pub use client::{RelayClient, RelayTransport, SignalingError};
pub use dispatcher::{InboundEvent, Notice, SignalDispatcher};
pub use messages::*;
