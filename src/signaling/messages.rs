//! Message Types für das Call-Signaling
//!
//! Diese Strukturen bilden das JSON-Protokoll ab, das über den Relay
//! des Chat-Backends läuft:
//! - Session Descriptions (Offer/Answer) und ICE Candidates
//! - Signal-Codec zur Klassifizierung eingehender Payloads
//! - Envelopes für ausgehende und eingehende Relay-Events

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Benutzer-ID aus dem Chat-Backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Konversation, an die ein Anruf gebunden ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// EVENT NAMES
// ============================================================================

/// Offer, Answer und ICE Candidates
pub const SIGNAL_EVENT: &str = "call:signal";
/// Eingehender/ausgehender Anruf
pub const INVITE_EVENT: &str = "call:invite";
/// Angerufener hat angenommen
pub const ACCEPT_EVENT: &str = "call:accept";
/// Angerufener hat abgelehnt
pub const REJECT_EVENT: &str = "call:reject";
/// Gegenseite hat aufgelegt
pub const END_EVENT: &str = "call:end";
/// Heartbeat
pub const PING_EVENT: &str = "ping";

// ============================================================================
// SIGNAL MESSAGES
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SDP Offer oder Answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate (Trickle-ICE)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NetworkCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl NetworkCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Alles, was als `data` in einem `call:signal` Event übertragen wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SignalMessage {
    SessionDescription(SessionDescription),
    NetworkCandidate(NetworkCandidate),
}

// ============================================================================
// SIGNAL CODEC
// ============================================================================

/// Ergebnis der Klassifizierung eines eingehenden Payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedSignal {
    SessionDescription(SessionDescription),
    NetworkCandidate(NetworkCandidate),
    Unrecognized,
}

impl ClassifiedSignal {
    pub fn into_message(self) -> Option<SignalMessage> {
        match self {
            Self::SessionDescription(d) => Some(SignalMessage::SessionDescription(d)),
            Self::NetworkCandidate(c) => Some(SignalMessage::NetworkCandidate(c)),
            Self::Unrecognized => None,
        }
    }
}

/// Klassifiziert einen beliebigen JSON-Wert als Signal
///
/// Eine Session Description braucht `type` = "offer"|"answer" und ein
/// String-Feld `sdp`. Ein Candidate braucht ein String-Feld `candidate`;
/// `sdpMid` und `sdpMLineIndex` werden übernommen, falls vorhanden. Ein
/// `sdpMLineIndex`, der kein u16 ist, macht das Signal unbekannt.
/// Die Description-Form wird zuerst geprüft.
pub fn classify(value: &Value) -> ClassifiedSignal {
    let Some(obj) = value.as_object() else {
        return ClassifiedSignal::Unrecognized;
    };

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(SdpKind::from_wire);
    let sdp = obj.get("sdp").and_then(Value::as_str);

    if let (Some(kind), Some(sdp)) = (kind, sdp) {
        return ClassifiedSignal::SessionDescription(SessionDescription {
            kind,
            sdp: sdp.to_owned(),
        });
    }

    if let Some(candidate) = obj.get("candidate").and_then(Value::as_str) {
        // Ein Index außerhalb von u16 macht den Candidate unbrauchbar
        let sdp_mline_index = match obj.get("sdpMLineIndex") {
            None | Some(Value::Null) => None,
            Some(index) => match index.as_u64().and_then(|i| u16::try_from(i).ok()) {
                Some(index) => Some(index),
                None => {
                    tracing::debug!("Dropping candidate with invalid sdpMLineIndex {}", index);
                    return ClassifiedSignal::Unrecognized;
                }
            },
        };

        return ClassifiedSignal::NetworkCandidate(NetworkCandidate {
            candidate: candidate.to_owned(),
            sdp_mid: obj.get("sdpMid").and_then(Value::as_str).map(str::to_owned),
            sdp_mline_index,
        });
    }

    ClassifiedSignal::Unrecognized
}

// ============================================================================
// RELAY ENVELOPES
// ============================================================================

/// Ein Frame vom/zum Relay: Event-Name plus JSON-Daten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl RelayMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Ausgehendes `call:signal`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundSignal {
    pub target_user_id: UserId,
    pub conversation_id: ConversationId,
    pub data: SignalMessage,
}

impl OutboundSignal {
    pub fn new(
        target_user_id: UserId,
        conversation_id: ConversationId,
        data: SignalMessage,
    ) -> Self {
        Self {
            target_user_id,
            conversation_id,
            data,
        }
    }
}

/// Ausgehende Benachrichtigung (invite/accept/reject/end)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundNotice {
    pub target_user_id: UserId,
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Eingehendes `call:signal`, vom Relay mit dem Absender versehen
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSignal {
    pub from_user_id: UserId,
    pub conversation_id: ConversationId,
    pub data: Value,
}

/// Eingehende Benachrichtigung
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundNotice {
    pub from_user_id: UserId,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_round_trip() {
        let offer = SessionDescription::offer("v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n");
        let value =
            serde_json::to_value(SignalMessage::SessionDescription(offer.clone())).unwrap();

        assert_eq!(value["type"], "offer");
        assert_eq!(classify(&value), ClassifiedSignal::SessionDescription(offer));
    }

    #[test]
    fn test_unknown_shape_is_unrecognized() {
        assert_eq!(classify(&json!({ "foo": 1 })), ClassifiedSignal::Unrecognized);
        assert_eq!(classify(&json!("offer")), ClassifiedSignal::Unrecognized);
        assert_eq!(classify(&Value::Null), ClassifiedSignal::Unrecognized);
    }

    #[test]
    fn test_description_requires_known_type_and_string_sdp() {
        assert_eq!(
            classify(&json!({ "type": "pranswer", "sdp": "v=0" })),
            ClassifiedSignal::Unrecognized
        );
        assert_eq!(
            classify(&json!({ "type": "offer", "sdp": 42 })),
            ClassifiedSignal::Unrecognized
        );
        assert_eq!(
            classify(&json!({ "type": "answer", "sdp": "v=0" })),
            ClassifiedSignal::SessionDescription(SessionDescription::answer("v=0"))
        );
    }

    #[test]
    fn test_candidate_optional_fields() {
        let full = classify(&json!({
            "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 1
        }));
        assert_eq!(
            full,
            ClassifiedSignal::NetworkCandidate(NetworkCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(1),
            })
        );

        let bare = classify(&json!({ "candidate": "" }));
        assert_eq!(bare, ClassifiedSignal::NetworkCandidate(NetworkCandidate::new("")));

        assert_eq!(
            classify(&json!({ "candidate": 7 })),
            ClassifiedSignal::Unrecognized
        );

        let null_index = classify(&json!({ "candidate": "c", "sdpMLineIndex": null }));
        assert_eq!(null_index, ClassifiedSignal::NetworkCandidate(NetworkCandidate::new("c")));

        for index in [json!(-1), json!(70000), json!("0"), json!(1.5)] {
            assert_eq!(
                classify(&json!({ "candidate": "c", "sdpMLineIndex": index })),
                ClassifiedSignal::Unrecognized
            );
        }
    }

    #[test]
    fn test_candidate_serialization_omits_missing_fields() {
        let value =
            serde_json::to_value(SignalMessage::NetworkCandidate(NetworkCandidate::new("c")))
                .unwrap();
        assert_eq!(value, json!({ "candidate": "c" }));
    }

    #[test]
    fn test_outbound_signal_envelope() {
        let envelope = OutboundSignal::new(
            UserId(2),
            ConversationId(7),
            SignalMessage::SessionDescription(SessionDescription::offer("v=0")),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            value,
            json!({
                "targetUserId": 2,
                "conversationId": 7,
                "data": { "type": "offer", "sdp": "v=0" }
            })
        );
    }
}
