//! Signal Dispatcher
//!
//! Verbindet die Call Engine mit dem Relay: verpackt ausgehende Signale
//! in Envelopes und dekodiert eingehende Relay-Frames in typisierte Events.
//! Die Reihenfolge der Frames wird nicht verändert.

use super::client::{RelayTransport, SignalingError};
use super::messages::*;
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// NOTICES
// ============================================================================

/// Benachrichtigungen neben den eigentlichen Signalen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Invite,
    Accept,
    Reject,
    End,
}

impl Notice {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Invite => INVITE_EVENT,
            Self::Accept => ACCEPT_EVENT,
            Self::Reject => REJECT_EVENT,
            Self::End => END_EVENT,
        }
    }
}

/// Eingehende, bereits dekodierte Relay-Events
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Signal {
        from: UserId,
        conversation_id: ConversationId,
        data: Value,
    },
    Invite {
        from: UserId,
        conversation_id: ConversationId,
    },
    Accepted {
        from: UserId,
        conversation_id: ConversationId,
    },
    Rejected {
        from: UserId,
        conversation_id: ConversationId,
        reason: Option<String>,
    },
    Ended {
        from: UserId,
        conversation_id: ConversationId,
    },
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Clone)]
pub struct SignalDispatcher {
    relay: Arc<dyn RelayTransport>,
}

impl SignalDispatcher {
    pub fn new(relay: Arc<dyn RelayTransport>) -> Self {
        Self { relay }
    }

    /// Sendet ein Offer/Answer/Candidate an den Ziel-Benutzer
    pub fn send_signal(
        &self,
        target: UserId,
        conversation_id: ConversationId,
        message: SignalMessage,
    ) -> Result<(), SignalingError> {
        let envelope = OutboundSignal::new(target, conversation_id, message);
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        self.relay.send(SIGNAL_EVENT, payload)
    }

    /// Sendet eine Benachrichtigung (invite/accept/reject/end)
    pub fn send_notice(
        &self,
        notice: Notice,
        target: UserId,
        conversation_id: ConversationId,
        reason: Option<String>,
    ) -> Result<(), SignalingError> {
        let envelope = OutboundNotice {
            target_user_id: target,
            conversation_id,
            reason,
        };
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        self.relay.send(notice.event_name(), payload)
    }

    /// Dekodiert einen Relay-Frame; unbekannte oder kaputte Frames ergeben `None`
    pub fn decode(message: &RelayMessage) -> Option<InboundEvent> {
        let event = match message.event.as_str() {
            SIGNAL_EVENT => {
                let signal: InboundSignal = Self::parse(message)?;
                InboundEvent::Signal {
                    from: signal.from_user_id,
                    conversation_id: signal.conversation_id,
                    data: signal.data,
                }
            }
            INVITE_EVENT => {
                let n: InboundNotice = Self::parse(message)?;
                InboundEvent::Invite {
                    from: n.from_user_id,
                    conversation_id: n.conversation_id,
                }
            }
            ACCEPT_EVENT => {
                let n: InboundNotice = Self::parse(message)?;
                InboundEvent::Accepted {
                    from: n.from_user_id,
                    conversation_id: n.conversation_id,
                }
            }
            REJECT_EVENT => {
                let n: InboundNotice = Self::parse(message)?;
                InboundEvent::Rejected {
                    from: n.from_user_id,
                    conversation_id: n.conversation_id,
                    reason: n.reason,
                }
            }
            END_EVENT => {
                let n: InboundNotice = Self::parse(message)?;
                InboundEvent::Ended {
                    from: n.from_user_id,
                    conversation_id: n.conversation_id,
                }
            }
            other => {
                tracing::trace!("Ignoring relay event '{}'", other);
                return None;
            }
        };
        Some(event)
    }

    fn parse<T: serde::de::DeserializeOwned>(message: &RelayMessage) -> Option<T> {
        match serde_json::from_value(message.data.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!("Dropping malformed '{}' frame: {}", message.event, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDispatcher").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
