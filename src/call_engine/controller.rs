//! Call Lifecycle Controller
//!
//! Phasen-Automat über der `MediaSession`:
//! `Idle -> Initiating | Ringing -> Negotiating -> Connected -> Closed -> Idle`
//!
//! Der Controller gehört genau einem Task. Kommandos, Relay-Frames und
//! Peer-Callbacks werden nacheinander abgearbeitet. Nur der Aufbau einer
//! Session (Geräte, Peer Connection) läuft in einem eigenen Task, damit
//! ein Auflegen ihn jederzeit abbrechen kann.

use super::media::{LocalStreamInfo, MediaAcquisitionError, MediaDevices};
use super::platform::{
    ConnectionState, NegotiationError, PeerTransportFactory, RemoteMedia, TaggedPeerEvent,
};
use super::session::{CallRole, MediaSession, PeerEventOutcome, PreparedSession, SignalOutcome};
use crate::config::CallConfig;
use crate::signaling::{
    ConversationId, InboundEvent, Notice, RelayMessage, RelayTransport, SdpKind,
    SignalDispatcher, SignalingError, UserId,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Grund für automatisch abgelehnte Anrufe
pub const BUSY_REASON: &str = "busy";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaAcquisitionError),

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Call setup cancelled")]
    Cancelled,

    #[error("Call controller stopped")]
    ControllerStopped,
}

// ============================================================================
// CALL PHASE & EVENTS
// ============================================================================

/// Phase des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    /// Kein Anruf
    Idle,
    /// Ausgehender Anruf, noch keine Antwort angewendet
    Initiating,
    /// Eingehender Anruf, wartet auf Annahme bzw. Offer
    Ringing,
    /// Descriptions ausgetauscht, Verbindung wird aufgebaut
    Negotiating,
    Connected,
    /// Kurzzeitig beim Abbau, danach sofort wieder `Idle`
    Closed,
}

/// Events für die Render-Schicht
#[derive(Debug, Clone)]
pub enum CallEvent {
    PhaseChanged {
        phase: CallPhase,
        conversation_id: Option<ConversationId>,
    },
    IncomingCall {
        from: UserId,
        conversation_id: ConversationId,
    },
    LocalMedia(LocalStreamInfo),
    RemoteMedia(RemoteMedia),
    Rejected {
        by: UserId,
        conversation_id: ConversationId,
        reason: Option<String>,
    },
    Ended {
        by: UserId,
        conversation_id: ConversationId,
    },
    Error(String),
}

/// Ein angekündigter, noch nicht verhandelter Anruf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingCall {
    peer: UserId,
    conversation_id: ConversationId,
}

type StartReply = oneshot::Sender<Result<(), CallError>>;

/// Ein Session-Aufbau, der noch im eigenen Task läuft
struct PendingStart {
    call: PendingCall,
    role: CallRole,
    generation: u64,
    /// Die Gegenseite wurde per Invite angekündigt
    invited: bool,
    task: JoinHandle<Result<PreparedSession, CallError>>,
    reply: Option<StartReply>,
    /// Signale der Gegenseite, die vor dem Ende des Aufbaus ankamen
    early_signals: Vec<Value>,
}

impl PendingStart {
    /// Bricht den Aufbau ab; ein verspätetes Ergebnis wird freigegeben
    fn cancel(mut self) {
        tracing::info!(
            "Cancelling call setup {} (conversation {})",
            self.generation,
            self.call.conversation_id
        );
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(CallError::Cancelled));
        }

        let task = self.task;
        tokio::spawn(async move {
            if let Ok(Ok(prepared)) = task.await {
                prepared.discard().await;
            }
        });
    }
}

// ============================================================================
// CALL CONTROLLER
// ============================================================================

pub struct CallController {
    session: MediaSession,
    dispatcher: SignalDispatcher,
    phase: CallPhase,
    incoming: Option<PendingCall>,
    outgoing: Option<PendingCall>,
    starting: Option<PendingStart>,
    event_tx: broadcast::Sender<CallEvent>,
    peer_rx: mpsc::UnboundedReceiver<TaggedPeerEvent>,
}

impl CallController {
    pub fn new(
        config: &CallConfig,
        relay: Arc<dyn RelayTransport>,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn PeerTransportFactory>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let dispatcher = SignalDispatcher::new(relay);

        let session = MediaSession::new(
            config,
            dispatcher.clone(),
            devices,
            transports,
            peer_tx,
            event_tx.clone(),
        );

        Self {
            session,
            dispatcher,
            phase: CallPhase::Idle,
            incoming: None,
            outgoing: None,
            starting: None,
            event_tx,
            peer_rx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<CallEvent> {
        self.event_tx.clone()
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn session(&self) -> &MediaSession {
        &self.session
    }

    /// Kündigt einen Anruf an; das Offer folgt, sobald die Gegenseite annimmt
    pub async fn invite(
        &mut self,
        callee_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        if self.phase != CallPhase::Idle {
            let notice = self.leave_notice();
            self.release(Some(notice)).await;
        }

        self.dispatcher
            .send_notice(Notice::Invite, callee_id, conversation_id, None)?;

        tracing::info!(
            "Inviting {} to a call (conversation {})",
            callee_id,
            conversation_id
        );
        self.outgoing = Some(PendingCall {
            peer: callee_id,
            conversation_id,
        });
        self.set_phase(CallPhase::Initiating, Some(conversation_id));
        Ok(())
    }

    /// Startet den Anruf und sendet das Offer
    ///
    /// Ein anderer laufender Anruf wird vorher beendet und seine
    /// Gegenseite benachrichtigt.
    pub async fn initiate(
        &mut self,
        callee_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        let call = PendingCall {
            peer: callee_id,
            conversation_id,
        };
        self.start(call, CallRole::Caller, None).await;
        self.finish_start().await
    }

    /// Nimmt einen Anruf an
    ///
    /// Die Phase bleibt `Ringing`, bis das Offer des Anrufers angewendet
    /// und das Answer gesendet wurde.
    pub async fn accept(
        &mut self,
        caller_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        let call = PendingCall {
            peer: caller_id,
            conversation_id,
        };
        if self.is_accepted(call) {
            tracing::debug!("Call in conversation {} already accepted", conversation_id);
            return Ok(());
        }
        self.start(call, CallRole::Callee, None).await;
        self.finish_start().await
    }

    /// Registriert einen eingehenden Anruf
    ///
    /// Läuft bereits ein Anruf, wird mit `busy` abgelehnt.
    pub async fn ring(&mut self, caller_id: UserId, conversation_id: ConversationId) {
        if self.phase != CallPhase::Idle {
            if self.is_current_call(caller_id, conversation_id) {
                tracing::debug!("Ignoring duplicate invite from {}", caller_id);
                return;
            }

            tracing::info!(
                "Busy, rejecting call from {} (conversation {})",
                caller_id,
                conversation_id
            );
            if let Err(e) = self.dispatcher.send_notice(
                Notice::Reject,
                caller_id,
                conversation_id,
                Some(BUSY_REASON.to_string()),
            ) {
                tracing::warn!("Failed to send busy reject: {}", e);
            }
            return;
        }

        tracing::info!(
            "Incoming call from {} (conversation {})",
            caller_id,
            conversation_id
        );
        self.incoming = Some(PendingCall {
            peer: caller_id,
            conversation_id,
        });
        self.set_phase(CallPhase::Ringing, Some(conversation_id));
        let _ = self.event_tx.send(CallEvent::IncomingCall {
            from: caller_id,
            conversation_id,
        });
    }

    /// Lehnt den klingelnden Anruf ab
    pub async fn reject(&mut self) {
        if self.phase != CallPhase::Ringing {
            tracing::debug!("Nothing to reject in phase {:?}", self.phase);
            return;
        }
        self.release(Some(Notice::Reject)).await;
    }

    /// Legt auf und benachrichtigt die Gegenseite
    ///
    /// Ein laufender Aufbau wird sofort abgebrochen.
    pub async fn hang_up(&mut self) {
        let notice = self.leave_notice();
        self.release(Some(notice)).await;
    }

    /// Baut den Anruf lokal ab, ohne die Gegenseite zu benachrichtigen (idempotent)
    pub async fn teardown(&mut self) {
        self.release(None).await;
    }

    /// Wendet ein Signal der Gegenseite an und schaltet die Phase weiter
    pub async fn receive_signal(
        &mut self,
        from_id: UserId,
        conversation_id: ConversationId,
        payload: &Value,
    ) -> SignalOutcome {
        if let Some(pending) = self.starting.as_mut() {
            let from = PendingCall {
                peer: from_id,
                conversation_id,
            };
            if pending.call == from {
                tracing::debug!("Call setup in progress, holding signal from {}", from_id);
                pending.early_signals.push(payload.clone());
                return SignalOutcome::Queued;
            }
        }

        let outcome = self
            .session
            .receive_signal(from_id, conversation_id, payload)
            .await;

        if let SignalOutcome::DescriptionApplied(kind) = &outcome {
            match self.phase {
                CallPhase::Initiating | CallPhase::Ringing => {
                    self.set_phase(CallPhase::Negotiating, Some(conversation_id));
                }
                CallPhase::Connected if *kind == SdpKind::Offer => {
                    tracing::info!("Renegotiation answered, staying connected");
                }
                _ => {}
            }
        }
        outcome
    }

    /// Verarbeitet einen Callback der Peer Connection
    pub async fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        match self.session.handle_peer_event(tagged) {
            PeerEventOutcome::Stale | PeerEventOutcome::CandidateSent => {}
            PeerEventOutcome::RemoteMedia(media) => {
                let _ = self.event_tx.send(CallEvent::RemoteMedia(media));
            }
            PeerEventOutcome::Connection(state) => match state {
                ConnectionState::Connected => {
                    if self.phase == CallPhase::Negotiating {
                        let conversation_id = self.current_call().map(|c| c.conversation_id);
                        self.set_phase(CallPhase::Connected, conversation_id);
                    }
                }
                ConnectionState::Failed | ConnectionState::Closed => {
                    tracing::warn!("Peer connection {:?}, ending call", state);
                    let _ = self
                        .event_tx
                        .send(CallEvent::Error(format!("Peer connection {:?}", state)));
                    self.release(Some(Notice::End)).await;
                }
                ConnectionState::Disconnected => {
                    tracing::warn!("Peer connection disconnected, waiting for recovery");
                }
                ConnectionState::New | ConnectionState::Connecting => {}
            },
        }
    }

    /// Verarbeitet einen Frame vom Relay
    pub async fn handle_relay(&mut self, message: RelayMessage) {
        let Some(event) = SignalDispatcher::decode(&message) else {
            return;
        };

        match event {
            InboundEvent::Signal {
                from,
                conversation_id,
                data,
            } => {
                self.receive_signal(from, conversation_id, &data).await;
            }
            InboundEvent::Invite {
                from,
                conversation_id,
            } => self.ring(from, conversation_id).await,
            InboundEvent::Accepted {
                from,
                conversation_id,
            } => {
                let expected = PendingCall {
                    peer: from,
                    conversation_id,
                };
                if self.outgoing != Some(expected) {
                    tracing::debug!("Dropping unexpected accept from {}", from);
                    return;
                }

                tracing::info!("{} accepted the call, sending offer", from);
                self.start(expected, CallRole::Caller, None).await;
            }
            InboundEvent::Rejected {
                from,
                conversation_id,
                reason,
            } => {
                if !self.is_current_call(from, conversation_id) {
                    tracing::debug!("Dropping reject for conversation {}", conversation_id);
                    return;
                }

                tracing::info!("{} rejected the call ({:?})", from, reason);
                let _ = self.event_tx.send(CallEvent::Rejected {
                    by: from,
                    conversation_id,
                    reason,
                });
                self.release(None).await;
            }
            InboundEvent::Ended {
                from,
                conversation_id,
            } => {
                if !self.is_current_call(from, conversation_id) {
                    tracing::debug!("Dropping end for conversation {}", conversation_id);
                    return;
                }

                tracing::info!("{} ended the call", from);
                let _ = self.event_tx.send(CallEvent::Ended {
                    by: from,
                    conversation_id,
                });
                self.release(None).await;
            }
        }
    }

    /// Event-Loop des Controllers
    ///
    /// Endet, wenn alle `CallHandle`s gedroppt wurden; ein laufender Anruf
    /// wird dann beendet.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CallCommand>,
        mut relay_rx: broadcast::Receiver<RelayMessage>,
    ) {
        let mut relay_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                message = relay_rx.recv(), if relay_open => match message {
                    Ok(message) => self.handle_relay(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Relay receiver lagged, {} frames skipped", skipped);
                        let _ = self.event_tx.send(CallEvent::Error(format!(
                            "Relay lagged, {} frames skipped",
                            skipped
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Relay channel closed");
                        relay_open = false;
                    }
                },
                Some(tagged) = self.peer_rx.recv() => self.handle_peer_event(tagged).await,
                joined = Self::join_start(&mut self.starting), if self.starting.is_some() => {
                    let _ = self.complete_start(joined).await;
                }
            }
        }

        self.release(Some(Notice::End)).await;
        tracing::info!("Call controller stopped");
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::Invite {
                callee_id,
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.invite(callee_id, conversation_id).await);
            }
            // Aufbau läuft weiter, die Antwort kommt aus `complete_start`
            CallCommand::Initiate {
                callee_id,
                conversation_id,
                reply,
            } => {
                let call = PendingCall {
                    peer: callee_id,
                    conversation_id,
                };
                self.start(call, CallRole::Caller, Some(reply)).await;
            }
            CallCommand::Accept {
                caller_id,
                conversation_id,
                reply,
            } => {
                let call = PendingCall {
                    peer: caller_id,
                    conversation_id,
                };
                if self.is_accepted(call) {
                    let _ = reply.send(Ok(()));
                } else {
                    self.start(call, CallRole::Callee, Some(reply)).await;
                }
            }
            CallCommand::Reject { reply } => {
                self.reject().await;
                let _ = reply.send(());
            }
            CallCommand::HangUp { reply } => {
                self.hang_up().await;
                let _ = reply.send(());
            }
            CallCommand::Phase { reply } => {
                let _ = reply.send(self.phase);
            }
        }
    }

    /// Beginnt den Aufbau einer Session im eigenen Task
    async fn start(&mut self, call: PendingCall, role: CallRole, reply: Option<StartReply>) {
        let other_call = !self.is_current_call(call.peer, call.conversation_id);
        if self.phase != CallPhase::Idle && (other_call || self.session.is_active()) {
            let notice = self.leave_notice();
            self.release(Some(notice)).await;
        }
        if let Some(previous) = self.starting.take() {
            previous.cancel();
        }

        let invited = self.outgoing == Some(call);
        self.incoming = None;
        self.outgoing = None;

        let setup = self.session.prepare().await;
        let generation = self.session.generation();

        let phase = match role {
            CallRole::Caller => CallPhase::Initiating,
            CallRole::Callee => CallPhase::Ringing,
        };
        self.set_phase(phase, Some(call.conversation_id));

        self.starting = Some(PendingStart {
            call,
            role,
            generation,
            invited,
            task: tokio::spawn(setup),
            reply,
            early_signals: Vec::new(),
        });
    }

    /// Wartet auf den laufenden Aufbau; ohne Aufbau nie fertig
    async fn join_start(
        starting: &mut Option<PendingStart>,
    ) -> Result<PreparedSession, CallError> {
        let Some(pending) = starting.as_mut() else {
            return std::future::pending().await;
        };
        match (&mut pending.task).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Call setup task failed: {}", e);
                Err(CallError::Cancelled)
            }
        }
    }

    /// Wartet den laufenden Aufbau ab und übernimmt das Ergebnis
    async fn finish_start(&mut self) -> Result<(), CallError> {
        if self.starting.is_none() {
            return Ok(());
        }
        let joined = Self::join_start(&mut self.starting).await;
        self.complete_start(joined).await
    }

    /// Übernimmt das Ergebnis des Aufbaus und sendet Offer bzw. Accept
    async fn complete_start(
        &mut self,
        joined: Result<PreparedSession, CallError>,
    ) -> Result<(), CallError> {
        let Some(mut pending) = self.starting.take() else {
            return Ok(());
        };
        let PendingCall {
            peer,
            conversation_id,
        } = pending.call;

        let result = match joined {
            Ok(prepared) => {
                if self
                    .session
                    .install(prepared, peer, conversation_id, pending.role)
                    .await
                {
                    match pending.role {
                        CallRole::Caller => self.session.send_offer().await,
                        CallRole::Callee => {
                            if let Err(e) = self.dispatcher.send_notice(
                                Notice::Accept,
                                peer,
                                conversation_id,
                                None,
                            ) {
                                tracing::error!("Failed to send accept: {}", e);
                                let _ = self.event_tx.send(CallEvent::Error(e.to_string()));
                            }
                        }
                    }

                    for payload in std::mem::take(&mut pending.early_signals) {
                        self.receive_signal(peer, conversation_id, &payload).await;
                    }
                    Ok(())
                } else {
                    Err(CallError::Cancelled)
                }
            }
            Err(e) => {
                tracing::error!("Failed to start call: {}", e);
                let notice = match pending.role {
                    CallRole::Callee => Some(Notice::Reject),
                    CallRole::Caller if pending.invited => Some(Notice::End),
                    CallRole::Caller => None,
                };
                if let Some(notice) = notice {
                    if let Err(send_err) =
                        self.dispatcher
                            .send_notice(notice, peer, conversation_id, None)
                    {
                        tracing::warn!("Failed to send {}: {}", notice.event_name(), send_err);
                    }
                }
                let _ = self.event_tx.send(CallEvent::Error(e.to_string()));
                self.close_phase(Some(conversation_id));
                Err(e)
            }
        };

        if let Some(reply) = pending.reply.take() {
            let _ = reply.send(result.clone());
        }
        result
    }

    /// Der Anruf ist bereits angenommen oder wird gerade angenommen
    fn is_accepted(&self, call: PendingCall) -> bool {
        let active = self.session.active().is_some_and(|s| {
            s.role() == CallRole::Callee
                && s.peer_id() == call.peer
                && s.conversation_id() == call.conversation_id
        });
        let starting = self
            .starting
            .as_ref()
            .is_some_and(|p| p.role == CallRole::Callee && p.call == call);
        active || starting
    }

    /// Benachrichtigung beim Verlassen des aktuellen Anrufs
    ///
    /// Ein nie angenommener eingehender Anruf wird abgelehnt, alles andere
    /// beendet.
    fn leave_notice(&self) -> Notice {
        if self.phase == CallPhase::Ringing && !self.session.is_active() {
            Notice::Reject
        } else {
            Notice::End
        }
    }

    /// Peer und Conversation des aktiven, startenden oder angekündigten Anrufs
    fn current_call(&self) -> Option<PendingCall> {
        self.session
            .active()
            .map(|s| PendingCall {
                peer: s.peer_id(),
                conversation_id: s.conversation_id(),
            })
            .or(self.starting.as_ref().map(|p| p.call))
            .or(self.incoming)
            .or(self.outgoing)
    }

    fn is_current_call(&self, peer: UserId, conversation_id: ConversationId) -> bool {
        self.current_call()
            == Some(PendingCall {
                peer,
                conversation_id,
            })
    }

    /// Beendet den Anruf; optional mit Benachrichtigung an die Gegenseite
    async fn release(&mut self, notice: Option<Notice>) {
        let call = self.current_call();
        if let Some(pending) = self.starting.take() {
            pending.cancel();
        }

        if let (Some(notice), Some(call)) = (notice, call) {
            if let Err(e) =
                self.dispatcher
                    .send_notice(notice, call.peer, call.conversation_id, None)
            {
                tracing::warn!("Failed to send {}: {}", notice.event_name(), e);
            }
        }

        self.incoming = None;
        self.outgoing = None;
        self.session.teardown().await;
        self.close_phase(call.map(|c| c.conversation_id));
    }

    fn close_phase(&mut self, conversation_id: Option<ConversationId>) {
        if self.phase != CallPhase::Idle {
            self.set_phase(CallPhase::Closed, conversation_id);
            self.set_phase(CallPhase::Idle, None);
        }
    }

    /// Aktualisiert die Phase und sendet ein Event (nur bei Änderung)
    fn set_phase(&mut self, phase: CallPhase, conversation_id: Option<ConversationId>) {
        if self.phase == phase {
            return;
        }
        tracing::info!("Call phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        let _ = self.event_tx.send(CallEvent::PhaseChanged {
            phase,
            conversation_id,
        });
    }

    #[cfg(test)]
    pub(crate) async fn drain_peer_events(&mut self) {
        while let Ok(tagged) = self.peer_rx.try_recv() {
            self.handle_peer_event(tagged).await;
        }
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("phase", &self.phase)
            .field("starting", &self.starting.as_ref().map(|p| p.generation))
            .field("session", &self.session)
            .finish()
    }
}

// ============================================================================
// COMMAND HANDLE
// ============================================================================

/// Kommandos an den Controller-Task
#[derive(Debug)]
pub enum CallCommand {
    Invite {
        callee_id: UserId,
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Initiate {
        callee_id: UserId,
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Accept {
        caller_id: UserId,
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Reject {
        reply: oneshot::Sender<()>,
    },
    HangUp {
        reply: oneshot::Sender<()>,
    },
    Phase {
        reply: oneshot::Sender<CallPhase>,
    },
}

/// Cloneable Handle für die UI
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    pub fn new(tx: mpsc::Sender<CallCommand>) -> Self {
        Self { tx }
    }

    pub async fn invite(
        &self,
        callee_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Invite {
            callee_id,
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn initiate(
        &self,
        callee_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Initiate {
            callee_id,
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn accept(
        &self,
        caller_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Accept {
            caller_id,
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Reject { reply }).await
    }

    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::HangUp { reply }).await
    }

    pub async fn phase(&self) -> Result<CallPhase, CallError> {
        self.request(|reply| CallCommand::Phase { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| CallError::ControllerStopped)?;
        rx.await.map_err(|_| CallError::ControllerStopped)
    }
}

// ============================================================================
// TESTS
// ============================================================================
