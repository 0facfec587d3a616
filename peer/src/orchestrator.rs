//! Negotiation orchestrator — drives a transport session to connected using
//! the relay as the signaling channel.
//!
//! DESIGN
//! ======
//! Everything that can happen to a negotiation arrives as an [`Event`] on
//! one unbounded queue: relay frames (from the relay client's read loop),
//! local candidates and connection-state changes (from transport-session
//! callbacks, which may fire on any thread), and local commands. A single
//! task consumes the queue, so the state machine never re-enters.
//!
//! STATES
//! ======
//! ```text
//! Idle ──offer in / offer out──▶ Negotiating ──Connected──▶ Established
//!   └──────────────── Failed / Closed / Shutdown ──────────────▶ Closed
//! ```
//!
//! A failed step is logged and leaves the state untouched. Nothing is
//! retried.
//!
//! CANDIDATES
//! ==========
//! Candidates are only exchanged with the captured remote. Local candidates
//! produced before a remote is known are dropped, not buffered. Remote
//! candidates arriving before a remote is known are dropped too.

use std::sync::Arc;

use frames::{CodecError, Command, EventName, IceCandidate, PeerId, RelayFrame, SessionDescription, SignalingEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relay::RelaySink;
use crate::session::{ConnectionState, SessionError, TransportSession};

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Input to the orchestrator's state machine.
#[derive(Debug)]
pub enum Event {
    /// A frame delivered by the relay client.
    Relay(RelayFrame),
    /// The transport session discovered one of its own candidates.
    LocalCandidate(IceCandidate),
    /// The transport session changed connection state.
    ConnectionState(ConnectionState),
    /// Act as the offering side toward this peer.
    Connect(PeerId),
    /// Close the transport session and stop.
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    /// No remote peer known yet.
    Idle,
    /// Remote captured; descriptions and candidates in flight.
    Negotiating,
    /// Transport session reported connected.
    Established,
    /// Terminal.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Negotiation progress with one remote peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationSession {
    pub state: NegotiationState,
    pub remote: Option<PeerId>,
}

impl NegotiationSession {
    #[must_use]
    pub fn new() -> Self {
        Self { state: NegotiationState::Idle, remote: None }
    }

    /// Remote identity, while the session is not closed.
    fn active_remote(&self) -> Option<&str> {
        if self.state == NegotiationState::Closed {
            return None;
        }
        self.remote.as_deref()
    }
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    local_id: PeerId,
    session: NegotiationSession,
    transport: Arc<dyn TransportSession>,
    relay: Arc<dyn RelaySink>,
}

impl Orchestrator {
    pub fn new(local_id: impl Into<PeerId>, transport: Arc<dyn TransportSession>, relay: Arc<dyn RelaySink>) -> Self {
        Self { local_id: local_id.into(), session: NegotiationSession::new(), transport, relay }
    }

    #[must_use]
    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.session.state
    }

    /// Consume events until the session closes or the queue ends. Returns
    /// the final session.
    pub async fn run(mut self, mut events: EventReceiver) -> NegotiationSession {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.session.state == NegotiationState::Closed {
                return self.session;
            }
        }
        self.shutdown().await;
        self.session
    }

    /// Apply one event to the state machine.
    pub async fn handle(&mut self, event: Event) {
        if self.session.state == NegotiationState::Closed {
            debug!(local = %self.local_id, ?event, "negotiation: closed, ignoring event");
            return;
        }
        match event {
            Event::Relay(frame) => self.on_relay_frame(frame).await,
            Event::LocalCandidate(candidate) => self.on_local_candidate(candidate).await,
            Event::ConnectionState(state) => self.on_connection_state(state).await,
            Event::Connect(remote) => self.connect_to(remote).await,
            Event::Shutdown => self.shutdown().await,
        }
    }

    // =========================================================================
    // RELAY INPUT
    // =========================================================================

    async fn on_relay_frame(&mut self, frame: RelayFrame) {
        if frame.cmd != Command::Signal {
            debug!(local = %self.local_id, cmd = frame.cmd.as_i64(), "negotiation: ignoring non-signal frame");
            return;
        }
        let envelope = match frame.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(local = %self.local_id, error = %e, "negotiation: invalid envelope");
                return;
            }
        };
        if envelope.to_peer_id != self.local_id {
            warn!(local = %self.local_id, to = %envelope.to_peer_id, "negotiation: envelope for another peer, dropping");
            return;
        }

        match envelope.event_name {
            EventName::Offer => self.on_offer(envelope).await,
            EventName::Answer => self.on_answer(envelope).await,
            EventName::IceCandidate => self.on_remote_candidate(envelope).await,
            EventName::Other => {
                debug!(local = %self.local_id, from = %envelope.from_peer_id, "negotiation: unknown event, ignoring");
            }
        }
    }

    async fn on_offer(&mut self, envelope: SignalingEnvelope) {
        let from = envelope.from_peer_id.clone();
        if let Some(remote) = self.session.active_remote() {
            if remote != from && self.session.state != NegotiationState::Idle {
                warn!(local = %self.local_id, %remote, %from, "negotiation: offer from another peer while busy, dropping");
                return;
            }
        }

        match self.answer_offer(&from, &envelope).await {
            Ok(()) => {
                self.session.remote = Some(from.clone());
                if self.session.state == NegotiationState::Idle {
                    self.session.state = NegotiationState::Negotiating;
                }
                info!(local = %self.local_id, remote = %from, "negotiation: answered offer");
            }
            Err(e) => warn!(local = %self.local_id, remote = %from, error = %e, "negotiation: offer aborted"),
        }
    }

    async fn answer_offer(&self, from: &str, envelope: &SignalingEnvelope) -> Result<(), NegotiationError> {
        let offer = envelope.session_description()?;
        self.transport.set_remote_description(offer).await?;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.send_description(from, &answer).await
    }

    async fn on_answer(&mut self, envelope: SignalingEnvelope) {
        let from = &envelope.from_peer_id;
        let expected = self.session.state == NegotiationState::Negotiating
            && self.session.remote.as_deref() == Some(from.as_str());
        if !expected {
            warn!(local = %self.local_id, %from, state = ?self.session.state, "negotiation: unexpected answer, dropping");
            return;
        }

        let result: Result<(), NegotiationError> = async {
            let answer = envelope.session_description()?;
            self.transport.set_remote_description(answer).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => info!(local = %self.local_id, remote = %from, "negotiation: applied answer"),
            Err(e) => warn!(local = %self.local_id, remote = %from, error = %e, "negotiation: answer rejected"),
        }
    }

    async fn on_remote_candidate(&mut self, envelope: SignalingEnvelope) {
        let from = &envelope.from_peer_id;
        match self.session.active_remote() {
            None => {
                debug!(local = %self.local_id, %from, "negotiation: candidate before remote known, dropping");
                return;
            }
            Some(remote) if remote != from => {
                warn!(local = %self.local_id, %remote, %from, "negotiation: candidate from another peer, dropping");
                return;
            }
            Some(_) => {}
        }

        let candidate = match envelope.ice_candidate() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(local = %self.local_id, %from, error = %e, "negotiation: invalid candidate");
                return;
            }
        };
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!(local = %self.local_id, %from, error = %e, "negotiation: candidate rejected");
        }
    }

    // =========================================================================
    // TRANSPORT SESSION INPUT
    // =========================================================================

    async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        let Some(remote) = self.session.active_remote() else {
            debug!(local = %self.local_id, "negotiation: local candidate before remote known, dropping");
            return;
        };
        let remote = remote.to_owned();

        match SignalingEnvelope::candidate(&self.local_id, &remote, &candidate).and_then(|env| RelayFrame::signal(&env)) {
            Ok(frame) => self.relay.send(frame).await,
            Err(e) => warn!(local = %self.local_id, %remote, error = %e, "negotiation: failed to encode candidate"),
        }
    }

    async fn on_connection_state(&mut self, state: ConnectionState) {
        info!(local = %self.local_id, remote = ?self.session.remote, ?state, "negotiation: connection state");

        if state.is_terminal() {
            self.shutdown().await;
            return;
        }
        if state == ConnectionState::Connected && self.session.state == NegotiationState::Negotiating {
            self.session.state = NegotiationState::Established;
        }
    }

    // =========================================================================
    // LOCAL COMMANDS
    // =========================================================================

    async fn connect_to(&mut self, remote: PeerId) {
        if self.session.state != NegotiationState::Idle {
            warn!(local = %self.local_id, %remote, state = ?self.session.state, "negotiation: already negotiating, ignoring connect");
            return;
        }

        let result: Result<(), NegotiationError> = async {
            let offer = self.transport.create_offer().await?;
            self.transport.set_local_description(offer.clone()).await?;
            self.send_description(&remote, &offer).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(local = %self.local_id, %remote, "negotiation: sent offer");
                self.session.remote = Some(remote);
                self.session.state = NegotiationState::Negotiating;
            }
            Err(e) => warn!(local = %self.local_id, %remote, error = %e, "negotiation: offer failed"),
        }
    }

    async fn shutdown(&mut self) {
        if self.session.state == NegotiationState::Closed {
            return;
        }
        self.session.state = NegotiationState::Closed;
        if let Err(e) = self.transport.close().await {
            warn!(local = %self.local_id, error = %e, "negotiation: transport close failed");
        }
        info!(local = %self.local_id, "negotiation: closed");
    }

    async fn send_description(&self, to: &str, description: &SessionDescription) -> Result<(), NegotiationError> {
        let envelope = SignalingEnvelope::description(&self.local_id, to, description)?;
        let frame = RelayFrame::signal(&envelope)?;
        self.relay.send(frame).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
