//! Signaling state machine.
//!
//! [`RelayState`] holds everything the relay knows about the negotiation
//! and turns each input (a signaling message, a peer event, a command)
//! into a list of [`RelayAction`]s. It performs no I/O; the
//! [`RelayClient`](crate::RelayClient) executes the actions in order and
//! feeds the results back through the `*_created` / `*_applied` methods.
//!
//! Duplicate delivery of offers, answers and ICE candidates is a no-op.
//! Candidates that arrive before the remote description is set are held
//! back and released, in arrival order, once it is.

use std::collections::HashSet;

use recruit_core::connection::{ConnectionState, MediaFlags, PeerStatus, QualityMetrics};

use crate::messages::{IceCandidate, SignalMessage};
use crate::reconnect::{FailureVerdict, ReconnectBudget, ReconnectPolicy};

/// Pre-assigned negotiation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer when the remote peer joins.
    Caller,
    /// Waits for the remote offer and answers it.
    Callee,
}

/// Side effects requested by [`RelayState`].
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    Send(SignalMessage),
    /// Create a local offer; report it via [`RelayState::offer_created`].
    CreateOffer,
    /// Apply the remote offer and answer it; report via
    /// [`RelayState::answer_created`].
    AcceptOffer(String),
    /// Apply the remote answer; report via [`RelayState::answer_applied`].
    ApplyAnswer(String),
    AddCandidate(IceCandidate),
    /// Discard the current peer connection and start a new one.
    ResetPeer,
    /// Full rejoin: reopen the channel, reset the peer, then call
    /// [`RelayState::rejoin_ready`].
    Rejoin { attempt: u32 },
    /// Forward the connection state to the session.
    Publish(ConnectionState),
    /// The reconnect budget is spent.
    Fatal(String),
}

#[derive(Debug, Default)]
struct Negotiation {
    local_offer_sent: bool,
    /// SDP of the remote offer or answer we accepted.
    remote_sdp: Option<String>,
    remote_applied: bool,
    seen_candidates: HashSet<IceCandidate>,
    pending_candidates: Vec<IceCandidate>,
}

#[derive(Debug)]
pub struct RelayState {
    peer_id: String,
    role: Role,
    room_id: Option<String>,
    remote_peer: Option<String>,
    negotiation: Negotiation,
    connection: ConnectionState,
    budget: ReconnectBudget,
    fatal: bool,
    closed: bool,
}

impl RelayState {
    pub fn new(peer_id: impl Into<String>, role: Role, policy: ReconnectPolicy) -> Self {
        Self {
            peer_id: peer_id.into(),
            role,
            room_id: None,
            remote_peer: None,
            negotiation: Negotiation::default(),
            connection: ConnectionState::default(),
            budget: ReconnectBudget::new(policy),
            fatal: false,
            closed: false,
        }
    }

    // ---- commands ----

    /// Enter `room_id`.
    pub fn join(&mut self, room_id: impl Into<String>) -> Vec<RelayAction> {
        if self.closed {
            return Vec::new();
        }
        let room_id = room_id.into();
        self.room_id = Some(room_id.clone());
        self.negotiation = Negotiation::default();
        vec![RelayAction::Send(SignalMessage::Join {
            room_id,
            peer_id: self.peer_id.clone(),
        })]
    }

    /// Leave the room. Later inputs are ignored.
    pub fn leave(&mut self) -> Vec<RelayAction> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        match self.room_id.clone() {
            Some(room_id) => vec![RelayAction::Send(SignalMessage::Leave {
                room_id,
                peer_id: self.peer_id.clone(),
            })],
            None => Vec::new(),
        }
    }

    pub fn set_media(&mut self, media: MediaFlags) -> Vec<RelayAction> {
        self.connection.media = media;
        vec![RelayAction::Publish(self.connection)]
    }

    // ---- signaling input ----

    pub fn handle_message(&mut self, message: SignalMessage) -> Vec<RelayAction> {
        if self.closed || self.room_id.as_deref() != Some(message.room_id()) {
            return Vec::new();
        }
        if message.peer_id() == self.peer_id {
            return Vec::new();
        }

        match message {
            SignalMessage::Join { peer_id, .. } | SignalMessage::PeerJoined { peer_id, .. } => {
                self.on_remote_joined(peer_id)
            }
            SignalMessage::Leave { peer_id, .. } => {
                if self.remote_peer.as_deref() == Some(peer_id.as_str()) {
                    tracing::info!(peer_id = %peer_id, "Remote peer left the room");
                    self.remote_peer = None;
                }
                Vec::new()
            }
            SignalMessage::Offer { peer_id, sdp, .. } => self.on_offer(peer_id, sdp),
            SignalMessage::Answer { sdp, .. } => self.on_answer(sdp),
            SignalMessage::IceCandidate { candidate, .. } => self.on_remote_candidate(candidate),
        }
    }

    fn on_remote_joined(&mut self, peer_id: String) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        // A peer that joins while we hold negotiation state is rejoining;
        // start over with a fresh connection.
        let stale = self.negotiation.local_offer_sent || self.negotiation.remote_sdp.is_some();
        if stale {
            tracing::info!(peer_id = %peer_id, "Remote peer rejoined, resetting negotiation");
            self.negotiation = Negotiation::default();
            actions.push(RelayAction::ResetPeer);
        }

        self.remote_peer = Some(peer_id);
        if self.role == Role::Caller {
            actions.push(RelayAction::CreateOffer);
        }
        actions
    }

    fn on_offer(&mut self, peer_id: String, sdp: String) -> Vec<RelayAction> {
        if self.role == Role::Caller {
            tracing::warn!(peer_id = %peer_id, "Caller received an offer, ignoring");
            return Vec::new();
        }
        match self.negotiation.remote_sdp.as_deref() {
            Some(applied) if applied == sdp => Vec::new(),
            Some(_) => {
                tracing::warn!(peer_id = %peer_id, "Renegotiation offer ignored");
                Vec::new()
            }
            None => {
                self.remote_peer = Some(peer_id);
                self.negotiation.remote_sdp = Some(sdp.clone());
                vec![RelayAction::AcceptOffer(sdp)]
            }
        }
    }

    fn on_answer(&mut self, sdp: String) -> Vec<RelayAction> {
        if !self.negotiation.local_offer_sent {
            tracing::warn!("Answer received without a local offer, ignoring");
            return Vec::new();
        }
        match self.negotiation.remote_sdp.as_deref() {
            Some(applied) if applied == sdp => Vec::new(),
            Some(_) => {
                tracing::warn!("Second answer with different SDP ignored");
                Vec::new()
            }
            None => {
                self.negotiation.remote_sdp = Some(sdp.clone());
                vec![RelayAction::ApplyAnswer(sdp)]
            }
        }
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<RelayAction> {
        if !self.negotiation.seen_candidates.insert(candidate.clone()) {
            return Vec::new();
        }
        if self.negotiation.remote_applied {
            vec![RelayAction::AddCandidate(candidate)]
        } else {
            self.negotiation.pending_candidates.push(candidate);
            Vec::new()
        }
    }

    // ---- results of executed actions ----

    pub fn offer_created(&mut self, sdp: String) -> Vec<RelayAction> {
        let Some(room_id) = self.room_id.clone() else {
            return Vec::new();
        };
        self.negotiation.local_offer_sent = true;
        vec![RelayAction::Send(SignalMessage::Offer {
            room_id,
            peer_id: self.peer_id.clone(),
            sdp,
        })]
    }

    pub fn answer_created(&mut self, sdp: String) -> Vec<RelayAction> {
        let Some(room_id) = self.room_id.clone() else {
            return Vec::new();
        };
        let mut actions = vec![RelayAction::Send(SignalMessage::Answer {
            room_id,
            peer_id: self.peer_id.clone(),
            sdp,
        })];
        actions.extend(self.release_pending_candidates());
        actions
    }

    pub fn answer_applied(&mut self) -> Vec<RelayAction> {
        self.release_pending_candidates()
    }

    /// Applying a remote description failed; forget it so a redelivered
    /// message can try again.
    pub fn negotiation_failed(&mut self) {
        self.negotiation.remote_sdp = None;
        self.negotiation.remote_applied = false;
    }

    fn release_pending_candidates(&mut self) -> Vec<RelayAction> {
        self.negotiation.remote_applied = true;
        self.negotiation
            .pending_candidates
            .drain(..)
            .map(RelayAction::AddCandidate)
            .collect()
    }

    // ---- peer events ----

    pub fn local_candidate(&mut self, candidate: IceCandidate) -> Vec<RelayAction> {
        match (&self.room_id, self.closed) {
            (Some(room_id), false) => vec![RelayAction::Send(SignalMessage::IceCandidate {
                room_id: room_id.clone(),
                peer_id: self.peer_id.clone(),
                candidate,
            })],
            _ => Vec::new(),
        }
    }

    /// Forward a peer-connection state change. Entering `failed` spends
    /// the reconnect budget or, once it is gone, reports a fatal failure.
    pub fn on_peer_status(&mut self, status: PeerStatus) -> Vec<RelayAction> {
        if status == self.connection.peer {
            return Vec::new();
        }
        self.connection.peer = status;

        let mut actions = vec![RelayAction::Publish(self.connection)];
        if status == PeerStatus::Failed && !self.closed {
            actions.extend(self.on_failure("peer connection failed"));
        }
        actions
    }

    pub fn on_quality(&mut self, quality: QualityMetrics) -> Vec<RelayAction> {
        self.connection.quality = quality;
        vec![RelayAction::Publish(self.connection)]
    }

    /// The signaling channel dropped underneath us.
    pub fn on_signaling_lost(&mut self) -> Vec<RelayAction> {
        if self.closed {
            return Vec::new();
        }
        self.on_failure("signaling channel lost")
    }

    /// The channel and peer have been reset; re-enter the room.
    ///
    /// The remote peer is still in the room and will not announce itself
    /// again, so a caller that knows it offers straight away.
    pub fn rejoin_ready(&mut self) -> Vec<RelayAction> {
        let room_id = match self.room_id.clone() {
            Some(room_id) if !self.closed => room_id,
            _ => return Vec::new(),
        };
        let mut actions = self.join(room_id);
        if self.role == Role::Caller && self.remote_peer.is_some() {
            actions.push(RelayAction::CreateOffer);
        }
        actions
    }

    /// Reopening the channel or resetting the peer failed.
    pub fn rejoin_failed(&mut self, reason: &str) -> Vec<RelayAction> {
        if self.closed {
            return Vec::new();
        }
        self.on_failure(reason)
    }

    fn on_failure(&mut self, reason: &str) -> Vec<RelayAction> {
        if self.fatal {
            return Vec::new();
        }
        match self.budget.on_failure() {
            FailureVerdict::Rejoin { attempt } => {
                tracing::warn!(attempt, reason, "Connection failed, rejoining");
                // The rejoin starts a fresh peer connection.
                self.connection.peer = PeerStatus::New;
                vec![RelayAction::Rejoin { attempt }]
            }
            FailureVerdict::GiveUp { attempts } => {
                tracing::error!(attempts, reason, "Connection failed after reconnect");
                self.fatal = true;
                vec![RelayAction::Fatal(format!(
                    "{reason} after {attempts} reconnect attempt(s)"
                ))]
            }
        }
    }

    // ---- accessors ----

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.budget.attempts_used()
    }

    pub fn reconnect_delay(&self) -> std::time::Duration {
        self.budget.delay()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
