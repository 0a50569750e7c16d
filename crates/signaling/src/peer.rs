//! Peer connection capability.
//!
//! [`PeerConnection`] stands in for the browser's `RTCPeerConnection` so
//! the relay logic can be driven by a real WebRTC stack or by a test
//! double. Asynchronous notifications from the implementation (locally
//! gathered candidates, state changes, stats) arrive as [`PeerEvent`]s
//! on an `mpsc` channel handed to the [`RelayClient`](crate::RelayClient).

use async_trait::async_trait;
use recruit_core::connection::{MediaFlags, PeerStatus, QualityMetrics};

use crate::messages::IceCandidate;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Creating or applying a session description failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The candidate was rejected by the ICE agent.
    #[error("Invalid ICE candidate: {0}")]
    Candidate(String),

    #[error("Peer connection closed")]
    Closed,
}

/// Notifications emitted by a [`PeerConnection`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local ICE candidate to forward to the remote peer.
    LocalCandidate(IceCandidate),
    /// `connectionstatechange`.
    StateChanged(PeerStatus),
    /// Periodic stats sample.
    Quality(QualityMetrics),
}

#[async_trait]
pub trait PeerConnection: Send {
    /// Create an offer, set it as the local description and return its SDP.
    async fn create_offer(&mut self) -> Result<String, PeerError>;

    /// Apply a remote offer, then create and set the answer. Returns the
    /// answer SDP.
    async fn accept_offer(&mut self, sdp: &str) -> Result<String, PeerError>;

    /// Apply the remote answer to our offer.
    async fn apply_answer(&mut self, sdp: &str) -> Result<(), PeerError>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), PeerError>;

    /// Enable or disable the outgoing tracks.
    async fn set_media(&mut self, flags: MediaFlags) -> Result<(), PeerError>;

    /// Tear down the underlying connection and start a fresh one with the
    /// same local tracks.
    async fn reset(&mut self) -> Result<(), PeerError>;

    async fn close(&mut self);
}
