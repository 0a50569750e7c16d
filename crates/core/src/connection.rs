//! Peer connection state shared by the signaling relay and the UI.

use serde::{Deserialize, Serialize};

/// Mirrors the browser's `RTCPeerConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Local media enablement flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub camera: bool,
    pub microphone: bool,
    pub speaker: bool,
}

/// Coarse link quality, sampled from peer-connection stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Round-trip time in milliseconds.
    pub latency_ms: Option<u32>,
    /// Available outgoing bandwidth estimate in kbit/s.
    pub bandwidth_kbps: Option<u32>,
}

/// Snapshot published on every underlying peer-connection event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub peer: PeerStatus,
    pub media: MediaFlags,
    pub quality: QualityMetrics,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            peer: PeerStatus::New,
            media: MediaFlags::default(),
            quality: QualityMetrics::default(),
        }
    }
}
