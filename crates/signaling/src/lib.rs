//! WebRTC signaling relay client.
//!
//! Translates signaling messages arriving over a bidirectional channel
//! into peer-connection operations (offer / answer / ICE) and forwards
//! peer-connection state changes to the session controller.
//!
//! - [`messages`]: typed wire envelopes and parser.
//! - [`transport`]: the channel abstraction and its WebSocket
//!   implementation.
//! - [`peer`]: the `RTCPeerConnection` capability trait.
//! - [`relay`]: the pure transition functions.
//! - [`reconnect`]: the bounded rejoin budget.
//! - [`client`]: the async driver and its handle.

pub mod client;
pub mod messages;
pub mod peer;
pub mod reconnect;
pub mod relay;
pub mod transport;

pub use client::{RelayClient, RelayCommand, RelayConfig, RelayHandle, RelayUpdate};
pub use messages::{IceCandidate, SignalMessage};
pub use peer::{PeerConnection, PeerError, PeerEvent};
pub use relay::{RelayAction, RelayState, Role};
pub use transport::{SignalingError, SignalingTransport, WsTransport};
