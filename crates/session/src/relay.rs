//! Signaling relay construction for interviews.

use recruit_signaling::{
    PeerConnection, PeerEvent, RelayClient, RelayHandle, RelayUpdate, Role, SignalingError,
    SignalingTransport, WsTransport,
};
use tokio::sync::mpsc;

use crate::config::SessionConfig;

/// Open the WebSocket at `SIGNALING_URL` and start a relay client with
/// the configured rejoin budget.
pub async fn connect_relay<P>(
    config: &SessionConfig,
    role: Role,
    peer: P,
    peer_events: mpsc::Receiver<PeerEvent>,
) -> Result<(RelayHandle, mpsc::Receiver<RelayUpdate>), SignalingError>
where
    P: PeerConnection + 'static,
{
    let url = config
        .signaling_url
        .as_deref()
        .ok_or_else(|| SignalingError::Connection("SIGNALING_URL is not set".into()))?;
    let transport = WsTransport::connect(url).await?;
    Ok(spawn_relay(config, role, transport, peer, peer_events))
}

/// Start a relay client over an already open transport.
pub fn spawn_relay<T, P>(
    config: &SessionConfig,
    role: Role,
    transport: T,
    peer: P,
    peer_events: mpsc::Receiver<PeerEvent>,
) -> (RelayHandle, mpsc::Receiver<RelayUpdate>)
where
    T: SignalingTransport + 'static,
    P: PeerConnection + 'static,
{
    tracing::info!(
        ?role,
        reconnect_attempts = config.reconnect_attempts,
        "Starting signaling relay",
    );
    RelayClient::spawn(transport, peer, peer_events, config.relay_config(role))
}
