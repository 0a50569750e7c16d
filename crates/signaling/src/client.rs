//! Async driver for the signaling relay.
//!
//! [`RelayClient::spawn`] moves a transport and a peer connection into a
//! background task that multiplexes three inputs with `tokio::select!`:
//!
//! - commands from the session ([`RelayCommand`] via [`RelayHandle`]),
//! - envelopes from the [`SignalingTransport`],
//! - [`PeerEvent`]s from the [`PeerConnection`] implementation.
//!
//! Every input goes through [`RelayState`]; the resulting actions are
//! executed in order. Connection updates flow back to the session as
//! [`RelayUpdate`]s.

use std::collections::VecDeque;
use std::time::Duration;

use recruit_core::connection::{ConnectionState, MediaFlags};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::peer::{PeerConnection, PeerEvent};
use crate::reconnect::ReconnectPolicy;
use crate::relay::{RelayAction, RelayState, Role};
use crate::transport::{SignalingError, SignalingTransport};

/// Command channel capacity.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Update channel capacity.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// How long [`RelayHandle::close`] waits for the task to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one relay client.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub role: Role,
    /// Our id in the room. Defaults to a random UUID.
    pub peer_id: String,
    pub reconnect: ReconnectPolicy,
}

impl RelayConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            peer_id: uuid::Uuid::new_v4().to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Commands accepted by the relay task.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayCommand {
    Join(String),
    SetMedia(MediaFlags),
    /// Leave the room, close the peer connection, then the socket.
    Close,
}

/// Updates emitted by the relay task.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayUpdate {
    State(ConnectionState),
    /// Reconnect budget exhausted; the session cannot continue.
    Fatal(String),
    /// The task has shut down.
    Closed,
}

/// Session-side handle to a running relay task.
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Wrap a command sender. Used by [`RelayClient::spawn`] and by tests
    /// that stand in for the relay task.
    pub fn new(commands: mpsc::Sender<RelayCommand>) -> Self {
        Self {
            commands,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub async fn join(&self, room_id: impl Into<String>) -> Result<(), SignalingError> {
        self.send(RelayCommand::Join(room_id.into())).await
    }

    pub async fn set_media(&self, flags: MediaFlags) -> Result<(), SignalingError> {
        self.send(RelayCommand::SetMedia(flags)).await
    }

    /// Close the peer connection and the socket, waiting up to five
    /// seconds for the task to exit before aborting it. Safe to call more
    /// than once.
    ///
    /// Cancellation also interrupts a rejoin that is still waiting on the
    /// relay.
    pub async fn close(&mut self) {
        // The task may already be gone; that is the state we want.
        let _ = self.commands.try_send(RelayCommand::Close);
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("Relay task did not stop in time, aborting");
                task.abort();
            }
        }
    }

    async fn send(&self, command: RelayCommand) -> Result<(), SignalingError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SignalingError::Closed)
    }
}

/// Background task state.
pub struct RelayClient<T, P> {
    transport: T,
    peer: P,
    state: RelayState,
    commands: mpsc::Receiver<RelayCommand>,
    peer_events: mpsc::Receiver<PeerEvent>,
    updates: mpsc::Sender<RelayUpdate>,
    cancel: CancellationToken,
    /// `false` while the socket is down and no rejoin has reopened it.
    transport_up: bool,
}

impl<T, P> RelayClient<T, P>
where
    T: SignalingTransport + 'static,
    P: PeerConnection + 'static,
{
    /// Start the relay task.
    ///
    /// `peer_events` is the receiving end of the channel the peer
    /// implementation publishes its [`PeerEvent`]s on.
    pub fn spawn(
        transport: T,
        peer: P,
        peer_events: mpsc::Receiver<PeerEvent>,
        config: RelayConfig,
    ) -> (RelayHandle, mpsc::Receiver<RelayUpdate>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let client = Self {
            transport,
            peer,
            state: RelayState::new(config.peer_id, config.role, config.reconnect),
            commands: command_rx,
            peer_events,
            updates: update_tx,
            cancel: cancel.clone(),
            transport_up: true,
        };

        let task = tokio::spawn(client.run());
        let handle = RelayHandle {
            commands: command_tx,
            cancel,
            task: Some(task),
        };
        (handle, update_rx)
    }

    async fn run(mut self) {
        tracing::info!(peer_id = %self.state.peer_id(), "Relay client started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RelayCommand::Join(room_id)) => {
                        tracing::info!(room_id = %room_id, "Joining room");
                        let actions = self.state.join(room_id);
                        self.execute(actions).await;
                    }
                    Some(RelayCommand::SetMedia(flags)) => {
                        if let Err(e) = self.peer.set_media(flags).await {
                            tracing::warn!(error = %e, "Failed to apply media flags");
                        }
                        let actions = self.state.set_media(flags);
                        self.execute(actions).await;
                    }
                    Some(RelayCommand::Close) | None => break,
                },
                received = self.transport.recv(), if self.transport_up => match received {
                    Ok(Some(message)) => {
                        tracing::debug!(kind = message.kind(), from = %message.peer_id(), "Signal received");
                        let actions = self.state.handle_message(message);
                        self.execute(actions).await;
                    }
                    Ok(None) => {
                        tracing::warn!("Signaling channel closed by relay");
                        self.transport_up = false;
                        let actions = self.state.on_signaling_lost();
                        self.execute(actions).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Signaling receive error");
                        self.transport_up = false;
                        let actions = self.state.on_signaling_lost();
                        self.execute(actions).await;
                    }
                },
                event = self.peer_events.recv() => match event {
                    Some(event) => {
                        let actions = match event {
                            PeerEvent::LocalCandidate(candidate) => self.state.local_candidate(candidate),
                            PeerEvent::StateChanged(status) => {
                                tracing::info!(?status, "Peer connection state changed");
                                self.state.on_peer_status(status)
                            }
                            PeerEvent::Quality(quality) => self.state.on_quality(quality),
                        };
                        self.execute(actions).await;
                    }
                    None => {
                        tracing::debug!("Peer event channel closed");
                        // Without peer events there is nothing left to relay.
                        break;
                    }
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        self.shutdown().await;
    }

    /// Execute actions in order; results of peer operations may append
    /// follow-up actions.
    async fn execute(&mut self, actions: Vec<RelayAction>) {
        let mut queue: VecDeque<RelayAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                RelayAction::Send(message) => {
                    if !self.transport_up {
                        tracing::debug!(kind = message.kind(), "Dropping signal while channel is down");
                        continue;
                    }
                    if let Err(e) = self.transport.send(&message).await {
                        tracing::error!(error = %e, kind = message.kind(), "Failed to send signal");
                        self.transport_up = false;
                        queue.extend(self.state.on_signaling_lost());
                    }
                }
                RelayAction::CreateOffer => match self.peer.create_offer().await {
                    Ok(sdp) => queue.extend(self.state.offer_created(sdp)),
                    Err(e) => tracing::error!(error = %e, "Failed to create offer"),
                },
                RelayAction::AcceptOffer(sdp) => match self.peer.accept_offer(&sdp).await {
                    Ok(answer) => queue.extend(self.state.answer_created(answer)),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to answer offer");
                        self.state.negotiation_failed();
                    }
                },
                RelayAction::ApplyAnswer(sdp) => match self.peer.apply_answer(&sdp).await {
                    Ok(()) => queue.extend(self.state.answer_applied()),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to apply answer");
                        self.state.negotiation_failed();
                    }
                },
                RelayAction::AddCandidate(candidate) => {
                    if let Err(e) = self.peer.add_ice_candidate(&candidate).await {
                        tracing::warn!(error = %e, "Failed to add ICE candidate");
                    }
                }
                RelayAction::ResetPeer => {
                    if let Err(e) = self.peer.reset().await {
                        tracing::error!(error = %e, "Failed to reset peer connection");
                    }
                }
                RelayAction::Rejoin { attempt } => {
                    queue.extend(self.rejoin(attempt).await);
                }
                RelayAction::Publish(state) => {
                    self.emit(RelayUpdate::State(state)).await;
                }
                RelayAction::Fatal(reason) => {
                    self.emit(RelayUpdate::Fatal(reason)).await;
                }
            }
        }
    }

    /// Full rejoin: reopen the socket, reset the peer, re-enter the room.
    async fn rejoin(&mut self, attempt: u32) -> Vec<RelayAction> {
        let delay = self.state.reconnect_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Vec::new(),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(attempt, room_id = ?self.state.room_id(), "Rejoining room");

        let reconnected = tokio::select! {
            _ = self.cancel.cancelled() => return Vec::new(),
            result = self.transport.reconnect() => result,
        };
        if let Err(e) = reconnected {
            return self.state.rejoin_failed(&e.to_string());
        }
        self.transport_up = true;

        let reset = tokio::select! {
            _ = self.cancel.cancelled() => return Vec::new(),
            result = self.peer.reset() => result,
        };
        if let Err(e) = reset {
            return self.state.rejoin_failed(&e.to_string());
        }

        self.state.rejoin_ready()
    }

    async fn emit(&mut self, update: RelayUpdate) {
        if self.updates.send(update).await.is_err() {
            tracing::debug!("Relay update receiver dropped");
        }
    }

    /// Leave the room, then close the peer connection, then the socket.
    async fn shutdown(&mut self) {
        let actions = self.state.leave();
        self.execute(actions).await;
        self.peer.close().await;
        self.transport.close().await;
        self.cancel.cancel();
        self.emit(RelayUpdate::Closed).await;
        tracing::info!(peer_id = %self.state.peer_id(), "Relay client stopped");
    }
}
