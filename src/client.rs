//! Outbound connection management: dialing the server, the
//! connect/reconnect state machine, and the heartbeat.
//!
//! The client owns exactly one connection. Edits performed while
//! disconnected reach the replication actor but are dispatched to zero
//! connections, i.e. silently dropped rather than queued.

use crate::config::SyncConfig;
use crate::connection::{spawn_connection, PeerRole};
use crate::sync::{BoardActorHandle, BoardMessage};
use crate::types::Notification;
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

enum ClientCommand {
    Connect {
        response_tx: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        response_tx: oneshot::Sender<()>,
    },
}

struct ClientActor {
    host: String,
    port: u16,
    prefer_ipv6: bool,
    config: SyncConfig,
    board: BoardActorHandle,
    command_rx: mpsc::Receiver<ClientCommand>,
    state_tx: watch::Sender<ClientState>,
    notifications: broadcast::Receiver<Notification>,
    connection_token: Option<CancellationToken>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ClientActor {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(ClientCommand::Connect { response_tx }) => {
                            let result = self.connect().await;
                            let _ = response_tx.send(result);
                        }
                        Some(ClientCommand::Disconnect { response_tx }) => {
                            self.disconnect();
                            let _ = response_tx.send(());
                        }
                        None => break,
                    }
                }
                notification = self.notifications.recv() => {
                    match notification {
                        Ok(Notification::ConnectionToServerLost) => self.handle_loss(),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Fine; we only care about the loss marker and
                            // lagging drops the oldest entries first.
                            debug!("Notification channel lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        self.disconnect();
    }

    async fn connect(&mut self) -> Result<()> {
        if *self.state_tx.borrow() != ClientState::Disconnected {
            debug!("Ignoring connect request, already {:?}", *self.state_tx.borrow());
            return Ok(());
        }
        let _ = self.state_tx.send(ClientState::Connecting);
        info!("Connecting to {}:{}...", self.host, self.port);

        match self.dial().await {
            Ok(stream) => {
                let id = self.board.next_connection_id();
                let token =
                    spawn_connection(stream, id, PeerRole::Dialed, self.board.clone()).await;
                self.connection_token = Some(token);
                self.start_heartbeat();
                let _ = self.state_tx.send(ClientState::Connected);
                Ok(())
            }
            Err(err) => {
                let _ = self.state_tx.send(ClientState::Disconnected);
                warn!("Failed to connect to {}:{}: {err:#}", self.host, self.port);
                Err(err)
            }
        }
    }

    async fn dial(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to resolve '{}'", self.host))?
            .collect();
        let addr = addrs
            .iter()
            .find(|addr| addr.is_ipv6() == self.prefer_ipv6)
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| anyhow!("'{}' did not resolve to any address", self.host))?;
        TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {addr}"))
    }

    fn start_heartbeat(&mut self) {
        let board = self.board.clone();
        let interval = self.config.heartbeat_interval;
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                board.send_message(BoardMessage::SendPing).await;
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    /// The read task noticed the loss; the board actor has already raised
    /// `ConnectionToServerLost`. The embedding layer decides whether to
    /// reconnect or quit.
    fn handle_loss(&mut self) {
        self.stop_heartbeat();
        self.connection_token = None;
        let _ = self.state_tx.send(ClientState::Disconnected);
    }

    fn disconnect(&mut self) {
        self.stop_heartbeat();
        if let Some(token) = self.connection_token.take() {
            token.cancel();
        }
        let _ = self.state_tx.send(ClientState::Disconnected);
    }
}

/// Talks to the client actor.
#[derive(Clone)]
pub struct ClientHandle {
    command_tx: mpsc::Sender<ClientCommand>,
    state_rx: watch::Receiver<ClientState>,
}

impl ClientHandle {
    #[must_use]
    pub fn new(
        host: String,
        port: u16,
        prefer_ipv6: bool,
        config: SyncConfig,
        board: BoardActorHandle,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let notifications = board.subscribe();

        let mut actor = ClientActor {
            host,
            port,
            prefer_ipv6,
            config,
            board,
            command_rx,
            state_tx,
            notifications,
            connection_token: None,
            heartbeat: None,
        };
        tokio::spawn(async move { actor.run().await });

        Self {
            command_tx,
            state_rx,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Connect { response_tx })
            .await
            .map_err(|_| anyhow!("Client task has been killed"))?;
        response_rx
            .await
            .map_err(|_| anyhow!("Client task has been killed"))?
    }

    /// Re-invokes `connect`. Called by the embedding layer after a loss,
    /// once the user chose to stay.
    pub async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }

    /// Closes the connection deliberately. The usual lifecycle
    /// notifications fire as if the peer had gone away.
    pub async fn disconnect(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ClientCommand::Disconnect { response_tx })
            .await
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state_rx.borrow()
    }
}
