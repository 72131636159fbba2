//! The replication actor: applies local edits and remote events to the
//! board, and fans events out to the connected peers.
//!
//! One actor task owns the board state and the writer half of every live
//! connection. Everything else (accept loop, read loops, heartbeat,
//! embedding UI) reaches it through `BoardActorHandle`, so no state is ever
//! touched from two execution contexts.

use crate::board::Board;
use crate::config::SyncConfig;
use crate::connection::{Connection, ConnectionId, PeerRole};
use crate::objects::{BoardObject, ObjectId};
use crate::types::{Event, Notification, ObjectUpdate, Packet, UserName};
use kurbo::{Point, Vec2};
use std::collections::HashMap;
use std::fmt;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Whether this process is the star hub or one of its spokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

// These messages are sent to the task that owns the board.
pub enum BoardMessage {
    AddObject(BoardObject),
    DeleteObjects {
        ids: Vec<ObjectId>,
        response_tx: oneshot::Sender<Vec<ObjectId>>,
    },
    MoveObjects {
        offset: Vec2,
        ids: Vec<ObjectId>,
    },
    UpdateObject {
        id: ObjectId,
        update: ObjectUpdate,
    },
    SetObjects {
        objects: Vec<BoardObject>,
        broadcast: bool,
    },
    MoveOwnCursor(Point),
    GetObjects {
        response_tx: oneshot::Sender<Vec<BoardObject>>,
    },
    GetUsers {
        response_tx: oneshot::Sender<Vec<UserName>>,
    },
    Connected {
        id: ConnectionId,
        connection: Connection,
    },
    Disconnected(ConnectionId),
    FromConnection(ConnectionId, Packet),
    SendPing,
    CheckHeartbeats,
}

impl fmt::Debug for BoardMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::AddObject(object) => format!("add {} object", object.kind()),
            Self::DeleteObjects { ids, .. } => format!("delete {} objects", ids.len()),
            Self::MoveObjects { ids, .. } => format!("move {} objects", ids.len()),
            Self::UpdateObject { id, .. } => format!("update object {id}"),
            Self::SetObjects { objects, .. } => {
                format!("replace board with {} objects", objects.len())
            }
            Self::MoveOwnCursor(_) => "move own cursor".to_string(),
            Self::GetObjects { .. } => "get objects".to_string(),
            Self::GetUsers { .. } => "get users".to_string(),
            Self::Connected { id, .. } => format!("connection #{id} established"),
            Self::Disconnected(id) => format!("connection #{id} closed"),
            Self::FromConnection(id, _) => format!("packet from connection #{id}"),
            Self::SendPing => "ping".to_string(),
            Self::CheckHeartbeats => "check heartbeats".to_string(),
        };
        write!(f, "{repr}")
    }
}

/// This actor is responsible for applying changes to the board
/// asynchronously. Any `BoardMessage` that is emitted via
/// `BoardActorHandle` should have an effect eventually.
pub struct BoardActor {
    message_rx: mpsc::Receiver<BoardMessage>,
    notification_tx: broadcast::Sender<Notification>,
    board: Board,
    connections: HashMap<ConnectionId, Connection>,
    /// Which user name announced itself on which connection, so presence
    /// can be cleaned up when the connection goes away.
    peer_names: HashMap<ConnectionId, UserName>,
    role: Role,
    user_name: UserName,
    config: SyncConfig,
    last_cursor_dispatch: Option<Instant>,
}

impl BoardActor {
    #[must_use]
    fn new(
        message_rx: mpsc::Receiver<BoardMessage>,
        notification_tx: broadcast::Sender<Notification>,
        role: Role,
        user_name: UserName,
        config: SyncConfig,
    ) -> Self {
        Self {
            message_rx,
            notification_tx,
            board: Board::new(),
            connections: HashMap::default(),
            peer_names: HashMap::default(),
            role,
            user_name,
            config,
            last_cursor_dispatch: None,
        }
    }

    async fn handle_message(&mut self, message: BoardMessage) {
        debug!("Handling board message: {message:?}");
        match message {
            BoardMessage::AddObject(object) => {
                let id = self.board.add_object(object.clone());
                self.notify(Notification::ObjectAdded(id));
                self.dispatch(Event::AddObject(object), None).await;
            }
            BoardMessage::DeleteObjects { ids, response_tx } => {
                let removed = self.board.delete_objects(&ids);
                if !removed.is_empty() {
                    self.notify(Notification::ObjectsDeleted(removed.clone()));
                    self.dispatch(Event::DeleteObjects(removed.clone()), None)
                        .await;
                }
                let _ = response_tx.send(removed);
            }
            BoardMessage::MoveObjects { offset, ids } => {
                let moved = self.board.move_objects(offset, &ids);
                if !moved.is_empty() {
                    self.notify(Notification::ObjectsMoved {
                        offset,
                        ids: moved.clone(),
                    });
                    self.dispatch(Event::MoveObjects(offset, moved), None).await;
                }
            }
            BoardMessage::UpdateObject { id, update } => {
                if self.board.update_object(id, &update) {
                    self.notify(Notification::ObjectUpdated(id));
                    self.dispatch(Event::UpdateObject(id, update), None).await;
                } else {
                    debug!("Dropping update for unknown or mismatched object {id}");
                }
            }
            BoardMessage::SetObjects { objects, broadcast } => {
                self.board.set_objects(objects.clone());
                self.notify(Notification::BoardReplaced);
                if broadcast {
                    // Receivers get the replacement flagged as
                    // non-replicating, so none of them echoes it onward.
                    self.dispatch(Event::SetObjects(objects, false), None).await;
                }
            }
            BoardMessage::MoveOwnCursor(pos) => {
                if self.cursor_throttle_open() {
                    self.last_cursor_dispatch = Some(Instant::now());
                    self.dispatch(Event::MoveUserCursor(self.user_name.clone(), pos), None)
                        .await;
                }
            }
            BoardMessage::GetObjects { response_tx } => {
                let _ = response_tx.send(self.board.user_objects());
            }
            BoardMessage::GetUsers { response_tx } => {
                let _ = response_tx.send(self.board.users());
            }
            BoardMessage::Connected { id, connection } => {
                self.handle_connected(id, connection).await;
            }
            BoardMessage::Disconnected(id) => {
                // Forced closes remove the entry up front; the read task's
                // follow-up message then refers to an unknown id.
                if self.connections.remove(&id).is_some() {
                    self.report_loss(id);
                }
            }
            BoardMessage::FromConnection(id, packet) => {
                self.handle_packet(id, packet).await;
            }
            BoardMessage::SendPing => {
                self.dispatch_packet(&Packet::PING, None).await;
            }
            BoardMessage::CheckHeartbeats => {
                self.check_heartbeats();
            }
        }
    }

    fn cursor_throttle_open(&self) -> bool {
        self.last_cursor_dispatch
            .map_or(true, |last| last.elapsed() >= self.config.cursor_interval)
    }

    async fn handle_connected(&mut self, id: ConnectionId, mut connection: Connection) {
        match connection.role() {
            PeerRole::Accepted => {
                // Introduce ourselves and bring the newcomer up to date.
                // The snapshot is flagged non-replicating so the newcomer
                // does not echo it back.
                let hello = Packet::Event(Event::AddUser(self.user_name.clone()));
                let snapshot =
                    Packet::Event(Event::SetObjects(self.board.user_objects(), false));
                for packet in [&hello, &snapshot] {
                    if let Err(err) = connection.send(packet).await {
                        warn!("Failed to greet client #{id}: {err}");
                        connection.shutdown();
                        return;
                    }
                }
                info!("Client #{id} connected");
                self.connections.insert(id, connection);
                self.notify(Notification::ClientConnected(id));
            }
            PeerRole::Dialed => {
                // Announce ourselves; the server relays the announcement to
                // every other client.
                let hello = Packet::Event(Event::AddUser(self.user_name.clone()));
                if let Err(err) = connection.send(&hello).await {
                    warn!("Failed to announce to the server: {err}");
                    connection.shutdown();
                    return;
                }
                info!("Connected to server (connection #{id})");
                self.connections.insert(id, connection);
                self.notify(Notification::ConnectedToServer);
            }
        }
    }

    fn report_loss(&mut self, id: ConnectionId) {
        match self.role {
            Role::Server => {
                if let Some(name) = self.peer_names.remove(&id) {
                    info!("Connection of user '{name}' closed (#{id})");
                    if self.board.remove_user(&name) {
                        self.notify(Notification::UserLeft(name));
                    }
                } else {
                    warn!("Connection #{id} closed before announcing a user name");
                }
                self.notify(Notification::ClientConnectionLost(id));
                if self.connections.is_empty() {
                    self.notify(Notification::AllClientConnectionsLost);
                }
            }
            Role::Client => {
                info!("Connection to server lost");
                for name in self.board.clear_users() {
                    self.notify(Notification::UserLeft(name));
                }
                self.notify(Notification::ConnectionToServerLost);
            }
        }
    }

    async fn handle_packet(&mut self, id: ConnectionId, packet: Packet) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.touch();
        }

        // Heartbeats exist purely for liveness and never reach event
        // handling.
        let Packet::Event(event) = packet else {
            return;
        };

        if let Event::AddUser(name) = &event {
            info!("addUser from connection #{id} with name '{name}'");
            self.peer_names.insert(id, name.clone());
        }

        // The hub relays every client event to all other clients. A
        // whole-canvas replacement is re-flagged as non-replicating, since
        // this fan-out already is the replication.
        if self.role == Role::Server {
            let forward = match &event {
                Event::SetObjects(objects, _) => Event::SetObjects(objects.clone(), false),
                other => other.clone(),
            };
            self.dispatch(forward, Some(id)).await;
        }

        self.apply_remote_event(event);
    }

    fn apply_remote_event(&mut self, event: Event) {
        match event {
            Event::AddObject(object) => {
                let id = self.board.add_object(object);
                self.notify(Notification::ObjectAdded(id));
            }
            Event::DeleteObjects(ids) => {
                let removed = self.board.delete_objects(&ids);
                if !removed.is_empty() {
                    self.notify(Notification::ObjectsDeleted(removed));
                }
            }
            Event::MoveObjects(offset, ids) => {
                let moved = self.board.move_objects(offset, &ids);
                if !moved.is_empty() {
                    self.notify(Notification::ObjectsMoved { offset, ids: moved });
                }
            }
            Event::UpdateObject(id, update) => {
                if self.board.update_object(id, &update) {
                    self.notify(Notification::ObjectUpdated(id));
                } else {
                    debug!("Dropping remote update for unknown or mismatched object {id}");
                }
            }
            Event::SetObjects(objects, _) => {
                debug!("setObjects with {} objects", objects.len());
                self.board.set_objects(objects);
                self.notify(Notification::BoardReplaced);
            }
            Event::AddUser(name) => {
                self.board.add_user(&name);
                self.notify(Notification::UserJoined(name));
            }
            Event::MoveUserCursor(name, pos) => {
                // The receiving side is deliberately unthrottled.
                if self.board.move_user_cursor(&name, pos) {
                    self.notify(Notification::UserCursorMoved { name, pos });
                }
            }
        }
    }

    async fn dispatch(&mut self, event: Event, exclude: Option<ConnectionId>) {
        if !matches!(event, Event::MoveUserCursor(..)) {
            let excluded =
                usize::from(exclude.is_some_and(|id| self.connections.contains_key(&id)));
            debug!(
                "dispatching {} to {} connections",
                event.name(),
                self.connections.len() - excluded
            );
        }
        self.dispatch_packet(&Packet::Event(event), exclude).await;
    }

    /// Sends a packet to every live connection except `exclude`. A
    /// connection that fails to accept the write is dropped on the spot.
    async fn dispatch_packet(&mut self, packet: &Packet, exclude: Option<ConnectionId>) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            if Some(id) == exclude {
                continue;
            }
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };
            if let Err(err) = connection.send(packet).await {
                warn!("Failed to send to connection #{id}, dropping it: {err}");
                connection.shutdown();
                self.connections.remove(&id);
                self.report_loss(id);
            }
        }
    }

    fn check_heartbeats(&mut self) {
        if self.config.heartbeat_miss_limit == 0 {
            return;
        }
        let stale_after = self.config.heartbeat_interval * self.config.heartbeat_miss_limit;
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| {
                connection.role() == PeerRole::Accepted
                    && connection.last_heard().elapsed() > stale_after
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            warn!(
                "Connection #{id} missed {} heartbeats, closing it",
                self.config.heartbeat_miss_limit
            );
            if let Some(connection) = self.connections.remove(&id) {
                connection.shutdown();
                self.report_loss(id);
            }
        }
    }

    fn notify(&self, notification: Notification) {
        // Nobody listening is fine; notifications are fire-and-forget.
        let _ = self.notification_tx.send(notification);
    }

    async fn run(&mut self) {
        while let Some(message) = self.message_rx.recv().await {
            self.handle_message(message).await;
        }
        debug!("Channel towards board handle has been closed (probably shutting down)");
    }
}

/// This handle knows how to talk to the `BoardActor` and provides an
/// interface for doing so: `send_message` for raw messages, the named
/// methods for the local-edit surface, and `subscribe` for lifecycle and
/// mutation notifications.
#[derive(Clone)]
pub struct BoardActorHandle {
    message_tx: mpsc::Sender<BoardMessage>,
    notification_tx: broadcast::Sender<Notification>,
    next_id: Arc<AtomicUsize>,
}

impl BoardActorHandle {
    #[must_use]
    pub fn new(role: Role, user_name: UserName, config: SyncConfig) -> Self {
        let (message_tx, message_rx) = mpsc::channel(256);
        let (notification_tx, _notification_rx) = broadcast::channel(256);

        let mut actor = BoardActor::new(
            message_rx,
            notification_tx.clone(),
            role,
            user_name,
            config.clone(),
        );
        tokio::spawn(async move { actor.run().await });

        // Only the hub polices heartbeats; a spoke notices loss by EOF.
        if role == Role::Server && config.heartbeat_miss_limit > 0 {
            let watchdog_tx = message_tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.heartbeat_interval);
                loop {
                    ticker.tick().await;
                    if watchdog_tx.send(BoardMessage::CheckHeartbeats).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            message_tx,
            notification_tx,
            next_id: Arc::default(),
        }
    }

    /// The transport tasks and the embedding layer send messages through
    /// this when something happened.
    pub async fn send_message(&self, message: BoardMessage) {
        self.message_tx
            .send(message)
            .await
            .expect("BoardActor task has been killed");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn add_object(&self, object: BoardObject) {
        self.send_message(BoardMessage::AddObject(object)).await;
    }

    /// Returns the subset of ids that was actually removed.
    pub async fn delete_objects(&self, ids: Vec<ObjectId>) -> Vec<ObjectId> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(BoardMessage::DeleteObjects { ids, response_tx })
            .await;
        response_rx.await.expect("BoardActor task has been killed")
    }

    pub async fn move_objects(&self, offset: Vec2, ids: Vec<ObjectId>) {
        self.send_message(BoardMessage::MoveObjects { offset, ids })
            .await;
    }

    pub async fn update_object(&self, id: ObjectId, update: ObjectUpdate) {
        self.send_message(BoardMessage::UpdateObject { id, update })
            .await;
    }

    pub async fn set_objects(&self, objects: Vec<BoardObject>, broadcast: bool) {
        self.send_message(BoardMessage::SetObjects { objects, broadcast })
            .await;
    }

    /// Reports a local cursor move; transmission is throttled to the
    /// configured interval.
    pub async fn move_cursor(&self, pos: Point) {
        self.send_message(BoardMessage::MoveOwnCursor(pos)).await;
    }

    /// The current user-object registry (cursor placeholders excluded).
    pub async fn objects(&self) -> Vec<BoardObject> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(BoardMessage::GetObjects { response_tx })
            .await;
        response_rx.await.expect("BoardActor task has been killed")
    }

    /// The currently known remote presences.
    pub async fn users(&self) -> Vec<UserName> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(BoardMessage::GetUsers { response_tx })
            .await;
        response_rx.await.expect("BoardActor task has been killed")
    }
}
