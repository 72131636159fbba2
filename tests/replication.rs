//! End-to-end tests driving a real server and clients over localhost TCP.

use boardsync::client::{ClientHandle, ClientState};
use boardsync::config::SyncConfig;
use boardsync::server;
use boardsync::sync::{BoardActorHandle, Role};
use boardsync::types::factories::*;
use boardsync::types::Notification;
use kurbo::Vec2;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::{sleep, timeout, Instant};

const DEADLINE: Duration = Duration::from_secs(5);

async fn start_server(port: u16) -> (BoardActorHandle, u16) {
    let handle = BoardActorHandle::new(Role::Server, "host".to_string(), SyncConfig::default());
    let addr = server::start(port, false, handle.clone())
        .await
        .expect("server should bind");
    (handle, addr.port())
}

async fn connect_client(name: &str, port: u16) -> (BoardActorHandle, ClientHandle) {
    let handle = BoardActorHandle::new(Role::Client, name.to_string(), SyncConfig::default());
    let client = ClientHandle::new(
        "127.0.0.1".to_string(),
        port,
        false,
        SyncConfig::default(),
        handle.clone(),
    );
    client.connect().await.expect("client should connect");
    (handle, client)
}

async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + DEADLINE;
    while !condition().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn an_object_drawn_on_one_client_appears_on_the_other() {
    let (_server, port) = start_server(9001).await;
    let (a, _a_client) = connect_client("ada", port).await;
    let (b, _b_client) = connect_client("grace", port).await;

    let rect = rect_object(0.0, 0.0, 10.0, 10.0, red());
    let id = rect.id();
    a.add_object(rect.clone()).await;

    eventually("the rectangle to reach the other client", || {
        let b = b.clone();
        async move { b.objects().await.iter().any(|object| object.id() == id) }
    })
    .await;

    let objects = b.objects().await;
    let replica = objects
        .iter()
        .find(|object| object.id() == id)
        .expect("the object is present");
    assert_eq!(*replica, rect);
}

#[tokio::test]
async fn deletes_propagate_and_are_idempotent_across_peers() {
    let (server, port) = start_server(0).await;
    let (a, _a_client) = connect_client("ada", port).await;
    let (b, _b_client) = connect_client("grace", port).await;

    let rect = rect_object(5.0, 5.0, 20.0, 20.0, red());
    let id = rect.id();
    a.add_object(rect).await;
    eventually("the object to reach the other client", || {
        let b = b.clone();
        async move { !b.objects().await.is_empty() }
    })
    .await;

    assert_eq!(b.delete_objects(vec![id]).await, vec![id]);
    assert_eq!(b.delete_objects(vec![id]).await, Vec::<boardsync::objects::ObjectId>::new());

    eventually("the delete to reach the hub", || {
        let server = server.clone();
        async move { server.objects().await.is_empty() }
    })
    .await;
    eventually("the delete to reach the originator's peer", || {
        let a = a.clone();
        async move { a.objects().await.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn moves_reach_every_peer_and_are_invertible() {
    let (_server, port) = start_server(0).await;
    let (a, _a_client) = connect_client("ada", port).await;
    let (b, _b_client) = connect_client("grace", port).await;

    let rect = rect_object(0.0, 0.0, 10.0, 10.0, red());
    let id = rect.id();
    let origin = rect.pos();
    a.add_object(rect).await;
    eventually("the object to reach the other client", || {
        let b = b.clone();
        async move { !b.objects().await.is_empty() }
    })
    .await;

    let offset = Vec2::new(30.0, -12.0);
    a.move_objects(offset, vec![id]).await;
    eventually("the move to reach the other client", || {
        let b = b.clone();
        async move {
            b.objects()
                .await
                .iter()
                .any(|object| object.pos() == origin + offset)
        }
    })
    .await;

    a.move_objects(-offset, vec![id]).await;
    eventually("the inverse move to reach the other client", || {
        let b = b.clone();
        async move {
            b.objects()
                .await
                .iter()
                .any(|object| object.pos() == origin)
        }
    })
    .await;
}

#[tokio::test]
async fn presence_and_cursor_moves_flow_between_clients() {
    let (_server, port) = start_server(0).await;
    let (a, _a_client) = connect_client("ada", port).await;
    let (b, _b_client) = connect_client("grace", port).await;

    // Everyone ends up knowing the host and the respective other client.
    eventually("the presences to reach the second client", || {
        let b = b.clone();
        async move {
            let mut users = b.users().await;
            users.sort();
            users == vec!["ada".to_string(), "host".to_string()]
        }
    })
    .await;

    let mut b_notifications = b.subscribe();
    a.move_cursor(kurbo::Point::new(42.0, 23.0)).await;

    let deadline = Instant::now() + DEADLINE;
    loop {
        let notification = timeout(Duration::from_secs(5), b_notifications.recv())
            .await
            .expect("timed out waiting for the cursor notification")
            .expect("notification channel closed");
        if let Notification::UserCursorMoved { name, pos } = notification {
            assert_eq!(name, "ada");
            assert_eq!(pos, kurbo::Point::new(42.0, 23.0));
            break;
        }
        assert!(Instant::now() < deadline, "cursor notification never arrived");
    }
}

#[tokio::test]
async fn total_peer_loss_is_reported_once_and_the_server_keeps_listening() {
    let (server, port) = start_server(0).await;
    let mut notifications = server.subscribe();

    let (_a, a_client) = connect_client("ada", port).await;
    a_client.disconnect().await;

    let deadline = Instant::now() + DEADLINE;
    loop {
        let notification = timeout(Duration::from_secs(5), notifications.recv())
            .await
            .expect("timed out waiting for the loss notification")
            .expect("notification channel closed");
        if notification == Notification::AllClientConnectionsLost {
            break;
        }
        assert!(Instant::now() < deadline, "total loss was never reported");
    }

    // Exactly once: give stragglers a moment, then check nothing else came.
    sleep(Duration::from_millis(300)).await;
    while let Ok(notification) = notifications.try_recv() {
        assert_ne!(notification, Notification::AllClientConnectionsLost);
    }

    // The listener survives losing everyone.
    let (c, _c_client) = connect_client("clara", port).await;
    eventually("the new client to learn the host's presence", || {
        let c = c.clone();
        async move { c.users().await.contains(&"host".to_string()) }
    })
    .await;
}

#[tokio::test]
async fn a_client_can_reconnect_after_disconnecting() {
    let (server, port) = start_server(0).await;
    let (a, a_client) = connect_client("ada", port).await;

    a_client.disconnect().await;
    assert_eq!(a_client.state(), ClientState::Disconnected);

    a_client.reconnect().await.expect("reconnect should succeed");
    assert_eq!(a_client.state(), ClientState::Connected);

    let rect = rect_object(0.0, 0.0, 10.0, 10.0, red());
    let id = rect.id();
    a.add_object(rect).await;
    eventually("the object to reach the hub after reconnecting", || {
        let server = server.clone();
        async move { server.objects().await.iter().any(|object| object.id() == id) }
    })
    .await;
}

#[tokio::test]
async fn the_watchdog_drops_raw_connections_that_never_ping() {
    let config = SyncConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_miss_limit: 2,
        ..SyncConfig::default()
    };
    let handle = BoardActorHandle::new(Role::Server, "host".to_string(), config);
    let addr = server::start(0, false, handle)
        .await
        .expect("server should bind");

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
        .await
        .expect("raw connect should succeed");

    // Never send anything. After the miss limit the server must close us.
    let mut buffer = vec![0u8; 4096];
    timeout(DEADLINE, async {
        loop {
            match stream.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {} // greeting frames
            }
        }
    })
    .await
    .expect("timed out waiting for the server to drop the silent connection");
}
