//! The TCP listener: accepts incoming peers and hands each one to the
//! replication actor.

use crate::connection::{spawn_connection, PeerRole};
use crate::sync::BoardActorHandle;
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Binds the listener and spawns the accept loop. Returns the bound
/// address (useful when asking for port 0). The loop runs until the
/// process exits; losing every client does not stop it.
pub async fn start(port: u16, ipv6: bool, handle: BoardActorHandle) -> Result<SocketAddr> {
    let addr: SocketAddr = if ipv6 {
        (Ipv6Addr::UNSPECIFIED, port).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, port).into()
    };
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    let local_addr = listener.local_addr()?;
    info!("Serving on {local_addr}");

    tokio::spawn(accept_loop(listener, handle));

    Ok(local_addr)
}

async fn accept_loop(listener: TcpListener, handle: BoardActorHandle) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let id = handle.next_connection_id();
                info!("Incoming connection from {peer_addr} (#{id})");
                spawn_connection(stream, id, PeerRole::Accepted, handle.clone()).await;
            }
            Err(err) => {
                warn!("Failed to accept a connection: {err}");
            }
        }
    }
}
