// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-connection plumbing shared by the server and the client: identity,
//! the framed writer half, and the read loop feeding the sync actor.
//!
//! Ownership is one-directional: the sync actor owns the writer half of
//! every connection, and the read task reports inbound packets and the
//! connection's end by message. Nothing holds a reference back into the
//! actor.

use crate::codec::{FrameCodec, WireError};
use crate::sync::{BoardActorHandle, BoardMessage};
use crate::types::Packet;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub type ConnectionId = usize;

/// Which side of the socket we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Accepted by our listener.
    Accepted,
    /// Dialed out to a server.
    Dialed,
}

pub type WireWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// The actor-owned half of one peer connection.
pub struct Connection {
    writer: WireWriter,
    role: PeerRole,
    last_heard: Instant,
    token: CancellationToken,
}

impl Connection {
    #[must_use]
    pub fn new(writer: WireWriter, role: PeerRole, token: CancellationToken) -> Self {
        Self {
            writer,
            role,
            last_heard: Instant::now(),
            token,
        }
    }

    /// Frames and writes one packet. Packets sent on the same connection
    /// arrive in send order.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), WireError> {
        self.writer.send(packet.to_bytes()?).await
    }

    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Records that the peer was heard from just now.
    pub fn touch(&mut self) {
        self.last_heard = Instant::now();
    }

    #[must_use]
    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Tears the connection down: the read task stops, which releases the
    /// socket once the actor drops this struct.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// Splits a fresh byte stream, registers the writer half with the sync
/// actor, and runs the read loop until the peer closes, a read fails, or
/// the returned token is cancelled. Registration and packet delivery go
/// through the same channel, so the actor always learns about the
/// connection before its first packet.
pub async fn spawn_connection<S>(
    stream: S,
    id: ConnectionId,
    role: PeerRole,
    handle: BoardActorHandle,
) -> CancellationToken
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let token = CancellationToken::new();
    let connection_token = token.clone();

    tokio::spawn(async move {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: WireWriter = FramedWrite::new(Box::new(write_half), FrameCodec);
        let mut reader = FramedRead::new(read_half, FrameCodec);

        handle
            .send_message(BoardMessage::Connected {
                id,
                connection: Connection::new(writer, role, connection_token.clone()),
            })
            .await;

        loop {
            tokio::select! {
                () = connection_token.cancelled() => break,
                frame = reader.next() => match frame {
                    Some(Ok(bytes)) => match Packet::from_bytes(&bytes) {
                        Ok(packet) => {
                            handle
                                .send_message(BoardMessage::FromConnection(id, packet))
                                .await;
                        }
                        // Malformed payloads are dropped; the stream itself
                        // is still framed correctly, so keep reading.
                        Err(err) => warn!("Dropping malformed packet on connection #{id}: {err}"),
                    },
                    Some(Err(err)) => {
                        warn!("Read error on connection #{id}: {err}");
                        break;
                    }
                    // EOF: the peer closed the connection.
                    None => break,
                },
            }
        }

        handle.send_message(BoardMessage::Disconnected(id)).await;
    });

    token
}
