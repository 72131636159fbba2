// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire-level message types and the notifications the core reports to the
//! embedding layer.

use crate::codec::WireError;
use crate::connection::ConnectionId;
use crate::objects::{BoardObject, ObjectId, Raster};
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use tokio_util::bytes::Bytes;

pub type UserName = String;

/// RGBA colour as stored in object attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    pub const BLACK: Self = Self::new(0, 0, 0, 255);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// One replicated whiteboard event. On the wire this is a JSON map with an
/// `evt` tag and an `args` payload, e.g.
/// `{"evt":"moveObjects","args":[{"x":3.0,"y":4.0},["<id>","<id>"]]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "evt", content = "args", rename_all = "camelCase")]
pub enum Event {
    AddObject(BoardObject),
    DeleteObjects(Vec<ObjectId>),
    MoveObjects(Vec2, Vec<ObjectId>),
    UpdateObject(ObjectId, ObjectUpdate),
    /// Replaces the whole user-object registry. The flag tells the receiver
    /// whether to replicate the replacement onward; the initial snapshot for
    /// a newly joined peer carries `false` so it is not echoed back.
    SetObjects(Vec<BoardObject>, bool),
    AddUser(UserName),
    MoveUserCursor(UserName, Point),
}

impl Event {
    /// The wire tag, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddObject(_) => "addObject",
            Self::DeleteObjects(_) => "deleteObjects",
            Self::MoveObjects(..) => "moveObjects",
            Self::UpdateObject(..) => "updateObject",
            Self::SetObjects(..) => "setObjects",
            Self::AddUser(_) => "addUser",
            Self::MoveUserCursor(..) => "moveUserCursor",
        }
    }
}

/// The closed set of in-place object mutations that can arrive over the
/// wire. Dispatched by match; an update that does not apply to the target
/// object's type is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ObjectUpdate {
    /// New bounds for a rectangle, clamped to at least 1x1.
    Resize { width: f64, height: f64 },
    Recolor { colour: Colour },
    SetText { text: String },
    /// Replacement pixel content for an image or scribble. Stroke growth
    /// arrives this way, since rasterization happens outside the core.
    SetRaster { raster: Raster },
}

/// One framed payload: either a replicated event or a bare heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Packet {
    Event(Event),
    Ping { ping: bool },
}

impl Packet {
    pub const PING: Self = Self::Ping { ping: true };

    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    #[must_use]
    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Ping { .. })
    }
}

/// What the core reports outward to the embedding layer (renderer, dialogs).
/// Delivered over a broadcast channel; the transport never calls back into
/// the layers above it.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ObjectAdded(ObjectId),
    ObjectsDeleted(Vec<ObjectId>),
    ObjectsMoved { offset: Vec2, ids: Vec<ObjectId> },
    ObjectUpdated(ObjectId),
    BoardReplaced,
    UserJoined(UserName),
    UserLeft(UserName),
    UserCursorMoved { name: UserName, pos: Point },
    ClientConnected(ConnectionId),
    ClientConnectionLost(ConnectionId),
    AllClientConnectionsLost,
    ConnectedToServer,
    ConnectionToServerLost,
}

pub mod factories {
    use super::{BoardObject, Colour, Raster};
    use crate::objects::PixelFormat;
    use kurbo::Rect;

    pub fn red() -> Colour {
        Colour::new(255, 0, 0, 255)
    }

    pub fn rect_object(x: f64, y: f64, width: f64, height: f64, colour: Colour) -> BoardObject {
        BoardObject::rectangle(Rect::new(x, y, x + width, y + height), colour)
    }

    pub fn text_object(x: f64, y: f64, text: &str) -> BoardObject {
        BoardObject::text(
            Rect::new(x, y, x + 100.0, y + 20.0),
            text.to_string(),
            Colour::BLACK,
            "sans-serif".to_string(),
            14.0,
        )
    }

    pub fn checker_raster(width: u32, height: u32) -> Raster {
        let pixels = (0..width * height * 4)
            .map(|i| if i % 8 < 4 { 0xff } else { 0x00 })
            .collect();
        Raster::new(width, height, PixelFormat::Rgba, pixels)
            .expect("checker pattern should match its declared dimensions")
    }

    pub fn image_object(x: f64, y: f64, width: u32, height: u32) -> BoardObject {
        BoardObject::image(
            Rect::new(x, y, x + f64::from(width), y + f64::from(height)),
            checker_raster(width, height),
        )
    }

    pub fn scribble_object(x: f64, y: f64, colour: Colour) -> BoardObject {
        BoardObject::scribble(Rect::new(x, y, x + 6.0, y + 6.0), colour, 3.0, checker_raster(6, 6))
    }
}

#[cfg(test)]
mod tests {
    use super::factories::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_wire_shape_is_tagged_map() {
        let event = Event::DeleteObjects(vec![]);
        let value = serde_json::to_value(&event).expect("serialization should succeed");
        assert_eq!(value["evt"], "deleteObjects");
        assert!(value["args"].is_array());
    }

    #[test]
    fn ping_wire_shape_is_bare_map() {
        let value = serde_json::to_value(Packet::PING).expect("serialization should succeed");
        assert_eq!(value, serde_json::json!({"ping": true}));
    }

    #[test]
    fn packet_distinguishes_ping_from_event() {
        let ping = Packet::from_bytes(br#"{"ping":true}"#).expect("ping should parse");
        assert!(ping.is_ping());

        let event =
            Packet::from_bytes(br#"{"evt":"addUser","args":"ada"}"#).expect("event should parse");
        assert_eq!(event, Packet::Event(Event::AddUser("ada".to_string())));
    }

    #[test]
    fn packet_roundtrips_through_bytes() {
        let packet = Packet::Event(Event::MoveObjects(
            Vec2::new(3.0, -4.0),
            vec![rect_object(0.0, 0.0, 10.0, 10.0, red()).id()],
        ));

        let bytes = packet.to_bytes().expect("serialization should succeed");
        assert_eq!(Packet::from_bytes(&bytes).expect("parse should succeed"), packet);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(Packet::from_bytes(b"\x00\x01\x02").is_err());
        assert!(Packet::from_bytes(br#"{"evt":"explode","args":[]}"#).is_err());
    }
}
