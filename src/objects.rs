// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The drawable object model and its serialization contract.
//!
//! Each variant persists exactly its declared attribute set, and the `type`
//! tag selects the reconstruction path when decoding. There is no dynamic
//! lookup; an unknown tag is a decode error.

use crate::types::{Colour, ObjectUpdate};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::{Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub type ObjectId = Uuid;

/// Pixel layouts a raster payload can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    Rgba,
}

impl PixelFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("failed to decompress pixel data: {0}")]
    Deflate(#[from] std::io::Error),
}

/// Raw pixel content of an image-like object. In memory this is the
/// decompressed buffer of exactly `width * height * bytes_per_pixel` bytes;
/// on the wire the bytes travel zlib-compressed and base64-encoded next to
/// the explicit dimensions and format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl Raster {
    const PLACEHOLDER_DIM: u32 = 10;

    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(RasterError::SizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// What a degenerate (zero-width or zero-height) raster decodes to.
    #[must_use]
    pub fn placeholder() -> Self {
        let dim = Self::PLACEHOLDER_DIM;
        Self {
            width: dim,
            height: dim,
            format: PixelFormat::Rgba,
            pixels: vec![0; dim as usize * dim as usize * 4],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

fn deflate(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .expect("writing to an in-memory zlib encoder should not fail");
    encoder
        .finish()
        .expect("finishing an in-memory zlib stream should not fail")
}

fn inflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut pixels = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut pixels)?;
    Ok(pixels)
}

/// The wire form of a raster: explicit dimensions plus compressed content.
#[derive(Serialize, Deserialize)]
struct RasterWire {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: String,
}

impl Serialize for Raster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RasterWire {
            width: self.width,
            height: self.height,
            format: self.format,
            data: BASE64.encode(deflate(&self.pixels)),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Raster {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let wire = RasterWire::deserialize(deserializer)?;
        if wire.width == 0 || wire.height == 0 {
            return Ok(Self::placeholder());
        }
        let compressed = BASE64.decode(&wire.data).map_err(Error::custom)?;
        let pixels = inflate(&compressed).map_err(Error::custom)?;
        Self::new(wire.width, wire.height, wire.format, pixels).map_err(Error::custom)
    }
}

/// A drawable object. The fields of each variant are exactly its persisted
/// attributes; everything derivable (rendered surfaces, fonts, hit boxes)
/// is reconstructed outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BoardObject {
    Rectangle {
        id: ObjectId,
        rect: Rect,
        pos: Point,
        colour: Colour,
    },
    Image {
        id: ObjectId,
        rect: Rect,
        pos: Point,
        raster: Raster,
    },
    Scribble {
        id: ObjectId,
        rect: Rect,
        pos: Point,
        colour: Colour,
        line_width: f64,
        raster: Raster,
    },
    Text {
        id: ObjectId,
        rect: Rect,
        pos: Point,
        text: String,
        colour: Colour,
        font_name: String,
        font_size: f64,
    },
    /// Placeholder for a remote user's cursor. Not a user object: it is
    /// never part of a snapshot and survives whole-canvas replacement.
    Cursor { id: ObjectId, pos: Point },
}

impl BoardObject {
    pub fn rectangle(rect: Rect, colour: Colour) -> Self {
        Self::Rectangle {
            id: Uuid::new_v4(),
            pos: rect.origin(),
            rect,
            colour,
        }
    }

    pub fn image(rect: Rect, raster: Raster) -> Self {
        Self::Image {
            id: Uuid::new_v4(),
            pos: rect.origin(),
            rect,
            raster,
        }
    }

    pub fn scribble(rect: Rect, colour: Colour, line_width: f64, raster: Raster) -> Self {
        Self::Scribble {
            id: Uuid::new_v4(),
            pos: rect.origin(),
            rect,
            colour,
            line_width,
            raster,
        }
    }

    pub fn text(
        rect: Rect,
        text: String,
        colour: Colour,
        font_name: String,
        font_size: f64,
    ) -> Self {
        Self::Text {
            id: Uuid::new_v4(),
            pos: rect.origin(),
            rect,
            text,
            colour,
            font_name,
            font_size,
        }
    }

    pub fn cursor(pos: Point) -> Self {
        Self::Cursor {
            id: Uuid::new_v4(),
            pos,
        }
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Rectangle { id, .. }
            | Self::Image { id, .. }
            | Self::Scribble { id, .. }
            | Self::Text { id, .. }
            | Self::Cursor { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn pos(&self) -> Point {
        match self {
            Self::Rectangle { pos, .. }
            | Self::Image { pos, .. }
            | Self::Scribble { pos, .. }
            | Self::Text { pos, .. }
            | Self::Cursor { pos, .. } => *pos,
        }
    }

    pub fn set_pos(&mut self, new_pos: Point) {
        match self {
            Self::Rectangle { pos, .. }
            | Self::Image { pos, .. }
            | Self::Scribble { pos, .. }
            | Self::Text { pos, .. }
            | Self::Cursor { pos, .. } => *pos = new_pos,
        }
    }

    pub fn translate(&mut self, offset: Vec2) {
        self.set_pos(self.pos() + offset);
    }

    #[must_use]
    pub fn rect(&self) -> Option<Rect> {
        match self {
            Self::Rectangle { rect, .. }
            | Self::Image { rect, .. }
            | Self::Scribble { rect, .. }
            | Self::Text { rect, .. } => Some(*rect),
            Self::Cursor { .. } => None,
        }
    }

    /// User objects are the ones drawn by people and carried in snapshots,
    /// as opposed to presence placeholders.
    #[must_use]
    pub fn is_user_object(&self) -> bool {
        !matches!(self, Self::Cursor { .. })
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rectangle { .. } => "rectangle",
            Self::Image { .. } => "image",
            Self::Scribble { .. } => "scribble",
            Self::Text { .. } => "text",
            Self::Cursor { .. } => "cursor",
        }
    }

    /// Applies an in-place mutation if it fits this object's type.
    /// Returns whether anything was changed.
    pub fn apply(&mut self, update: &ObjectUpdate) -> bool {
        match (self, update) {
            (Self::Rectangle { rect, .. }, ObjectUpdate::Resize { width, height }) => {
                *rect = Rect::from_origin_size(
                    rect.origin(),
                    Size::new(width.max(1.0), height.max(1.0)),
                );
                true
            }
            (
                Self::Rectangle { colour, .. }
                | Self::Scribble { colour, .. }
                | Self::Text { colour, .. },
                ObjectUpdate::Recolor { colour: new_colour },
            ) => {
                *colour = *new_colour;
                true
            }
            (Self::Text { text, .. }, ObjectUpdate::SetText { text: new_text }) => {
                text.clone_from(new_text);
                true
            }
            (
                Self::Image { raster, rect, .. } | Self::Scribble { raster, rect, .. },
                ObjectUpdate::SetRaster { raster: new_raster },
            ) => {
                *rect = Rect::from_origin_size(
                    rect.origin(),
                    Size::new(f64::from(new_raster.width()), f64::from(new_raster.height())),
                );
                raster.clone_from(new_raster);
                true
            }
            _ => false,
        }
    }
}
