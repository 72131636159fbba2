// SPDX-FileCopyrightText: 2026 boardsync contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Length-prefixed framing for the wire protocol.
//!
//! Every frame is a big-endian u32 byte count followed by exactly that many
//! payload bytes, so binary payloads (compressed rasters in particular) can
//! never corrupt frame boundaries. The decoder buffers partial frames
//! across reads. A clean EOF between frames ends the stream; an EOF in the
//! middle of a frame is an error, never a zero-length payload.

use thiserror::Error;
use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame. Large rasters fit comfortably; anything
/// bigger indicates a corrupted or hostile length field.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_FIELD: usize = 4;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the limit of {MAX_FRAME_LEN} bytes")]
    FrameTooLarge(usize),
    #[error("failed to encode or decode a payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(payload.len()));
        }
        dst.reserve(LEN_FIELD + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_FIELD {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LEN_FIELD];
        length_bytes.copy_from_slice(&src[..LEN_FIELD]);
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(length));
        }

        if src.len() < LEN_FIELD + length {
            // Wait for the rest of the frame to arrive.
            src.reserve(LEN_FIELD + length - src.len());
            return Ok(None);
        }

        src.advance(LEN_FIELD);
        Ok(Some(src.split_to(length)))
    }
}
