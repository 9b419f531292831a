//! Protobuf wire format shared with the simulation producer
//!
//! Messages mirror the `VortexStream` schema the producer is built against:
//!
//! ```text
//! message Vec2    { float x = 1; float y = 2; }
//! message Source  { Vec2 position = 1; Vec2 direction = 2; }
//! message Request { int32 num_frames = 1; int32 width = 2; int32 height = 3;
//!                   repeated Source sources = 4; }
//! message Frame   { int32 frame_id = 1; int32 width = 2; int32 height = 3;
//!                   repeated float pixels = 4; }
//! ```
//!
//! The message structs stay private to this module; callers only see the
//! [`Request`] and [`Frame`] model types.

use prost::Message;

use crate::types::{Frame, Request, Source, Vec2};
use crate::{FluidError, Result};

#[derive(Clone, PartialEq, Message)]
struct Vec2Message {
    #[prost(float, tag = "1")]
    x: f32,
    #[prost(float, tag = "2")]
    y: f32,
}

#[derive(Clone, PartialEq, Message)]
struct SourceMessage {
    #[prost(message, optional, tag = "1")]
    position: Option<Vec2Message>,
    #[prost(message, optional, tag = "2")]
    direction: Option<Vec2Message>,
}

#[derive(Clone, PartialEq, Message)]
struct RequestMessage {
    #[prost(int32, tag = "1")]
    num_frames: i32,
    #[prost(int32, tag = "2")]
    width: i32,
    #[prost(int32, tag = "3")]
    height: i32,
    #[prost(message, repeated, tag = "4")]
    sources: Vec<SourceMessage>,
}

#[derive(Clone, PartialEq, Message)]
struct FrameMessage {
    #[prost(int32, tag = "1")]
    frame_id: i32,
    #[prost(int32, tag = "2")]
    width: i32,
    #[prost(int32, tag = "3")]
    height: i32,
    #[prost(float, repeated, tag = "4")]
    pixels: Vec<f32>,
}

impl From<Vec2> for Vec2Message {
    fn from(v: Vec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl From<Option<Vec2Message>> for Vec2 {
    fn from(v: Option<Vec2Message>) -> Self {
        v.map(|v| Vec2::new(v.x, v.y)).unwrap_or_default()
    }
}

/// Serialize a request body.
pub fn encode_request(request: &Request) -> Vec<u8> {
    RequestMessage {
        num_frames: request.num_frames,
        width: request.width,
        height: request.height,
        sources: request
            .sources
            .iter()
            .map(|s| SourceMessage {
                position: Some(s.position.into()),
                direction: Some(s.direction.into()),
            })
            .collect(),
    }
    .encode_to_vec()
}

/// Parse a request body.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let message = RequestMessage::decode(bytes)
        .map_err(|e| FluidError::decode_error("request body", e.to_string()))?;

    Ok(Request {
        num_frames: message.num_frames,
        width: message.width,
        height: message.height,
        sources: message
            .sources
            .into_iter()
            .map(|s| Source::new(s.position.into(), s.direction.into()))
            .collect(),
    })
}

/// Serialize a frame body.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    FrameMessage {
        frame_id: frame.frame_id,
        width: frame.width,
        height: frame.height,
        pixels: frame.pixels.clone(),
    }
    .encode_to_vec()
}

/// Parse a frame body.
///
/// A pixel list shorter than `width * height` is not an error; the frame is
/// returned as-is and readers bound their indexing with [`Frame::pixel_count`].
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let message = FrameMessage::decode(bytes)
        .map_err(|e| FluidError::decode_error("frame body", e.to_string()))?;

    Ok(Frame {
        frame_id: message.frame_id,
        width: message.width,
        height: message.height,
        pixels: message.pixels,
    })
}
