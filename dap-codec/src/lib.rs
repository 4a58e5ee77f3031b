//! Debug Adapter Protocol messages and their `Content-Length` framing
use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

pub mod events;
pub mod requests;
pub mod responses;
pub mod types;

use types::Seq;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("invalid utf8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("invalid integer")]
    InvalidInteger(#[from] std::num::ParseIntError),
    #[error("missing content-length header")]
    MissingContentLengthHeader,
    #[error("deserializing message content")]
    Deserializing(#[source] serde_json::Error),
    #[error("serializing message content")]
    Serializing(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A message sent by the adapter, stamped with its sequence number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseMessage {
    pub seq: Seq,
    #[serde(flatten)]
    pub message: Sendable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Sendable {
    Response(responses::Response),
    Event(events::Event),
}

/// Frames DAP messages with a `Content-Length` header
///
/// Decodes messages of type `T` and encodes anything serializable. An
/// adapter uses `DapCodec<Request>`; a client can read the adapter's output
/// with `DapCodec<serde_json::Value>`.
pub struct DapCodec<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> DapCodec<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for DapCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for DapCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(body) = next_body(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(CodecError::Deserializing)
    }
}

/// A complete frame whose body could not be parsed
#[derive(Debug)]
pub struct MalformedMessage {
    pub raw: String,
    pub error: serde_json::Error,
}

/// [`DapCodec`] for reading from an untrusted peer
///
/// A frame with a valid header but an unparseable body is yielded as a
/// [`MalformedMessage`] and decoding carries on with the next frame. Only
/// broken headers and I/O failures end the stream.
pub struct LenientCodec<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> LenientCodec<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for LenientCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for LenientCodec<T> {
    type Item = Result<T, MalformedMessage>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(body) = next_body(src)? else {
            return Ok(None);
        };
        let decoded = serde_json::from_slice(&body).map_err(|error| MalformedMessage {
            raw: String::from_utf8_lossy(&body).into_owned(),
            error,
        });
        Ok(Some(decoded))
    }
}

/// Split the next complete frame off `src` and return its body
fn next_body(src: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
    // skip to the start of the first header
    let Some(start_pos) = src
        .windows(CONTENT_LENGTH.len())
        .position(|s| s == CONTENT_LENGTH)
    else {
        return Ok(None);
    };

    src.advance(start_pos);

    let Some(header_len) = src
        .windows(HEADER_TERMINATOR.len())
        .position(|s| s == HEADER_TERMINATOR)
    else {
        return Ok(None);
    };

    let content_length = content_length(&src[..header_len])?;

    let message_len = header_len + HEADER_TERMINATOR.len() + content_length;
    if src.len() < message_len {
        src.reserve(message_len - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(message_len);
    let body = frame.split_off(header_len + HEADER_TERMINATOR.len());
    tracing::trace!(body = %String::from_utf8_lossy(&body), "decoded dap message");
    Ok(Some(body))
}

impl<T, S: Serialize> Encoder<S> for DapCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: S, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(CodecError::Serializing)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put(header.as_bytes());
        dst.put(&body[..]);
        Ok(())
    }
}

fn content_length(headers: &[u8]) -> Result<usize, CodecError> {
    let headers = std::str::from_utf8(headers)?;
    for header in headers.split("\r\n") {
        let Some((key, value)) = header.split_once(':') else {
            continue;
        };
        if key.trim() == "Content-Length" {
            return Ok(value.trim().parse::<usize>()?);
        }
    }
    Err(CodecError::MissingContentLengthHeader)
}
