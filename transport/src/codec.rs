//! Sentinel-delimited JSON framing
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{message::IpcMessage, EOM};

/// Upper bound on the number of frames extracted from a buffer before
/// yielding back to the reader
pub const DEFAULT_MAX_FRAMES_PER_CHUNK: usize = 128;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("reading or writing interpreter stream")]
    Io(#[from] std::io::Error),
    #[error("frame is not valid utf-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("parsing message")]
    Parsing(#[from] serde_json::Error),
    #[error("serialising message")]
    Serialising(#[source] serde_json::Error),
    #[error("serialised message contains the frame delimiter")]
    DelimiterInPayload,
}

/// A frame that could not be turned into a message
///
/// These do not terminate the stream; the reader reports them and moves on
/// to the next frame.
#[derive(Debug)]
pub struct MalformedFrame {
    pub raw: String,
    pub error: CodecError,
}

pub type DecodedFrame = Result<IpcMessage, MalformedFrame>;

#[derive(Debug, Clone)]
pub struct IpcCodec {
    delimiter: u8,
    max_frames_per_chunk: usize,
    frames_since_refill: usize,
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new(EOM, DEFAULT_MAX_FRAMES_PER_CHUNK)
    }
}

impl IpcCodec {
    pub fn new(delimiter: u8, max_frames_per_chunk: usize) -> Self {
        Self {
            delimiter,
            max_frames_per_chunk: max_frames_per_chunk.max(1),
            frames_since_refill: 0,
        }
    }
}

impl Decoder for IpcCodec {
    type Item = DecodedFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let leading = src.iter().take_while(|b| **b == self.delimiter).count();
            src.advance(leading);

            let Some(end) = src.iter().position(|b| *b == self.delimiter) else {
                self.frames_since_refill = 0;
                return Ok(None);
            };

            if self.frames_since_refill >= self.max_frames_per_chunk {
                tracing::error!(
                    limit = self.max_frames_per_chunk,
                    buffered = src.len(),
                    "endless loop guard hit while splitting frames, deferring the rest"
                );
                self.frames_since_refill = 0;
                return Ok(None);
            }
            self.frames_since_refill += 1;

            let frame = src.split_to(end);
            src.advance(1);

            let raw = match std::str::from_utf8(&frame) {
                Ok(raw) => raw.trim(),
                Err(e) => {
                    return Ok(Some(Err(MalformedFrame {
                        raw: String::from_utf8_lossy(&frame).into_owned(),
                        error: e.into(),
                    })))
                }
            };
            if raw.is_empty() {
                continue;
            }

            let decoded = serde_json::from_str(raw).map_err(|e| MalformedFrame {
                raw: raw.to_owned(),
                error: e.into(),
            });
            return Ok(Some(decoded));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // the stream is done so there is no later chunk to defer frames to
        self.frames_since_refill = 0;
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if !buf.is_empty() {
            let rest = String::from_utf8_lossy(buf).trim().to_owned();
            buf.clear();
            if !rest.is_empty() {
                tracing::warn!(%rest, "stream closed with an unterminated frame");
            }
        }
        Ok(None)
    }
}

impl Encoder<IpcMessage> for IpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: IpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = serde_json::to_vec(&item).map_err(CodecError::Serialising)?;
        if encoded.contains(&self.delimiter) {
            return Err(CodecError::DelimiterInPayload);
        }

        dst.reserve(encoded.len() + 1);
        dst.put_slice(&encoded);
        dst.put_u8(self.delimiter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{json, Value};

    use super::*;

    fn decode_all(codec: &mut IpcCodec, buf: &mut BytesMut) -> Vec<DecodedFrame> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    fn message(frame: &DecodedFrame) -> &IpcMessage {
        match frame {
            Ok(message) => message,
            Err(malformed) => panic!("unexpected malformed frame {malformed:?}"),
        }
    }

    #[test]
    fn single_frame() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"stdout\",\"id\":\"1\",\"reply\":null,\"data\":\"hi\"}\x04"[..]);

        let frames = decode_all(&mut codec, &mut buf);

        assert_eq!(frames.len(), 1);
        let m = message(&frames[0]);
        assert_eq!(m.r#type, "stdout");
        assert_eq!(m.data, json!("hi"));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"stdout\",\"id\":\"1\""[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b",\"data\":1}\x04");
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(message(&frames[0]).data, json!(1));
    }

    #[test]
    fn leading_delimiters_and_whitespace_are_skipped() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::from(&b"\x04\x04  \n\x04 {\"type\":\"a\",\"id\":\"1\"} \x04"[..]);

        let frames = decode_all(&mut codec, &mut buf);

        assert_eq!(frames.len(), 1);
        assert_eq!(message(&frames[0]).r#type, "a");
    }

    #[test]
    fn malformed_frame_does_not_poison_the_stream() {
        let mut codec = IpcCodec::default();
        let mut buf =
            BytesMut::from(&b"not json\x04{\"type\":\"b\",\"id\":\"2\"}\x04"[..]);

        let frames = decode_all(&mut codec, &mut buf);

        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Err(malformed) => assert_eq!(malformed.raw, "not json"),
            Ok(m) => panic!("expected malformed frame, got {m:?}"),
        }
        assert_eq!(message(&frames[1]).r#type, "b");
    }

    #[test]
    fn frame_limit_defers_remaining_frames() {
        let mut codec = IpcCodec::new(EOM, 2);
        let mut buf = BytesMut::new();
        for i in 0..3 {
            buf.extend_from_slice(format!("{{\"type\":\"t\",\"id\":\"{i}\"}}\x04").as_bytes());
        }

        let first = decode_all(&mut codec, &mut buf);
        assert_eq!(first.len(), 2);
        assert!(!buf.is_empty());

        // the next read resumes where the guard stopped
        let rest = decode_all(&mut codec, &mut buf);
        assert_eq!(rest.len(), 1);
        assert_eq!(message(&rest[0]).id, "2");
    }

    #[test]
    fn eof_discards_unterminated_tail() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::from(&b"{\"type\":\"a\",\"id\":\"1\"}\x04{\"type\":"[..]);

        let first = codec.decode_eof(&mut buf).unwrap();
        assert!(first.is_some());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn encoded_frames_end_with_delimiter() {
        let mut codec = IpcCodec::default();
        let mut dst = BytesMut::new();

        codec
            .encode(IpcMessage::new("debug/step", "3", Value::Null), &mut dst)
            .unwrap();

        assert_eq!(dst.last(), Some(&EOM));
        assert_eq!(
            &dst[..dst.len() - 1],
            br#"{"type":"debug/step","id":"3","reply":null,"data":null}"#
        );
    }

    #[test]
    fn payload_containing_delimiter_is_rejected() {
        let mut codec = IpcCodec::new(b'}', DEFAULT_MAX_FRAMES_PER_CHUNK);
        let mut dst = BytesMut::new();

        let err = codec
            .encode(IpcMessage::new("eval", "1", json!({})), &mut dst)
            .unwrap_err();

        assert!(matches!(err, CodecError::DelimiterInPayload));
    }

    #[rstest]
    #[case(EOM, 1)]
    #[case(EOM, 7)]
    #[case(EOM, 64)]
    #[case(b'\n', 1)]
    #[case(b'\n', 5)]
    fn arbitrary_chunking_preserves_messages(#[case] delimiter: u8, #[case] chunk_size: usize) {
        let messages = vec![
            IpcMessage::new("stdout", "1", json!("a\tb")),
            IpcMessage::new("interpreter/state", "2", json!("CodeExecuted")).reply_to("9"),
            IpcMessage::new("console/out", "3", json!({"Message": "x", "Type": "Normal"})),
        ];
        let mut codec = IpcCodec::new(delimiter, DEFAULT_MAX_FRAMES_PER_CHUNK);
        let mut wire = BytesMut::new();
        for m in &messages {
            codec.encode(m.clone(), &mut wire).unwrap();
        }

        let mut decoded = Vec::new();
        let mut buf = BytesMut::new();
        for chunk in wire.chunks(chunk_size) {
            buf.extend_from_slice(chunk);
            for frame in decode_all(&mut codec, &mut buf) {
                decoded.push(message(&frame).clone());
            }
        }

        assert_eq!(decoded, messages);
    }
}
