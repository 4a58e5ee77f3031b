//! In-memory transport implementation for testing
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::Framed;

use super::{IpcTransport, TransportParts};
use crate::IpcCodec;

const BUFFER_SIZE: usize = 64 * 1024;

/// In-memory transport for testing
///
/// Both ends are backed by a [`tokio::io::duplex`] pipe, so bytes written to
/// one end can be read from the other without a real process.
pub struct InMemoryTransport {
    stream: DuplexStream,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    ///
    /// Returns `(client_transport, interpreter_transport)`.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(BUFFER_SIZE);
        (Self { stream: a }, Self { stream: b })
    }

    /// Wrap this end in the interpreter framing, for playing the interpreter side
    pub fn framed(self, codec: IpcCodec) -> Framed<DuplexStream, IpcCodec> {
        Framed::new(self.stream, codec)
    }
}

impl IpcTransport for InMemoryTransport {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn split(self) -> eyre::Result<TransportParts<Self::Reader, Self::Writer>> {
        let (reader, writer) = tokio::io::split(self.stream);
        Ok(TransportParts {
            reader,
            writer,
            stderr: None,
            child: None,
        })
    }
}
