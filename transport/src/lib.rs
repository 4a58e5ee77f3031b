//! Interpreter IPC channel
//!
//! This crate contains the framed message bus used to talk to an interpreter
//! process over its stdio pipes. Messages are JSON objects separated by a
//! sentinel byte, replies are matched to requests by id, and keep-alive pings
//! from the interpreter are answered without ever reaching the consumer.
mod channel;
pub mod codec;
pub mod events;
pub mod io;
pub mod message;
mod request_store;

pub use channel::{Channel, ChannelConfig, ChannelError, ProcessStatus};
pub use codec::{CodecError, DecodedFrame, IpcCodec, MalformedFrame};
pub use events::ChannelEvent;
pub use io::{ChildProcessTransport, InMemoryTransport, IpcTransport};
pub use message::{IpcMessage, MessageId};

/// End-of-message sentinel written after every frame
pub const EOM: u8 = 0x04;
