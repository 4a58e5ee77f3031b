//! IO abstraction layer for the interpreter channel
//!
//! The core trait [`IpcTransport`] lets the channel run over a spawned child
//! process or over an in-memory duplex pipe.
//!
//! # Examples
//!
//! ## Spawning an interpreter
//!
//! ```no_run
//! use transport::{Channel, ChannelConfig, ChildProcessTransport};
//!
//! # async fn run() -> eyre::Result<()> {
//! let transport = ChildProcessTransport::spawn("interpreter", &["--debug".to_string()])?;
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let channel = Channel::with_transport(transport, ChannelConfig::default(), tx)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the in-memory transport for testing
//!
//! ```
//! use transport::{Channel, ChannelConfig, InMemoryTransport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> eyre::Result<()> {
//! let (client, interpreter) = InMemoryTransport::pair();
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let channel = Channel::with_transport(client, ChannelConfig::default(), tx)?;
//! # Ok(())
//! # }
//! ```

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

mod memory;
mod process;

pub use memory::InMemoryTransport;
pub use process::ChildProcessTransport;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Trait for bidirectional interpreter message transport
///
/// Implementations split into a reader carrying the interpreter's framed
/// output and a writer feeding its input. Process backed transports also hand
/// over the child handle and its error stream.
pub trait IpcTransport: Send + 'static {
    type Reader: AsyncRead + Send + Unpin + 'static;
    type Writer: AsyncWrite + Send + Unpin + 'static;

    fn split(self) -> eyre::Result<TransportParts<Self::Reader, Self::Writer>>;
}

pub struct TransportParts<R, W> {
    pub reader: R,
    pub writer: W,
    pub stderr: Option<BoxedReader>,
    pub child: Option<Child>,
}
