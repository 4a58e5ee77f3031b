use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
    codec::{CodecError, DecodedFrame, IpcCodec, DEFAULT_MAX_FRAMES_PER_CHUNK},
    events::ChannelEvent,
    io::{BoxedReader, ChildProcessTransport, IpcTransport, TransportParts},
    message::{IpcMessage, MessageId, PING_RESPONSE},
    request_store::{RequestStore, Responder},
    EOM,
};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Byte separating frames on the wire
    pub delimiter: u8,
    /// How long queued writes are held before being flushed together
    pub write_delay: Duration,
    /// Bound on frames split out of a single read
    pub max_frames_per_chunk: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            delimiter: EOM,
            write_delay: Duration::from_millis(100),
            max_frames_per_chunk: DEFAULT_MAX_FRAMES_PER_CHUNK,
        }
    }
}

impl ChannelConfig {
    fn codec(&self) -> IpcCodec {
        IpcCodec::new(self.delimiter, self.max_frames_per_chunk)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("no reply to message {id} after {after:?}")]
    Timeout { id: MessageId, after: Duration },
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Killed,
    Exited(Option<i32>),
}

enum Command {
    Send {
        r#type: String,
        data: Value,
        reply: Option<MessageId>,
    },
    SendAsync {
        r#type: String,
        data: Value,
        timeout: Option<Duration>,
        respond_to: Responder,
    },
    Stop,
}

/// Handle to a running interpreter channel
///
/// Cloning is cheap; all clones talk to the same background task, which owns
/// the stream, the outbound queue and the table of requests awaiting replies.
#[derive(Clone)]
pub struct Channel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ProcessStatus>,
}

impl Channel {
    /// Spawn `executable` and connect a channel to its stdio pipes
    pub fn spawn(
        executable: impl AsRef<Path>,
        args: &[String],
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> eyre::Result<Self> {
        let transport = ChildProcessTransport::spawn(executable.as_ref(), args)?;
        Self::with_transport(transport, config, events)
    }

    /// Start a channel over an arbitrary transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_transport<T>(
        transport: T,
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> eyre::Result<Self>
    where
        T: IpcTransport,
    {
        let TransportParts {
            reader,
            writer,
            stderr,
            child,
        } = transport.split()?;

        if child.is_some() {
            let _ = events.send(ChannelEvent::Spawned);
        }
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, events.clone()));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);
        let has_child = child.is_some();

        let actor = ChannelActor {
            reader: FramedRead::new(reader, config.codec()),
            writer: FramedWrite::new(writer, config.codec()),
            commands: commands_rx,
            events,
            status: status_tx,
            child,
            store: RequestStore::default(),
            outbox: VecDeque::new(),
            next_id: 0,
            write_delay: config.write_delay,
            flush_at: None,
            reader_open: true,
            exited: if has_child { None } else { Some(None) },
            closed_sent: false,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
        })
    }

    /// Queue a message without waiting for an answer
    pub fn send(&self, r#type: impl Into<String>, data: Value) -> Result<(), ChannelError> {
        self.command(Command::Send {
            r#type: r#type.into(),
            data,
            reply: None,
        })
    }

    /// Queue a message and wait for the interpreter's reply to it
    ///
    /// With no `timeout` the request waits until a reply arrives or the channel
    /// closes.
    pub async fn send_async(
        &self,
        r#type: impl Into<String>,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SendAsync {
            r#type: r#type.into(),
            data,
            timeout,
            respond_to: tx,
        })?;
        let reply = rx.await.map_err(|_| ChannelError::Closed)??;
        Ok(reply.data)
    }

    /// Queue a message answering `reply_to`
    pub fn reply(
        &self,
        r#type: impl Into<String>,
        data: Value,
        reply_to: impl Into<MessageId>,
    ) -> Result<(), ChannelError> {
        self.command(Command::Send {
            r#type: r#type.into(),
            data,
            reply: Some(reply_to.into()),
        })
    }

    /// Kill the interpreter and shut the channel down
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Whether the interpreter is alive: not killed and no exit observed
    pub fn is_running(&self) -> bool {
        matches!(*self.status.borrow(), ProcessStatus::Running)
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.borrow()
    }

    fn command(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Closed)
    }
}

struct ChannelActor<R, W> {
    reader: FramedRead<R, IpcCodec>,
    writer: FramedWrite<W, IpcCodec>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: watch::Sender<ProcessStatus>,
    child: Option<Child>,
    store: RequestStore,
    outbox: VecDeque<IpcMessage>,
    next_id: u64,
    write_delay: Duration,
    flush_at: Option<Instant>,
    reader_open: bool,
    exited: Option<Option<i32>>,
    closed_sent: bool,
}

impl<R, W> ChannelActor<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(mut self) {
        loop {
            let flush_at = self.flush_at;
            let deadline = self.store.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => if !self.handle_command(command).await {
                        break;
                    },
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                frame = self.reader.next(), if self.reader_open => self.handle_frame(frame).await,
                status = wait_for_exit(&mut self.child) => self.handle_exit(status),
                _ = sleep_until(flush_at) => self.flush().await,
                _ = sleep_until(deadline) => self.store.expire(Instant::now()),
            }
        }
        tracing::debug!("channel task finished");
    }

    /// Returns false once the channel has been stopped
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send {
                r#type,
                data,
                reply,
            } => {
                self.enqueue(r#type, data, reply);
            }
            Command::SendAsync {
                r#type,
                data,
                timeout,
                respond_to,
            } => {
                if self.closed_sent || !matches!(*self.status.borrow(), ProcessStatus::Running) {
                    tracing::debug!(%r#type, "interpreter gone, failing request");
                    let _ = respond_to.send(Err(ChannelError::Closed));
                    return true;
                }
                let id = self.enqueue(r#type, data, None);
                self.store.insert(id, respond_to, timeout);
            }
            Command::Stop => {
                self.shutdown().await;
                return false;
            }
        }
        true
    }

    fn enqueue(&mut self, r#type: String, data: Value, reply: Option<MessageId>) -> MessageId {
        self.next_id += 1;
        let id = self.next_id.to_string();
        self.outbox.push_back(IpcMessage {
            r#type,
            id: id.clone(),
            reply,
            data,
        });
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.write_delay);
        }
        id
    }

    async fn flush(&mut self) {
        self.flush_at = None;
        if !matches!(*self.status.borrow(), ProcessStatus::Running) {
            tracing::debug!(queued = self.outbox.len(), "interpreter not writable, holding messages");
            return;
        }

        while let Some(message) = self.outbox.pop_front() {
            tracing::trace!(r#type = %message.r#type, id = %message.id, "sending message");
            if let Err(e) = self.writer.send(message).await {
                tracing::warn!(error = %e, "writing message to interpreter");
                self.emit(ChannelEvent::Error(e.to_string()));
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<DecodedFrame, CodecError>>) {
        match frame {
            None => {
                tracing::debug!("interpreter output closed");
                self.reader_open = false;
                if self.child.is_none() {
                    self.status.send_replace(ProcessStatus::Exited(None));
                }
                self.maybe_closed();
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "reading interpreter output");
                self.emit(ChannelEvent::Error(e.to_string()));
            }
            Some(Ok(Err(malformed))) => {
                tracing::warn!(raw = %malformed.raw, error = %malformed.error, "unparseable message");
                self.emit(ChannelEvent::UnknownMessage(malformed.raw));
            }
            Some(Ok(Ok(message))) => self.dispatch(message).await,
        }
    }

    async fn dispatch(&mut self, message: IpcMessage) {
        if message.is_ping() {
            tracing::trace!(id = %message.id, "answering ping");
            self.enqueue(
                PING_RESPONSE.to_string(),
                Value::String(timestamp_millis()),
                Some(message.id),
            );
            self.flush().await;
            return;
        }

        if let Some(reply_to) = message.reply.clone() {
            if self.store.contains(&reply_to) {
                tracing::trace!(%reply_to, r#type = %message.r#type, "received reply");
                self.store.resolve(&reply_to, message);
                return;
            }
        }

        if message.r#type == PING_RESPONSE {
            tracing::debug!(id = %message.id, "dropping unmatched pong");
            return;
        }

        self.emit(ChannelEvent::Message(message));
    }

    fn handle_exit(&mut self, status: std::io::Result<std::process::ExitStatus>) {
        self.child = None;
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "waiting for interpreter process");
                None
            }
        };
        tracing::debug!(?code, "interpreter exited");
        self.exited = Some(code);
        if !matches!(*self.status.borrow(), ProcessStatus::Killed) {
            self.status.send_replace(ProcessStatus::Exited(code));
        }
        self.emit(ChannelEvent::Exited(code));
        self.maybe_closed();
    }

    fn maybe_closed(&mut self) {
        if self.closed_sent || self.reader_open {
            return;
        }
        let Some(code) = self.exited else {
            return;
        };
        self.closed_sent = true;
        self.store.close_all();
        self.emit(ChannelEvent::Closed(code));
    }

    async fn shutdown(&mut self) {
        self.status.send_replace(ProcessStatus::Killed);
        self.outbox.clear();
        self.store.close_all();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "killing interpreter process");
            }
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "reaping interpreter process");
                    None
                }
            };
            self.exited = Some(code);
            self.emit(ChannelEvent::Exited(code));
        }

        if !self.closed_sent {
            self.closed_sent = true;
            self.emit(ChannelEvent::Closed(self.exited.flatten()));
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no event listener");
        }
    }
}

async fn wait_for_exit(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn forward_stderr(mut stderr: BoxedReader, events: mpsc::UnboundedSender<ChannelEvent>) {
    let mut buf = vec![0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                tracing::debug!(%text, "interpreter wrote to stderr");
                if events.send(ChannelEvent::ErrorMessage(text)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading interpreter stderr");
                break;
            }
        }
    }
}

fn timestamp_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}
