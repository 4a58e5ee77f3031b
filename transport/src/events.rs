use crate::message::IpcMessage;

/// Notifications published by a [`crate::Channel`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The interpreter process was started
    Spawned,
    /// The interpreter process exited with the given code
    Exited(Option<i32>),
    /// The interpreter's output stream closed, carrying the exit code when known
    Closed(Option<i32>),
    /// Reading or writing the stream failed
    Error(String),
    /// Text written by the interpreter to its error stream
    ErrorMessage(String),
    /// A frame that could not be parsed as a message
    UnknownMessage(String),
    /// A message that was not a ping and did not answer a pending request
    Message(IpcMessage),
}
