//! Messages exchanged with the interpreter
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a message, unique within one channel
pub type MessageId = String;

/// Keep-alive request sent by the interpreter
pub const PING_REQUEST: &str = "base/ping/req";
/// Answer to [`PING_REQUEST`]
pub const PING_RESPONSE: &str = "base/ping/res";

/// A single frame on the wire
///
/// `reply` names the id of the message this one answers, and is `null` for
/// unsolicited pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub r#type: String,
    pub id: MessageId,
    #[serde(default)]
    pub reply: Option<MessageId>,
    #[serde(default)]
    pub data: Value,
}

impl IpcMessage {
    pub fn new(r#type: impl Into<String>, id: impl Into<MessageId>, data: Value) -> Self {
        Self {
            r#type: r#type.into(),
            id: id.into(),
            reply: None,
            data,
        }
    }

    pub fn reply_to(mut self, id: impl Into<MessageId>) -> Self {
        self.reply = Some(id.into());
        self
    }

    pub fn is_ping(&self) -> bool {
        self.r#type == PING_REQUEST
    }

    /// Deserialise the payload into a concrete type
    pub fn data_as<T>(&self) -> serde_json::Result<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(&self.data)
    }
}
