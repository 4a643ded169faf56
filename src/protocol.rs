//! Event envelopes exchanged over the socket.
//!
//! Every frame is a JSON text frame of the form `{"event": <name>, "data": <payload>}`.

use crate::types::{ChatMessage, MessageDraft};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Chat message to persist and relay to everyone else
    Message(MessageDraft),
    /// Opaque payload echoed to every connection, sender included
    Feedback(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ChatMessage(ChatMessage),
    Feedback(Value),
    ClientsTotal(usize),
    /// Sent only to the connection whose frame could not be handled
    Error { code: String, msg: String },
}
