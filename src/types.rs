use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types
pub type ConnectionId = String;
pub type UserId = String;

/// Identity extracted from a verified credential.
///
/// Owned by the connection for its lifetime and never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    user_id: UserId,
}

impl IdentityClaim {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// A persisted chat message.
///
/// `user_id` always comes from the sender's [`IdentityClaim`], never from
/// client input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: UserId,
    pub name: String,
    pub message: String,
    pub date_time: DateTime<Utc>,
}

/// Body of an inbound `message` event.
///
/// A client-supplied `userId` is accepted on the wire but dropped here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub name: String,
    pub message: String,
    pub date_time: DateTime<Utc>,
}

impl MessageDraft {
    /// Attach the sender identity, producing the record that gets stored and relayed.
    pub fn stamp(self, claim: &IdentityClaim) -> ChatMessage {
        ChatMessage {
            user_id: claim.user_id().to_string(),
            name: self.name,
            message: self.message,
            date_time: self.date_time,
        }
    }
}
