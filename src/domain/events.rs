use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::conversation::{ConversationPatch, LastMessage, PresenceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Disconnected => "REALTIME_DISCONNECTED",
            Self::Connecting => "REALTIME_CONNECTING",
            Self::Connected => "REALTIME_CONNECTED",
        }
    }
}

/// Inbound realtime event after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    NewMessage {
        chat_id: String,
        message: LastMessage,
    },
    ChatUpdated {
        chat_id: String,
        updates: ConversationPatch,
    },
    UserStatusUpdate {
        user_id: String,
        status: PresenceStatus,
    },
    ChatDeleted {
        chat_id: String,
    },
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("unsupported realtime event `{0}`")]
    UnknownEvent(String),
    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{event}` payload is missing `{field}`")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessagePayload {
    chat_id: String,
    message: LastMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatUpdatedPayload {
    chat_id: String,
    #[serde(default)]
    updates: ConversationPatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusPayload {
    user_id: String,
    status: PresenceStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatDeletedPayload {
    chat_id: String,
}

impl RealtimeEvent {
    /// Validates a raw transport event. `message` and `chat_message` are legacy
    /// names for `new_message`.
    pub fn from_wire(name: &str, payload: Value) -> Result<Self, EventParseError> {
        match name {
            "new_message" | "message" | "chat_message" => {
                let parsed: NewMessagePayload = decode("new_message", payload)?;
                require("new_message", "chatId", &parsed.chat_id)?;
                require("new_message", "message.id", &parsed.message.id)?;
                Ok(Self::NewMessage {
                    chat_id: parsed.chat_id,
                    message: parsed.message,
                })
            }
            "chat_updated" => {
                let parsed: ChatUpdatedPayload = decode("chat_updated", payload)?;
                require("chat_updated", "chatId", &parsed.chat_id)?;
                Ok(Self::ChatUpdated {
                    chat_id: parsed.chat_id,
                    updates: parsed.updates,
                })
            }
            "user_status_update" => {
                let parsed: UserStatusPayload = decode("user_status_update", payload)?;
                require("user_status_update", "userId", &parsed.user_id)?;
                Ok(Self::UserStatusUpdate {
                    user_id: parsed.user_id,
                    status: parsed.status,
                })
            }
            "chat_deleted" => {
                let parsed: ChatDeletedPayload = decode("chat_deleted", payload)?;
                require("chat_deleted", "chatId", &parsed.chat_id)?;
                Ok(Self::ChatDeleted {
                    chat_id: parsed.chat_id,
                })
            }
            other => Err(EventParseError::UnknownEvent(other.to_owned())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::ChatUpdated { .. } => "chat_updated",
            Self::UserStatusUpdate { .. } => "user_status_update",
            Self::ChatDeleted { .. } => "chat_deleted",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event: &'static str,
    payload: Value,
) -> Result<T, EventParseError> {
    serde_json::from_value(payload).map_err(|source| EventParseError::Malformed { event, source })
}

fn require(
    event: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), EventParseError> {
    if value.trim().is_empty() {
        return Err(EventParseError::MissingField { event, field });
    }

    Ok(())
}
