use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Message,
    Chat,
    Like,
    Comment,
    Follow,
    Other(String),
}

impl NotificationKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "message" | "new_message" => Self::Message,
            "chat" => Self::Chat,
            "like" => Self::Like,
            "comment" => Self::Comment,
            "follow" => Self::Follow,
            _ => Self::Other(raw.to_owned()),
        }
    }

    pub fn is_conversation(&self) -> bool {
        matches!(self, Self::Message | Self::Chat)
    }

    pub fn is_social(&self) -> bool {
        matches!(self, Self::Like | Self::Comment | Self::Follow)
    }
}

/// Normalized notification envelope, independent of push or local origin.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    /// The acting user: message author, liker, commenter or follower.
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub chat_id: Option<String>,
    pub payload: Value,
}

const KIND_KEYS: [&str; 2] = ["type", "kind"];
const SENDER_KEYS: [&str; 3] = ["senderId", "fromUserId", "actorId"];
const RECIPIENT_KEYS: [&str; 2] = ["recipientId", "toUserId"];
const CHAT_KEYS: [&str; 2] = ["chatId", "conversationId"];

impl NotificationEvent {
    /// Normalizes an opaque push/local payload. Fields are read from the top
    /// level first, then from a nested `data` object. Never fails; whatever
    /// cannot be resolved stays `None`.
    pub fn from_payload(payload: Value) -> Self {
        let (kind, sender_id, recipient_id, chat_id) = {
            let top = payload.as_object();
            let nested = top.and_then(|map| map.get("data")).and_then(Value::as_object);
            let lookup = |keys: &[&str]| {
                top.and_then(|map| first_string(map, keys))
                    .or_else(|| nested.and_then(|map| first_string(map, keys)))
            };

            (
                lookup(&KIND_KEYS[..]),
                lookup(&SENDER_KEYS[..]),
                lookup(&RECIPIENT_KEYS[..]),
                lookup(&CHAT_KEYS[..]),
            )
        };

        Self {
            kind: NotificationKind::parse(kind.as_deref().unwrap_or_default()),
            sender_id,
            recipient_id,
            chat_id,
            payload,
        }
    }
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.clone()),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}

/// What the user is looking at, as reported by the navigation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationFocus {
    pub screen: String,
    pub chat_id: Option<String>,
}

impl NavigationFocus {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self {
            screen: "chat".to_owned(),
            chat_id: Some(chat_id.into()),
        }
    }

    pub fn is_chat_open(&self, chat_id: &str) -> bool {
        self.chat_id.as_deref() == Some(chat_id)
    }
}
