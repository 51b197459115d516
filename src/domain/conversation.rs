use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of conversation as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// 1-to-1 conversation between the current user and one other user.
    #[default]
    Direct,
    /// Conversation with more than two participants.
    Group,
}

/// Presence of a participant. Unrecognized values are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, alias = "type")]
    pub kind: ConversationKind,
    /// Group name; direct chats are titled after the other participant by the UI.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants
            .iter()
            .any(|participant| participant.id == user_id)
    }
}

/// Partial update carried by a `chat_updated` event. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.participants.is_none()
            && self.last_message.is_none()
            && self.unread_count.is_none()
            && self.updated_at.is_none()
    }

    pub fn merge_into(self, conversation: &mut ConversationSummary) {
        if let Some(title) = self.title {
            conversation.title = Some(title);
        }

        if let Some(participants) = self.participants {
            conversation.participants = participants;
        }

        if let Some(last_message) = self.last_message {
            conversation.last_message = Some(last_message);
        }

        if let Some(unread_count) = self.unread_count {
            conversation.unread_count = unread_count;
        }

        if let Some(updated_at) = self.updated_at {
            conversation.updated_at = updated_at;
        }
    }
}
