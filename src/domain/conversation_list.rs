use std::collections::HashSet;

use super::conversation::{
    ConversationKind, ConversationPatch, ConversationSummary, LastMessage, PresenceStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    /// No authoritative fetch has completed yet.
    Loading,
    Ready,
    Empty,
    /// The last fetch failed. Cached entries are kept.
    Stale,
}

/// Who is reading and what is on screen, as needed for unread accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadContext<'a> {
    pub current_user_id: Option<&'a str>,
    pub focused_chat_id: Option<&'a str>,
}

impl ReadContext<'_> {
    fn counts_as_unread(&self, chat_id: &str, sender_id: &str) -> bool {
        let own_message = self.current_user_id == Some(sender_id);
        let focused = self.focused_chat_id == Some(chat_id);
        !own_message && !focused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Promoted { unread_incremented: bool },
    /// Same message id as the stored last message; nothing changed.
    Duplicate,
    /// Chat is not in the list; callers refresh instead of synthesizing a record.
    UnknownChat,
}

/// Ordered conversation cache: unique by id, most recently mutated first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationList {
    status: ListStatus,
    conversations: Vec<ConversationSummary>,
}

impl Default for ConversationList {
    fn default() -> Self {
        Self {
            status: ListStatus::Loading,
            conversations: Vec::new(),
        }
    }
}

impl ConversationList {
    pub fn status(&self) -> ListStatus {
        self.status
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn get(&self, chat_id: &str) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|chat| chat.id == chat_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .map(|chat| chat.unread_count)
            .fold(0, u32::saturating_add)
    }

    pub fn set_loading(&mut self) {
        self.status = ListStatus::Loading;
        self.conversations.clear();
    }

    pub fn set_stale(&mut self) {
        self.status = ListStatus::Stale;
    }

    /// Replaces the cache with an authoritative snapshot.
    pub fn replace_all(&mut self, mut conversations: Vec<ConversationSummary>) {
        conversations.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        self.conversations = conversations;
        self.enforce_unique_ids();

        self.status = if self.conversations.is_empty() {
            ListStatus::Empty
        } else {
            ListStatus::Ready
        };
    }

    pub fn apply_incoming_message(
        &mut self,
        chat_id: &str,
        message: LastMessage,
        context: ReadContext<'_>,
    ) -> MessageOutcome {
        let Some(index) = self.position(chat_id) else {
            return MessageOutcome::UnknownChat;
        };

        let conversation = &mut self.conversations[index];
        if conversation
            .last_message
            .as_ref()
            .is_some_and(|last| last.id == message.id)
        {
            return MessageOutcome::Duplicate;
        }

        let unread_incremented = context.counts_as_unread(chat_id, &message.sender_id);
        if unread_incremented {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        if message.timestamp > conversation.updated_at {
            conversation.updated_at = message.timestamp;
        }
        conversation.last_message = Some(message);

        self.promote_to_front(index);
        self.enforce_unique_ids();

        MessageOutcome::Promoted { unread_incremented }
    }

    /// Whether the stored record already reflects `message`, i.e. it is the
    /// last message or the record moved on past its timestamp.
    pub fn covers_message(&self, chat_id: &str, message: &LastMessage) -> bool {
        let Some(conversation) = self.get(chat_id) else {
            return false;
        };

        conversation.updated_at >= message.timestamp
            || conversation
                .last_message
                .as_ref()
                .is_some_and(|last| last.id == message.id || last.timestamp >= message.timestamp)
    }

    /// Shallow-merges `patch` into the matching record without reordering.
    pub fn apply_patch(&mut self, chat_id: &str, patch: ConversationPatch) -> bool {
        let Some(index) = self.position(chat_id) else {
            return false;
        };

        patch.merge_into(&mut self.conversations[index]);
        self.enforce_unique_ids();
        true
    }

    /// Updates the participant's presence in every direct chat they belong to.
    /// Returns the number of conversations touched.
    pub fn apply_user_status(&mut self, user_id: &str, status: PresenceStatus) -> usize {
        let mut touched = 0;

        for conversation in self
            .conversations
            .iter_mut()
            .filter(|chat| chat.kind == ConversationKind::Direct)
        {
            let mut changed = false;
            for participant in conversation
                .participants
                .iter_mut()
                .filter(|participant| participant.id == user_id)
            {
                participant.status = status;
                changed = true;
            }

            if changed {
                touched += 1;
            }
        }

        touched
    }

    pub fn remove(&mut self, chat_id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|chat| chat.id != chat_id);
        let removed = self.conversations.len() != before;

        if removed && self.conversations.is_empty() && self.status == ListStatus::Ready {
            self.status = ListStatus::Empty;
        }

        removed
    }

    /// Zeroes the unread counter. Returns whether anything changed.
    pub fn mark_read(&mut self, chat_id: &str) -> bool {
        match self.position(chat_id) {
            Some(index) if self.conversations[index].unread_count > 0 => {
                self.conversations[index].unread_count = 0;
                true
            }
            _ => false,
        }
    }

    fn position(&self, chat_id: &str) -> Option<usize> {
        self.conversations.iter().position(|chat| chat.id == chat_id)
    }

    fn promote_to_front(&mut self, index: usize) {
        if index > 0 {
            self.conversations[..=index].rotate_right(1);
        }
    }

    /// Keeps the first (most recent) record of every id.
    fn enforce_unique_ids(&mut self) {
        let mut seen = HashSet::with_capacity(self.conversations.len());
        self.conversations.retain(|chat| seen.insert(chat.id.clone()));
    }
}
