//! Keeps the cached conversation list consistent with realtime events,
//! local actions and authoritative re-fetches.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

use thiserror::Error;

use crate::{
    domain::{
        conversation::{ConversationPatch, ConversationSummary, LastMessage, PresenceStatus},
        conversation_list::{ConversationList, ListStatus, MessageOutcome, ReadContext},
        events::RealtimeEvent,
    },
    usecases::{
        connection::SyncSignal,
        contracts::{ApiError, ChatApi, FailureClass, FocusProvider},
        session::SessionManager,
        timer::TimerGuard,
    },
};

const SYNC_EVENT_REJECTED: &str = "SYNC_EVENT_REJECTED";
const SYNC_RESYNC_FAILED: &str = "SYNC_RESYNC_FAILED";
const SYNC_DELETE_FAILED: &str = "SYNC_DELETE_FAILED";

#[derive(Debug, Error)]
pub enum ChatSyncError {
    #[error("chat sync requires an authenticated session")]
    NotAuthenticated,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Window in which unknown-chat refreshes are coalesced.
    pub refresh_debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            refresh_debounce: Duration::from_millis(400),
        }
    }
}

/// Local actions on the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMutation {
    MarkRead,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    /// Applied locally at once, without a confirmation round trip.
    Optimistic,
    /// Applied locally only after the backend confirmed it.
    ConfirmedOnly,
}

impl LocalMutation {
    pub const fn policy(self) -> MutationPolicy {
        match self {
            // Read state reaches the backend as a side effect of message
            // fetches; local and server counters may diverge briefly.
            Self::MarkRead => MutationPolicy::Optimistic,
            Self::Delete => MutationPolicy::ConfirmedOnly,
        }
    }
}

pub struct ChatSyncEngine {
    me: Weak<Self>,
    api: Rc<dyn ChatApi>,
    session: Rc<SessionManager>,
    focus: Rc<dyn FocusProvider>,
    settings: SyncSettings,
    list: RefCell<ConversationList>,
    generation: Cell<u64>,
    /// `Some` while a re-fetch is in flight; events seen meanwhile are
    /// re-applied on top of the fresh snapshot unless it already has them.
    replay_buffer: RefCell<Option<Vec<RealtimeEvent>>>,
    refresh_debounce: RefCell<Option<TimerGuard>>,
}

impl ChatSyncEngine {
    pub fn new(
        api: Rc<dyn ChatApi>,
        session: Rc<SessionManager>,
        focus: Rc<dyn FocusProvider>,
        settings: SyncSettings,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            api,
            session,
            focus,
            settings,
            list: RefCell::new(ConversationList::default()),
            generation: Cell::new(0),
            replay_buffer: RefCell::new(None),
            refresh_debounce: RefCell::new(None),
        })
    }

    pub fn status(&self) -> ListStatus {
        self.list.borrow().status()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.list.borrow().conversations().to_vec()
    }

    pub fn conversation(&self, chat_id: &str) -> Option<ConversationSummary> {
        self.list.borrow().get(chat_id).cloned()
    }

    pub fn total_unread(&self) -> u32 {
        self.list.borrow().total_unread()
    }

    pub async fn handle_signal(&self, signal: SyncSignal) {
        match signal {
            SyncSignal::Event { name, payload } => match RealtimeEvent::from_wire(&name, payload) {
                Ok(event) => self.apply_event(event),
                Err(error) => {
                    tracing::warn!(
                        code = SYNC_EVENT_REJECTED,
                        class = FailureClass::Validation.as_label(),
                        event = %name,
                        error = %error,
                        "dropping malformed realtime event"
                    );
                }
            },
            SyncSignal::Resync => {
                let _ = self.resync().await;
            }
            SyncSignal::StateChanged(state) => {
                tracing::debug!(state = state.as_label(), "chat sync observed connection state");
            }
        }
    }

    pub fn apply_event(&self, event: RealtimeEvent) {
        tracing::trace!(event = event.kind(), "applying realtime event");
        if let Some(buffer) = self.replay_buffer.borrow_mut().as_mut() {
            buffer.push(event.clone());
        }

        match event {
            RealtimeEvent::NewMessage { chat_id, message } => {
                self.apply_incoming_message(&chat_id, message);
            }
            RealtimeEvent::ChatUpdated { chat_id, updates } => {
                self.apply_chat_updated(&chat_id, updates);
            }
            RealtimeEvent::UserStatusUpdate { user_id, status } => {
                self.apply_user_status_update(&user_id, status);
            }
            RealtimeEvent::ChatDeleted { chat_id } => {
                self.apply_chat_deleted(&chat_id);
            }
        }
    }

    pub fn apply_incoming_message(&self, chat_id: &str, message: LastMessage) {
        let current_user_id = self.session.current_user_id();
        let focus = self.focus.focus();
        let context = ReadContext {
            current_user_id: current_user_id.as_deref(),
            focused_chat_id: focus.chat_id.as_deref(),
        };

        let outcome = self
            .list
            .borrow_mut()
            .apply_incoming_message(chat_id, message, context);

        match outcome {
            MessageOutcome::Promoted { unread_incremented } => {
                tracing::debug!(chat_id, unread_incremented, "conversation promoted");
            }
            MessageOutcome::Duplicate => {
                tracing::debug!(chat_id, "duplicate message delivery ignored");
            }
            MessageOutcome::UnknownChat => {
                tracing::debug!(chat_id, "message for unknown chat; scheduling refresh");
                self.schedule_refresh();
            }
        }
    }

    pub fn apply_chat_updated(&self, chat_id: &str, updates: ConversationPatch) {
        if !self.list.borrow_mut().apply_patch(chat_id, updates) {
            tracing::debug!(chat_id, "update for unknown chat ignored");
        }
    }

    pub fn apply_user_status_update(&self, user_id: &str, status: PresenceStatus) {
        let touched = self.list.borrow_mut().apply_user_status(user_id, status);
        tracing::trace!(user_id, touched, "presence applied");
    }

    pub fn apply_chat_deleted(&self, chat_id: &str) {
        if self.list.borrow_mut().remove(chat_id) {
            tracing::info!(chat_id, "conversation removed by realtime event");
        }
    }

    /// Zeroes the unread counter locally. Idempotent.
    pub async fn mark_read(&self, chat_id: &str) -> Result<bool, ChatSyncError> {
        self.apply_mutation(LocalMutation::MarkRead, chat_id).await
    }

    /// Deletes the conversation on the backend, then locally.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool, ChatSyncError> {
        self.apply_mutation(LocalMutation::Delete, chat_id).await
    }

    async fn apply_mutation(
        &self,
        mutation: LocalMutation,
        chat_id: &str,
    ) -> Result<bool, ChatSyncError> {
        match mutation.policy() {
            MutationPolicy::Optimistic => Ok(self.apply_local(mutation, chat_id)),
            MutationPolicy::ConfirmedOnly => {
                self.confirm_remote(mutation, chat_id).await?;
                Ok(self.apply_local(mutation, chat_id))
            }
        }
    }

    fn apply_local(&self, mutation: LocalMutation, chat_id: &str) -> bool {
        let mut list = self.list.borrow_mut();
        match mutation {
            LocalMutation::MarkRead => list.mark_read(chat_id),
            LocalMutation::Delete => list.remove(chat_id),
        }
    }

    async fn confirm_remote(
        &self,
        mutation: LocalMutation,
        chat_id: &str,
    ) -> Result<(), ChatSyncError> {
        let access_token = self
            .session
            .access_token()
            .ok_or(ChatSyncError::NotAuthenticated)?;

        let result = match mutation {
            LocalMutation::MarkRead => Ok(()),
            LocalMutation::Delete => self.api.delete_chat(&access_token, chat_id).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(ApiError::NotFound) => {
                tracing::info!(chat_id, "chat already gone on the backend");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    code = SYNC_DELETE_FAILED,
                    chat_id,
                    error = %error,
                    "backend did not confirm the mutation; list unchanged"
                );
                self.session.report_failure(&error).await;
                Err(error.into())
            }
        }
    }

    /// Authoritative re-fetch. On failure the cache is kept and marked stale.
    pub async fn resync(&self) -> Result<(), ChatSyncError> {
        let Some(access_token) = self.session.access_token() else {
            return Err(ChatSyncError::NotAuthenticated);
        };

        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.replay_buffer.borrow_mut().get_or_insert_with(Vec::new);

        let fetched = self.api.list_chats(&access_token).await;

        if self.generation.get() != generation {
            tracing::debug!("chat list fetch superseded");
            return Ok(());
        }
        let replay = self.replay_buffer.borrow_mut().take().unwrap_or_default();

        match fetched {
            Ok(conversations) => {
                let fetched_count = conversations.len();
                self.list.borrow_mut().replace_all(conversations);

                let mut replayed = 0;
                for event in replay {
                    if self.snapshot_covers(&event) {
                        continue;
                    }
                    replayed += 1;
                    self.apply_event(event);
                }

                if let Some(focused) = self.focus.focus().chat_id {
                    self.list.borrow_mut().mark_read(&focused);
                }

                tracing::info!(
                    conversations = fetched_count,
                    replayed,
                    "chat list resynchronized"
                );
                Ok(())
            }
            Err(error) => {
                self.list.borrow_mut().set_stale();
                tracing::warn!(
                    code = SYNC_RESYNC_FAILED,
                    error = %error,
                    "chat list fetch failed; keeping cached list"
                );
                self.session.report_failure(&error).await;
                Err(error.into())
            }
        }
    }

    fn snapshot_covers(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::NewMessage { chat_id, message } => {
                self.list.borrow().covers_message(chat_id, message)
            }
            _ => false,
        }
    }

    /// Drops the cache and any pending work, e.g. after logout.
    pub fn reset(&self) {
        self.generation.set(self.generation.get() + 1);
        self.replay_buffer.borrow_mut().take();
        let pending = self.refresh_debounce.borrow_mut().take();
        drop(pending);
        *self.list.borrow_mut() = ConversationList::default();
    }

    fn schedule_refresh(&self) {
        if self
            .refresh_debounce
            .borrow()
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
        {
            return;
        }

        let me = self.me.clone();
        let delay = self.settings.refresh_debounce;
        let guard = TimerGuard::spawn("chat-list-refresh", async move {
            tokio::time::sleep(delay).await;
            // Detached: the fetch must survive this guard being replaced.
            tokio::task::spawn_local(async move {
                if let Some(engine) = me.upgrade() {
                    let _ = engine.resync().await;
                }
            });
        });
        *self.refresh_debounce.borrow_mut() = Some(guard);
    }
}
