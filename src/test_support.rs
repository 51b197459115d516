use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::{
    domain::{
        conversation::{ConversationKind, ConversationSummary, LastMessage},
        session::{AuthTokens, CurrentUser},
    },
    usecases::contracts::{
        ApiError, ChatApi, ConnectionControl, KeyValueStore, RealtimeLink,
        RealtimeTransport, StoreError, TransportError, TransportSignal,
    },
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().expect("env lock should not be poisoned")
}

/// Unsigned JWT carrying only an `exp` claim.
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

pub fn fresh_jwt() -> String {
    jwt_with_exp(Utc::now().timestamp() + 3_600)
}

pub fn stale_jwt() -> String {
    jwt_with_exp(Utc::now().timestamp() - 3_600)
}

pub fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn conversation(id: &str, minute: u32) -> ConversationSummary {
    ConversationSummary {
        id: id.to_owned(),
        kind: ConversationKind::Direct,
        title: None,
        participants: vec![],
        last_message: None,
        unread_count: 0,
        updated_at: at_minute(minute),
    }
}

pub fn last_message(id: &str, sender: &str, minute: u32) -> LastMessage {
    LastMessage {
        id: id.to_owned(),
        text: format!("text of {id}"),
        sender_id: sender.to_owned(),
        timestamp: at_minute(minute),
    }
}

/// In-memory store that suspends on every operation, like real I/O.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
    writes: RefCell<Vec<String>>,
    removals: RefCell<Vec<String>>,
    fail_removals: Cell<bool>,
}

impl MemoryStore {
    pub fn with(entries: &[(&str, &str)]) -> Rc<Self> {
        let store = Self::default();
        for (key, value) in entries {
            store
                .values
                .borrow_mut()
                .insert((*key).to_owned(), (*value).to_owned());
        }
        Rc::new(store)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    pub fn write_count(&self, key: &str) -> usize {
        self.writes.borrow().iter().filter(|k| *k == key).count()
    }

    pub fn removal_count(&self, key: &str) -> usize {
        self.removals.borrow().iter().filter(|k| *k == key).count()
    }

    pub fn fail_removals(&self) {
        self.fail_removals.set(true);
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.writes.borrow_mut().push(key.to_owned());
        self.values
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.removals.borrow_mut().push(key.to_owned());
        if self.fail_removals.get() {
            return Err(StoreError::Unavailable("removal rejected".to_owned()));
        }
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Login(String),
    Refresh(String),
    CurrentUser(String),
    ListChats(String),
    DeleteChat(String),
    RegisterPush(String),
}

/// Scriptable backend double. Every call suspends once before answering.
pub struct FakeChatApi {
    pub login_result: RefCell<Result<AuthTokens, ApiError>>,
    pub refresh_result: RefCell<Result<AuthTokens, ApiError>>,
    pub user_result: RefCell<Result<CurrentUser, ApiError>>,
    pub chats_result: RefCell<Result<Vec<ConversationSummary>, ApiError>>,
    pub delete_result: RefCell<Result<(), ApiError>>,
    pub push_result: RefCell<Result<(), ApiError>>,
    list_gate: RefCell<Option<Rc<Notify>>>,
    calls: RefCell<Vec<ApiCall>>,
}

impl Default for FakeChatApi {
    fn default() -> Self {
        Self {
            login_result: RefCell::new(Ok(tokens("login-access", Some("login-refresh")))),
            refresh_result: RefCell::new(Ok(tokens("refreshed-access", None))),
            user_result: RefCell::new(Ok(CurrentUser {
                id: "me".to_owned(),
                username: Some("me".to_owned()),
            })),
            chats_result: RefCell::new(Ok(vec![])),
            delete_result: RefCell::new(Ok(())),
            push_result: RefCell::new(Ok(())),
            list_gate: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
        }
    }
}

pub fn tokens(access: &str, refresh: Option<&str>) -> AuthTokens {
    AuthTokens {
        access_token: access.to_owned(),
        refresh_token: refresh.map(str::to_owned),
    }
}

impl FakeChatApi {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_chats(&self, chats: Vec<ConversationSummary>) {
        *self.chats_result.borrow_mut() = Ok(chats);
    }

    /// Makes `list_chats` wait until the returned handle is notified.
    pub fn hold_list_chats(&self) -> Rc<Notify> {
        let gate = Rc::new(Notify::new());
        *self.list_gate.borrow_mut() = Some(Rc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, matcher: fn(&ApiCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| matcher(call)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.borrow_mut().push(call);
    }
}

#[async_trait(?Send)]
impl ChatApi for FakeChatApi {
    async fn login(&self, username: &str, _password: &str) -> Result<AuthTokens, ApiError> {
        self.record(ApiCall::Login(username.to_owned()));
        tokio::task::yield_now().await;
        self.login_result.borrow().clone()
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        self.record(ApiCall::Refresh(refresh_token.to_owned()));
        tokio::task::yield_now().await;
        self.refresh_result.borrow().clone()
    }

    async fn get_current_user(&self, access_token: &str) -> Result<CurrentUser, ApiError> {
        self.record(ApiCall::CurrentUser(access_token.to_owned()));
        tokio::task::yield_now().await;
        self.user_result.borrow().clone()
    }

    async fn list_chats(&self, access_token: &str) -> Result<Vec<ConversationSummary>, ApiError> {
        self.record(ApiCall::ListChats(access_token.to_owned()));
        let gate = self.list_gate.borrow_mut().take();
        match gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        self.chats_result.borrow().clone()
    }

    async fn delete_chat(&self, _access_token: &str, chat_id: &str) -> Result<(), ApiError> {
        self.record(ApiCall::DeleteChat(chat_id.to_owned()));
        tokio::task::yield_now().await;
        self.delete_result.borrow().clone()
    }

    async fn register_push_token(
        &self,
        _access_token: &str,
        push_token: &str,
    ) -> Result<(), ApiError> {
        self.record(ApiCall::RegisterPush(push_token.to_owned()));
        tokio::task::yield_now().await;
        self.push_result.borrow().clone()
    }
}

struct FakeLink {
    signals: mpsc::UnboundedSender<TransportSignal>,
    close_rx: oneshot::Receiver<()>,
}

/// Transport double that hands out links the test can drive.
#[derive(Default)]
pub struct FakeTransport {
    opened: RefCell<Vec<String>>,
    next_error: RefCell<Option<TransportError>>,
    links: RefCell<Vec<FakeLink>>,
}

impl FakeTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn opened_tokens(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.borrow().len()
    }

    pub fn fail_next_open(&self, error: TransportError) {
        *self.next_error.borrow_mut() = Some(error);
    }

    /// Sends a signal on the most recently opened link.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        self.links
            .borrow()
            .last()
            .is_some_and(|link| link.signals.send(signal).is_ok())
    }

    /// Simulates the transport giving up on the latest link.
    pub fn end_latest_stream(&self) {
        let (dead_tx, _) = mpsc::unbounded_channel();
        if let Some(link) = self.links.borrow_mut().last_mut() {
            link.signals = dead_tx;
        }
    }

    pub fn closed_links(&self) -> usize {
        let mut closed = 0;
        for link in self.links.borrow_mut().iter_mut() {
            if !matches!(
                link.close_rx.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ) {
                closed += 1;
            }
        }
        closed
    }
}

#[async_trait(?Send)]
impl RealtimeTransport for FakeTransport {
    async fn open(&self, access_token: &str) -> Result<RealtimeLink, TransportError> {
        self.opened.borrow_mut().push(access_token.to_owned());
        tokio::task::yield_now().await;

        let failure = self.next_error.borrow_mut().take();
        if let Some(error) = failure {
            return Err(error);
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        self.links.borrow_mut().push(FakeLink {
            signals: signal_tx,
            close_rx,
        });

        Ok(RealtimeLink::new(signal_rx, close_tx))
    }
}

#[derive(Debug, Default)]
pub struct CountingConnection {
    pub disconnects: Cell<usize>,
    pub rebinds: RefCell<Vec<String>>,
}

impl ConnectionControl for CountingConnection {
    fn rebind(&self, access_token: &str) {
        self.rebinds.borrow_mut().push(access_token.to_owned());
    }

    fn disconnect(&self) {
        self.disconnects.set(self.disconnects.get() + 1);
    }
}
