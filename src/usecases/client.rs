//! Wires the session, realtime connection, chat list and notification gate
//! into one client and drives the boot sequence and signal loop.

use std::{future::Future, rc::Rc, time::Duration};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    domain::notification::{NavigationFocus, NotificationEvent},
    infra::config::AppConfig,
    usecases::{
        chat_sync::{ChatSyncEngine, SyncSettings},
        connection::{ConnectOutcome, ConnectionCoordinator, ConnectionSettings, SyncSignal},
        contracts::{
            AuthRejectionSink, ChatApi, ConnectionControl, KeyValueStore, RealtimeTransport,
            StoreError,
        },
        focus::FocusState,
        notification_gate::{GateDecision, NotificationGate},
        push::{self, PushOutcome},
        session::{SessionEvent, SessionManager, SessionSettings},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientSettings {
    pub session: SessionSettings,
    pub connection: ConnectionSettings,
    pub sync: SyncSettings,
}

impl ClientSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let refresh_interval = match config.session.refresh_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            session: SessionSettings {
                refresh_interval,
                expiry_skew_secs: config.session.expiry_skew_secs,
            },
            connection: ConnectionSettings {
                liveness_interval: Duration::from_millis(config.realtime.liveness_interval_ms),
            },
            sync: SyncSettings {
                refresh_debounce: Duration::from_millis(config.sync.refresh_debounce_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// Nothing persisted; the user has to log in.
    SignedOut,
    /// The backend rejected the persisted credentials.
    SessionEnded,
    /// The access token is stale and the backend could not be reached to
    /// refresh it. The persisted session is kept.
    Unreachable,
    Ready {
        user_id: Option<String>,
        realtime: bool,
        push: PushOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    SessionExpired,
    LoggedOut,
}

pub struct ClientCore {
    pub store: Rc<dyn KeyValueStore>,
    pub api: Rc<dyn ChatApi>,
    pub session: Rc<SessionManager>,
    pub connection: Rc<ConnectionCoordinator>,
    pub chats: Rc<ChatSyncEngine>,
    pub focus: Rc<FocusState>,
    pub gate: NotificationGate,
    sync_rx: mpsc::UnboundedReceiver<SyncSignal>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl ClientCore {
    pub fn new(
        store: Rc<dyn KeyValueStore>,
        api: Rc<dyn ChatApi>,
        transport: Rc<dyn RealtimeTransport>,
        settings: ClientSettings,
    ) -> Self {
        let session = SessionManager::new(Rc::clone(&store), Rc::clone(&api), settings.session);
        let (connection, sync_rx) = ConnectionCoordinator::new(transport, settings.connection);

        let sink: Rc<dyn AuthRejectionSink> = session.clone();
        connection.set_auth_sink(Rc::downgrade(&sink));
        let control: Rc<dyn ConnectionControl> = connection.clone();
        session.bind_connection(control);

        let focus = Rc::new(FocusState::default());
        let chats = ChatSyncEngine::new(
            Rc::clone(&api),
            Rc::clone(&session),
            focus.clone(),
            settings.sync,
        );
        let gate = NotificationGate::new(Rc::clone(&session), focus.clone());
        let session_rx = session.subscribe();

        Self {
            store,
            api,
            session,
            connection,
            chats,
            focus,
            gate,
            sync_rx,
            session_rx,
        }
    }

    /// Restores the persisted session and brings the client online. The
    /// initial chat list arrives with the first `Resync`, or is fetched here
    /// when the realtime connect fails.
    pub async fn boot(&self) -> Result<BootOutcome, StoreError> {
        if !self.session.restore().await? {
            return Ok(BootOutcome::SignedOut);
        }

        if !self.session.ensure_valid_token().await {
            return Ok(if self.session.is_authenticated() {
                tracing::warn!("access token could not be refreshed; backend unreachable");
                BootOutcome::Unreachable
            } else {
                BootOutcome::SessionEnded
            });
        }

        let user_id = match self.session.load_current_user().await {
            Ok(user) => Some(user.id),
            Err(_) if !self.session.is_authenticated() => return Ok(BootOutcome::SessionEnded),
            Err(error) => {
                tracing::warn!(error = %error, "identity unavailable; continuing without it");
                None
            }
        };

        let push =
            push::register_stored(self.store.as_ref(), self.api.as_ref(), &self.session).await?;
        if !self.session.is_authenticated() {
            return Ok(BootOutcome::SessionEnded);
        }

        let Some(access_token) = self.session.access_token() else {
            return Ok(BootOutcome::SessionEnded);
        };

        let realtime = match self.connection.connect(&access_token).await {
            Ok(ConnectOutcome::Connected | ConnectOutcome::AlreadyBound) => true,
            // A teardown or a newer handshake owns the stream and its resync.
            Ok(ConnectOutcome::Superseded) => false,
            Err(_) if !self.session.is_authenticated() => return Ok(BootOutcome::SessionEnded),
            Err(_) => {
                let _ = self.chats.resync().await;
                false
            }
        };

        tracing::info!(
            user_id = user_id.as_deref().unwrap_or("unknown"),
            realtime,
            "client online"
        );

        Ok(BootOutcome::Ready {
            user_id,
            realtime,
            push,
        })
    }

    /// Feeds realtime signals into the chat list until `shutdown` resolves or
    /// the session ends. Must run inside a `LocalSet`.
    pub async fn run<F>(&mut self, shutdown: F) -> RunExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                () = &mut shutdown => break RunExit::Shutdown,
                Some(signal) = self.sync_rx.recv() => self.dispatch(signal).await,
                event = self.session_rx.recv() => match event {
                    Some(SessionEvent::Expired) => break RunExit::SessionExpired,
                    Some(SessionEvent::LoggedOut) | None => break RunExit::LoggedOut,
                    Some(other) => tracing::debug!(event = ?other, "session event"),
                },
            }
        };

        self.connection.disconnect();
        if exit != RunExit::Shutdown {
            self.chats.reset();
        }
        tracing::info!(exit = ?exit, "client loop stopped");
        exit
    }

    async fn dispatch(&self, signal: SyncSignal) {
        match signal {
            SyncSignal::Resync => {
                // Detached so events arriving during the fetch are buffered.
                let chats = Rc::clone(&self.chats);
                tokio::task::spawn_local(async move {
                    chats.handle_signal(SyncSignal::Resync).await;
                });
            }
            SyncSignal::Event { .. } => {
                self.chats.handle_signal(signal).await;
                tracing::debug!(
                    conversations = self.chats.conversations().len(),
                    unread = self.chats.total_unread(),
                    "chat list changed"
                );
            }
            SyncSignal::StateChanged(_) => self.chats.handle_signal(signal).await,
        }
    }

    /// Normalizes a push payload and evaluates it against `focus`.
    pub fn preview_notification(
        &self,
        payload: Value,
        focus: NavigationFocus,
    ) -> (NotificationEvent, GateDecision) {
        self.focus.set(focus);
        self.gate.evaluate_payload(payload)
    }
}
