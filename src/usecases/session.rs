//! Session and token lifecycle.
//!
//! All state lives on one thread. Guards are plain `Cell`s flipped before the
//! first `.await` of the section they protect.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::{
    domain::session::{
        token_freshness, AuthTokens, CurrentUser, Session, TokenFreshness, ACCESS_TOKEN_KEY,
        REFRESH_TOKEN_KEY,
    },
    infra::secrets::token_fingerprint,
    usecases::{
        contracts::{
            ApiError, AuthRejectionSink, ChatApi, ConnectionControl, FailureClass,
            KeyValueStore, StoreError,
        },
        timer::TimerGuard,
    },
};

const SESSION_PERSIST_FAILED: &str = "SESSION_PERSIST_FAILED";
const SESSION_CLEAR_FAILED: &str = "SESSION_CLEAR_FAILED";
const SESSION_REFRESH_FAILED: &str = "SESSION_REFRESH_FAILED";
const SESSION_EXPIRED: &str = "SESSION_EXPIRED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Proactive refresh period; `None` disables the timer.
    pub refresh_interval: Option<Duration>,
    /// Access tokens expiring within this window count as stale.
    pub expiry_skew_secs: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Some(Duration::from_secs(14 * 60)),
            expiry_skew_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established,
    IdentityLoaded { user_id: String },
    Refreshed,
    /// Published once per session episode.
    Expired,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Expiration,
    Logout,
}

/// Resets the handling flag on every exit path of a teardown.
struct HandlingReset<'a>(&'a Cell<bool>);

impl Drop for HandlingReset<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct SessionManager {
    me: Weak<Self>,
    store: Rc<dyn KeyValueStore>,
    api: Rc<dyn ChatApi>,
    settings: SessionSettings,
    session: RefCell<Option<Session>>,
    /// Idle (`false`) / Handling (`true`) for teardown.
    handling: Cell<bool>,
    refresh_lock: Mutex<()>,
    refresh_timer: RefCell<Option<TimerGuard>>,
    connection: RefCell<Option<Rc<dyn ConnectionControl>>>,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl SessionManager {
    pub fn new(
        store: Rc<dyn KeyValueStore>,
        api: Rc<dyn ChatApi>,
        settings: SessionSettings,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            api,
            settings,
            session: RefCell::new(None),
            handling: Cell::new(false),
            refresh_lock: Mutex::new(()),
            refresh_timer: RefCell::new(None),
            connection: RefCell::new(None),
            subscribers: RefCell::new(Vec::new()),
        })
    }

    pub fn bind_connection(&self, connection: Rc<dyn ConnectionControl>) {
        *self.connection.borrow_mut() = Some(connection);
    }

    /// Session lifecycle notifications. Dropping the receiver deregisters it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.session
            .borrow()
            .as_ref()
            .and_then(|session| session.user_id.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.session
            .borrow()
            .as_ref()
            .and_then(|session| session.refresh_token.clone())
    }

    /// Loads persisted credentials. Returns whether a session was restored.
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let access_token = self.store.get(ACCESS_TOKEN_KEY).await?;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).await?;

        if access_token.is_none() && refresh_token.is_none() {
            tracing::info!("no persisted session found");
            return Ok(false);
        }

        if self.is_authenticated() {
            tracing::debug!("session already established; ignoring persisted credentials");
            return Ok(true);
        }

        *self.session.borrow_mut() = Some(Session {
            access_token: access_token.unwrap_or_default(),
            refresh_token,
            user_id: None,
        });
        self.arm_refresh_timer();

        tracing::info!("persisted session restored");
        Ok(true)
    }

    /// Accepts credentials from a login or registration, then persists them.
    pub async fn establish(&self, tokens: AuthTokens) -> Result<(), StoreError> {
        *self.session.borrow_mut() = Some(Session::from_tokens(tokens.clone()));
        self.arm_refresh_timer();
        self.publish(SessionEvent::Established);

        tracing::info!(
            token = %token_fingerprint(&tokens.access_token),
            "session established"
        );

        self.persist_tokens(&tokens).await
    }

    pub fn has_usable_access_token(&self) -> bool {
        self.session.borrow().as_ref().is_some_and(|session| {
            token_freshness(
                &session.access_token,
                Utc::now(),
                self.settings.expiry_skew_secs,
            ) != TokenFreshness::Stale
        })
    }

    /// Whether the access token can be used, refreshing it silently if needed.
    pub async fn ensure_valid_token(&self) -> bool {
        if self.has_usable_access_token() {
            return true;
        }

        if self.refresh_token().is_none() {
            tracing::debug!("access token unusable and no refresh token available");
            return false;
        }

        self.refresh_access_token().await
    }

    pub async fn refresh_access_token(&self) -> bool {
        let observed_access = self.access_token();
        let _permit = self.refresh_lock.lock().await;

        // A concurrent caller may have refreshed while this one waited.
        let current_access = self.access_token();
        if current_access.is_some()
            && current_access != observed_access
            && self.has_usable_access_token()
        {
            return true;
        }

        let Some(refresh_token) = self.refresh_token() else {
            return false;
        };

        match self.api.refresh_access_token(&refresh_token).await {
            Ok(tokens) => self.accept_refreshed(&refresh_token, tokens).await,
            Err(error) => {
                let class = error.classify();
                tracing::warn!(
                    code = SESSION_REFRESH_FAILED,
                    error = %error,
                    class = class.as_label(),
                    "access token refresh failed"
                );

                if class == FailureClass::AuthExpired {
                    self.handle_expiration().await;
                }
                false
            }
        }
    }

    async fn accept_refreshed(&self, used_refresh_token: &str, tokens: AuthTokens) -> bool {
        let accepted = {
            let mut slot = self.session.borrow_mut();
            match slot.as_mut() {
                Some(session) if session.refresh_token.as_deref() == Some(used_refresh_token) => {
                    session.access_token = tokens.access_token.clone();
                    if let Some(rotated) = &tokens.refresh_token {
                        session.refresh_token = Some(rotated.clone());
                    }
                    true
                }
                _ => false,
            }
        };

        if !accepted {
            tracing::warn!("session changed during refresh; discarding refreshed token");
            return false;
        }

        tracing::info!(
            token = %token_fingerprint(&tokens.access_token),
            "access token refreshed"
        );

        let connection = self.connection.borrow().clone();
        if let Some(connection) = connection {
            connection.rebind(&tokens.access_token);
        }
        self.publish(SessionEvent::Refreshed);

        // Persistence failure leaves a usable in-memory session for this run.
        let _ = self.persist_tokens(&tokens).await;
        true
    }

    /// Fetches the current user and records it as the session identity.
    pub async fn load_current_user(&self) -> Result<CurrentUser, ApiError> {
        let Some(access_token) = self.access_token() else {
            return Err(ApiError::Unauthorized);
        };

        let user = match self.api.get_current_user(&access_token).await {
            Ok(user) => user,
            Err(error) => {
                self.report_failure(&error).await;
                return Err(error);
            }
        };

        let recorded = match self.session.borrow_mut().as_mut() {
            Some(session) => {
                session.user_id = Some(user.id.clone());
                true
            }
            None => false,
        };

        if recorded {
            self.publish(SessionEvent::IdentityLoaded {
                user_id: user.id.clone(),
            });
        }

        Ok(user)
    }

    /// Applies the failure classification policy to an error seen by any caller.
    pub async fn report_failure(&self, error: &ApiError) -> FailureClass {
        let class = error.classify();

        match class {
            FailureClass::AuthExpired => {
                tracing::warn!(
                    code = error.code(),
                    class = class.as_label(),
                    "backend rejected credentials"
                );
                self.handle_expiration().await;
            }
            FailureClass::Transient => {
                tracing::warn!(
                    code = error.code(),
                    class = class.as_label(),
                    error = %error,
                    "transient backend failure; session kept"
                );
            }
            FailureClass::Validation | FailureClass::Conflict => {
                tracing::info!(
                    code = error.code(),
                    class = class.as_label(),
                    error = %error,
                    "non-fatal backend rejection"
                );
            }
        }

        class
    }

    /// Ends the session after an authentication failure. Overlapping calls
    /// collapse into one cleanup.
    pub async fn handle_expiration(&self) {
        self.teardown(Teardown::Expiration).await;
    }

    pub async fn logout(&self) {
        self.teardown(Teardown::Logout).await;
    }

    async fn teardown(&self, reason: Teardown) {
        if self.handling.replace(true) {
            tracing::debug!(?reason, "session teardown already in progress");
            return;
        }
        let _reset = HandlingReset(&self.handling);

        let had_session = self.session.borrow_mut().take().is_some();
        // Dropped last: the timer task may be the caller.
        let refresh_timer = self.refresh_timer.borrow_mut().take();

        let connection = self.connection.borrow().clone();
        if let Some(connection) = connection {
            connection.disconnect();
        }

        self.clear_persisted_tokens().await;

        match reason {
            Teardown::Expiration if had_session => {
                tracing::warn!(code = SESSION_EXPIRED, "session expired");
                self.publish(SessionEvent::Expired);
            }
            Teardown::Expiration => {
                tracing::debug!("expiration observed without an active session");
            }
            Teardown::Logout => {
                tracing::info!("session logged out");
                self.publish(SessionEvent::LoggedOut);
            }
        }

        drop(refresh_timer);
    }

    async fn persist_tokens(&self, tokens: &AuthTokens) -> Result<(), StoreError> {
        let mut result = self.store.set(ACCESS_TOKEN_KEY, &tokens.access_token).await;
        if result.is_ok() {
            if let Some(refresh_token) = &tokens.refresh_token {
                result = self.store.set(REFRESH_TOKEN_KEY, refresh_token).await;
            }
        }

        if let Err(error) = &result {
            tracing::error!(
                code = SESSION_PERSIST_FAILED,
                error = %error,
                "failed to persist session tokens"
            );
        }

        result
    }

    async fn clear_persisted_tokens(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(error) = self.store.remove(key).await {
                tracing::error!(
                    code = SESSION_CLEAR_FAILED,
                    key,
                    error = %error,
                    "failed to remove persisted credential"
                );
            }
        }
    }

    fn arm_refresh_timer(&self) {
        let Some(period) = self.settings.refresh_interval else {
            return;
        };

        let me = self.me.clone();
        let timer = TimerGuard::periodic("session-refresh", period, move || {
            let me = me.clone();
            async move {
                if let Some(session) = me.upgrade() {
                    session.refresh_access_token().await;
                }
            }
        });
        *self.refresh_timer.borrow_mut() = Some(timer);
    }

    fn publish(&self, event: SessionEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl AuthRejectionSink for SessionManager {
    fn auth_rejected(&self, source: &'static str) {
        tracing::warn!(source, "credential rejection reported");

        let me = self.me.clone();
        tokio::task::spawn_local(async move {
            if let Some(session) = me.upgrade() {
                session.handle_expiration().await;
            }
        });
    }
}
