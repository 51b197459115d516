//! Seams between the consistency core and its external collaborators.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{
    conversation::ConversationSummary,
    notification::NavigationFocus,
    session::{AuthTokens, CurrentUser},
};

/// How a caller must react to a failure. The mapping from concrete errors is
/// fixed here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network trouble. The session is left alone; the caller may retry.
    Transient,
    /// The backend explicitly rejected the credentials. The session ends.
    AuthExpired,
    /// A payload that does not match the contract. Dropped and logged.
    Validation,
    /// Informational, non-fatal rejection (duplicate, already gone).
    Conflict,
}

impl FailureClass {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Transient => "FAILURE_TRANSIENT",
            Self::AuthExpired => "FAILURE_AUTH_EXPIRED",
            Self::Validation => "FAILURE_VALIDATION",
            Self::Conflict => "FAILURE_CONFLICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("backend answered with status {status}")]
    Server { status: u16 },
    #[error("request was not authorized")]
    Unauthorized,
    #[error("access token expired")]
    TokenExpired,
    #[error("token was rejected as invalid")]
    InvalidToken,
    #[error("resource not found")]
    NotFound,
    #[error("conflicting request: {0}")]
    Conflict(String),
    #[error("request rejected with status {status}")]
    Rejected { status: u16 },
    #[error("response payload violates the contract: {0}")]
    InvalidPayload(String),
}

impl ApiError {
    /// Only an explicit credential rejection counts as `AuthExpired`; anything
    /// that could be a connectivity problem stays `Transient`.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Network(_) | Self::Timeout | Self::Server { .. } => FailureClass::Transient,
            Self::Unauthorized | Self::TokenExpired | Self::InvalidToken => {
                FailureClass::AuthExpired
            }
            Self::InvalidPayload(_) => FailureClass::Validation,
            Self::NotFound | Self::Conflict(_) | Self::Rejected { .. } => FailureClass::Conflict,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "API_NETWORK",
            Self::Timeout => "API_TIMEOUT",
            Self::Server { .. } => "API_SERVER",
            Self::Unauthorized => "API_UNAUTHORIZED",
            Self::TokenExpired => "API_TOKEN_EXPIRED",
            Self::InvalidToken => "API_INVALID_TOKEN",
            Self::NotFound => "API_NOT_FOUND",
            Self::Conflict(_) => "API_CONFLICT",
            Self::Rejected { .. } => "API_REJECTED",
            Self::InvalidPayload(_) => "API_INVALID_PAYLOAD",
        }
    }
}

/// Minimal HTTP contract the core needs from the backend.
#[async_trait(?Send)]
pub trait ChatApi {
    async fn login(&self, username: &str, password: &str) -> Result<AuthTokens, ApiError>;
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<AuthTokens, ApiError>;
    async fn get_current_user(&self, access_token: &str) -> Result<CurrentUser, ApiError>;
    async fn list_chats(&self, access_token: &str) -> Result<Vec<ConversationSummary>, ApiError>;
    async fn delete_chat(&self, access_token: &str, chat_id: &str) -> Result<(), ApiError>;
    async fn register_push_token(&self, access_token: &str, push_token: &str)
        -> Result<(), ApiError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode store contents: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable string-keyed storage.
#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Event { name: String, payload: Value },
    /// The stream broke; the transport is trying to restore it.
    Dropped { reason: String },
    /// The transport restored the stream on its own.
    Reconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("realtime handshake rejected the access token")]
    Unauthorized,
    #[error("realtime transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Unauthorized => FailureClass::AuthExpired,
            Self::Unavailable(_) => FailureClass::Transient,
        }
    }
}

/// An open realtime stream. Dropping the link deregisters from the transport
/// and closes the underlying connection.
#[derive(Debug)]
pub struct RealtimeLink {
    signals: mpsc::UnboundedReceiver<TransportSignal>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl RealtimeLink {
    pub fn new(
        signals: mpsc::UnboundedReceiver<TransportSignal>,
        close_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            signals,
            close_tx: Some(close_tx),
        }
    }

    /// `None` once the transport has given up on the stream.
    pub async fn next_signal(&mut self) -> Option<TransportSignal> {
        self.signals.recv().await
    }
}

impl Drop for RealtimeLink {
    fn drop(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

#[async_trait(?Send)]
pub trait RealtimeTransport {
    async fn open(&self, access_token: &str) -> Result<RealtimeLink, TransportError>;
}

/// Read-only view of the navigation stack.
pub trait FocusProvider {
    fn focus(&self) -> NavigationFocus;
}

/// What the session lifecycle needs from the realtime connection.
pub trait ConnectionControl {
    /// Re-binds the connection to a refreshed access token in the background.
    fn rebind(&self, access_token: &str);
    /// Tears the connection down synchronously.
    fn disconnect(&self);
}

/// Receives credential rejections observed outside a request/response pair,
/// such as a realtime handshake answered with 401.
pub trait AuthRejectionSink {
    fn auth_rejected(&self, source: &'static str);
}
