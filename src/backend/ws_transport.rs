use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    infra::config::{BackendConfig, RealtimeConfig},
    usecases::contracts::{RealtimeLink, RealtimeTransport, TransportError, TransportSignal},
};

const REALTIME_FRAME_REJECTED: &str = "REALTIME_FRAME_REJECTED";
const REALTIME_RECONNECT_FAILED: &str = "REALTIME_RECONNECT_FAILED";

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsSettings {
    pub url: String,
    pub reconnect_attempts: u32,
    /// Delay before attempt `n` is `n * reconnect_backoff`, capped at five
    /// minutes.
    pub reconnect_backoff: Duration,
}

impl WsSettings {
    pub fn from_config(backend: &BackendConfig, realtime: &RealtimeConfig) -> Self {
        Self {
            url: backend.realtime_url.clone(),
            reconnect_attempts: realtime.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(realtime.reconnect_backoff_ms),
        }
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_backoff
            .checked_mul(attempt)
            .map_or(MAX_RECONNECT_DELAY, |delay| delay.min(MAX_RECONNECT_DELAY))
    }
}

/// WebSocket transport carrying `{"event": .., "data": ..}` frames.
#[derive(Debug, Clone)]
pub struct WsTransport {
    settings: WsSettings,
}

impl WsTransport {
    pub fn new(settings: WsSettings) -> Self {
        Self { settings }
    }
}

#[async_trait(?Send)]
impl RealtimeTransport for WsTransport {
    async fn open(&self, access_token: &str) -> Result<RealtimeLink, TransportError> {
        let stream = handshake(&self.settings.url, access_token).await?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        tokio::task::spawn_local(run_stream(
            self.settings.clone(),
            access_token.to_owned(),
            stream,
            signal_tx,
            close_rx,
        ));

        Ok(RealtimeLink::new(signal_rx, close_tx))
    }
}

async fn handshake(url: &str, access_token: &str) -> Result<WsStream, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|error| TransportError::Unavailable(error.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
        .map_err(|_| TransportError::Unavailable("access token is not a valid header".into()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => Ok(stream),
        Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 401 => {
            Err(TransportError::Unauthorized)
        }
        Err(error) => Err(TransportError::Unavailable(error.to_string())),
    }
}

enum SessionEnd {
    /// The link was dropped or its receiver went away.
    Closed,
    Lost(String),
}

async fn run_stream(
    settings: WsSettings,
    access_token: String,
    mut stream: WsStream,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        let reason = match pump(stream, &signal_tx, &mut close_rx).await {
            SessionEnd::Closed => return,
            SessionEnd::Lost(reason) => reason,
        };

        if signal_tx.send(TransportSignal::Dropped { reason }).is_err() {
            return;
        }

        match reconnect(&settings, &access_token, &mut close_rx).await {
            Some(restored) => {
                stream = restored;
                if signal_tx.send(TransportSignal::Reconnected).is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}

async fn pump(
    stream: WsStream,
    signal_tx: &mpsc::UnboundedSender<TransportSignal>,
    close_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = &mut *close_rx => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Closed;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                    Ok(signal) => {
                        if signal_tx.send(signal).is_err() {
                            return SessionEnd::Closed;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            code = REALTIME_FRAME_REJECTED,
                            error = %error,
                            "ignoring undecodable realtime frame"
                        );
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| format!("closed by server ({})", frame.code))
                        .unwrap_or_else(|| "closed by server".to_owned());
                    return SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return SessionEnd::Lost(error.to_string()),
                None => return SessionEnd::Lost("stream ended".to_owned()),
            }
        }
    }
}

async fn reconnect(
    settings: &WsSettings,
    access_token: &str,
    close_rx: &mut oneshot::Receiver<()>,
) -> Option<WsStream> {
    for attempt in 1..=settings.reconnect_attempts {
        let delay = settings.reconnect_delay(attempt);
        tokio::select! {
            _ = &mut *close_rx => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match handshake(&settings.url, access_token).await {
            Ok(stream) => {
                tracing::info!(attempt, "realtime stream restored");
                return Some(stream);
            }
            Err(TransportError::Unauthorized) => {
                tracing::warn!(
                    code = REALTIME_RECONNECT_FAILED,
                    "realtime reconnect rejected the access token"
                );
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    code = REALTIME_RECONNECT_FAILED,
                    attempt,
                    max_attempts = settings.reconnect_attempts,
                    error = %error,
                    "realtime reconnect attempt failed"
                );
            }
        }
    }

    None
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn parse_frame(text: &str) -> Result<TransportSignal, serde_json::Error> {
    let frame: Frame = serde_json::from_str(text)?;
    Ok(TransportSignal::Event {
        name: frame.event,
        payload: frame.data,
    })
}
