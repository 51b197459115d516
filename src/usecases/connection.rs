use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    domain::events::ConnectionState,
    usecases::{
        contracts::{
            AuthRejectionSink, ConnectionControl, FailureClass, RealtimeLink, RealtimeTransport,
            TransportError, TransportSignal,
        },
        timer::TimerGuard,
    },
};

const REALTIME_CONNECT_FAILED: &str = "REALTIME_CONNECT_FAILED";
const REALTIME_STREAM_DROPPED: &str = "REALTIME_STREAM_DROPPED";

/// What the coordinator hands to the chat list.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    Event { name: String, payload: Value },
    /// The stream (re)entered `Connected`; anything missed must be re-fetched.
    Resync,
    StateChanged(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Already connected or connecting with this token.
    AlreadyBound,
    /// A teardown or a newer `connect` overtook this handshake; its stream
    /// was discarded.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub liveness_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_secs(5),
        }
    }
}

pub struct ConnectionCoordinator {
    me: Weak<Self>,
    transport: Rc<dyn RealtimeTransport>,
    settings: ConnectionSettings,
    state: Cell<ConnectionState>,
    token: RefCell<Option<String>>,
    /// Bumped on every teardown; handshakes and pumps from older epochs are stale.
    epoch: Cell<u64>,
    pump: RefCell<Option<TimerGuard>>,
    liveness: RefCell<Option<TimerGuard>>,
    sync_tx: mpsc::UnboundedSender<SyncSignal>,
    auth_sink: RefCell<Option<Weak<dyn AuthRejectionSink>>>,
}

impl ConnectionCoordinator {
    pub fn new(
        transport: Rc<dyn RealtimeTransport>,
        settings: ConnectionSettings,
    ) -> (Rc<Self>, mpsc::UnboundedReceiver<SyncSignal>) {
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let coordinator = Rc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            settings,
            state: Cell::new(ConnectionState::Disconnected),
            token: RefCell::new(None),
            epoch: Cell::new(0),
            pump: RefCell::new(None),
            liveness: RefCell::new(None),
            sync_tx,
            auth_sink: RefCell::new(None),
        });
        (coordinator, sync_rx)
    }

    pub fn set_auth_sink(&self, sink: Weak<dyn AuthRejectionSink>) {
        *self.auth_sink.borrow_mut() = Some(sink);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn bound_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Opens the stream for `access_token`. A no-op when already connected
    /// (or connecting) with the same token; a different token replaces the
    /// current stream.
    pub async fn connect(&self, access_token: &str) -> Result<ConnectOutcome, TransportError> {
        let same_token = self.token.borrow().as_deref() == Some(access_token);
        if same_token && self.state.get() != ConnectionState::Disconnected {
            tracing::debug!("realtime already bound to this token");
            return Ok(ConnectOutcome::AlreadyBound);
        }

        if self.state.get() != ConnectionState::Disconnected {
            tracing::info!("access token changed; replacing realtime stream");
        }
        self.close_stream();

        *self.token.borrow_mut() = Some(access_token.to_owned());
        self.arm_liveness();

        let epoch = self.epoch.get();
        self.set_state(ConnectionState::Connecting);

        let opened = self.transport.open(access_token).await;

        if self.epoch.get() != epoch {
            tracing::debug!("realtime handshake finished after teardown; discarding");
            return Ok(ConnectOutcome::Superseded);
        }

        match opened {
            Ok(link) => {
                self.set_state(ConnectionState::Connected);
                self.emit(SyncSignal::Resync);
                self.spawn_pump(epoch, link);
                Ok(ConnectOutcome::Connected)
            }
            Err(error) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    code = REALTIME_CONNECT_FAILED,
                    error = %error,
                    class = error.classify().as_label(),
                    "realtime connect failed"
                );

                if error.classify() == FailureClass::AuthExpired {
                    *self.token.borrow_mut() = None;
                    self.report_auth_rejection();
                }
                Err(error)
            }
        }
    }

    /// Tears the stream and the liveness check down; state becomes `Disconnected`.
    pub fn disconnect(&self) {
        let liveness = self.liveness.borrow_mut().take();
        drop(liveness);
        *self.token.borrow_mut() = None;
        self.close_stream();
    }

    async fn check_liveness(&self) {
        if self.state.get() != ConnectionState::Disconnected {
            return;
        }

        let Some(token) = self.bound_token() else {
            return;
        };

        tracing::info!("realtime stream down; retrying connect");
        let _ = self.connect(&token).await;
    }

    fn close_stream(&self) {
        self.epoch.set(self.epoch.get() + 1);
        let pump = self.pump.borrow_mut().take();
        drop(pump);
        self.set_state(ConnectionState::Disconnected);
    }

    fn arm_liveness(&self) {
        if self.liveness.borrow().is_some() {
            return;
        }

        let me = self.me.clone();
        let guard = TimerGuard::periodic(
            "realtime-liveness",
            self.settings.liveness_interval,
            move || {
                let me = me.clone();
                async move {
                    if let Some(coordinator) = me.upgrade() {
                        coordinator.check_liveness().await;
                    }
                }
            },
        );
        *self.liveness.borrow_mut() = Some(guard);
    }

    fn spawn_pump(&self, epoch: u64, mut link: RealtimeLink) {
        let me = self.me.clone();
        let pump = TimerGuard::spawn("realtime-pump", async move {
            while let Some(signal) = link.next_signal().await {
                let Some(coordinator) = me.upgrade() else {
                    return;
                };
                if coordinator.epoch.get() != epoch {
                    return;
                }
                coordinator.on_transport_signal(signal);
            }

            if let Some(coordinator) = me.upgrade() {
                if coordinator.epoch.get() == epoch {
                    tracing::warn!(
                        code = REALTIME_STREAM_DROPPED,
                        "realtime transport gave up on the stream"
                    );
                    coordinator.set_state(ConnectionState::Disconnected);
                }
            }
        });
        *self.pump.borrow_mut() = Some(pump);
    }

    fn on_transport_signal(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Event { name, payload } => {
                if self.state.get() == ConnectionState::Connected {
                    self.emit(SyncSignal::Event { name, payload });
                } else {
                    tracing::debug!(event = %name, "dropping event received while not connected");
                }
            }
            TransportSignal::Dropped { reason } => {
                tracing::warn!(code = REALTIME_STREAM_DROPPED, reason = %reason, "realtime stream dropped");
                self.set_state(ConnectionState::Disconnected);
            }
            TransportSignal::Reconnected => {
                if self.state.get() != ConnectionState::Connected {
                    self.set_state(ConnectionState::Connected);
                    self.emit(SyncSignal::Resync);
                }
            }
        }
    }

    fn report_auth_rejection(&self) {
        let sink = self.auth_sink.borrow().as_ref().and_then(Weak::upgrade);
        match sink {
            Some(sink) => sink.auth_rejected("realtime"),
            None => tracing::warn!("realtime credentials rejected with no session to notify"),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.replace(next);
        if previous == next {
            return;
        }

        tracing::info!(
            from = previous.as_label(),
            to = next.as_label(),
            "realtime connection state changed"
        );
        self.emit(SyncSignal::StateChanged(next));
    }

    fn emit(&self, signal: SyncSignal) {
        let _ = self.sync_tx.send(signal);
    }
}

impl ConnectionControl for ConnectionCoordinator {
    fn rebind(&self, access_token: &str) {
        if self.bound_token().is_none() {
            return;
        }

        let me = self.me.clone();
        let access_token = access_token.to_owned();
        tokio::task::spawn_local(async move {
            if let Some(coordinator) = me.upgrade() {
                let _ = coordinator.connect(&access_token).await;
            }
        });
    }

    fn disconnect(&self) {
        ConnectionCoordinator::disconnect(self);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;
    use crate::test_support::FakeTransport;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncSignal>) -> Vec<SyncSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    fn resyncs(signals: &[SyncSignal]) -> usize {
        signals
            .iter()
            .filter(|signal| matches!(signal, SyncSignal::Resync))
            .count()
    }

    fn events(signals: &[SyncSignal]) -> usize {
        signals
            .iter()
            .filter(|signal| matches!(signal, SyncSignal::Event { .. }))
            .count()
    }

    fn coordinator(
        transport: &Rc<FakeTransport>,
    ) -> (Rc<ConnectionCoordinator>, mpsc::UnboundedReceiver<SyncSignal>) {
        ConnectionCoordinator::new(transport.clone(), ConnectionSettings::default())
    }

    #[derive(Default)]
    struct RecordingSink {
        sources: RefCell<Vec<&'static str>>,
    }

    impl AuthRejectionSink for RecordingSink {
        fn auth_rejected(&self, source: &'static str) {
            self.sources.borrow_mut().push(source);
        }
    }

    #[tokio::test]
    async fn connecting_twice_with_the_same_token_opens_one_stream() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);

                assert_eq!(
                    coordinator.connect("a").await,
                    Ok(ConnectOutcome::Connected)
                );
                assert_eq!(
                    coordinator.connect("a").await,
                    Ok(ConnectOutcome::AlreadyBound)
                );

                assert_eq!(transport.open_count(), 1);
                assert_eq!(coordinator.state(), ConnectionState::Connected);
                assert_eq!(
                    drain(&mut rx),
                    vec![
                        SyncSignal::StateChanged(ConnectionState::Connecting),
                        SyncSignal::StateChanged(ConnectionState::Connected),
                        SyncSignal::Resync,
                    ]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn a_new_token_replaces_the_stream() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, _rx) = coordinator(&transport);

                coordinator.connect("a").await.expect("connect");
                coordinator.connect("b").await.expect("reconnect");
                settle().await;

                assert_eq!(transport.opened_tokens(), vec!["a", "b"]);
                assert_eq!(transport.closed_links(), 1);
                assert_eq!(coordinator.bound_token().as_deref(), Some("b"));
            })
            .await;
    }

    #[tokio::test]
    async fn events_are_forwarded_only_while_connected() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);
                coordinator.connect("a").await.expect("connect");
                drain(&mut rx);

                transport.emit(TransportSignal::Event {
                    name: "chat_deleted".to_owned(),
                    payload: json!({"chatId": "c1"}),
                });
                settle().await;

                assert_eq!(
                    drain(&mut rx),
                    vec![SyncSignal::Event {
                        name: "chat_deleted".to_owned(),
                        payload: json!({"chatId": "c1"}),
                    }]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn transport_reconnect_triggers_one_resync_and_no_replay() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);
                coordinator.connect("a").await.expect("connect");
                settle().await;
                drain(&mut rx);

                transport.emit(TransportSignal::Dropped {
                    reason: "ping timeout".to_owned(),
                });
                transport.emit(TransportSignal::Event {
                    name: "new_message".to_owned(),
                    payload: json!({}),
                });
                transport.emit(TransportSignal::Reconnected);
                transport.emit(TransportSignal::Reconnected);
                settle().await;

                let signals = drain(&mut rx);
                assert_eq!(resyncs(&signals), 1);
                assert_eq!(events(&signals), 0);
                assert_eq!(coordinator.state(), ConnectionState::Connected);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_check_retries_a_failed_connect() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);
                transport.fail_next_open(TransportError::Unavailable("refused".to_owned()));

                assert!(coordinator.connect("a").await.is_err());
                assert_eq!(coordinator.state(), ConnectionState::Disconnected);
                drain(&mut rx);

                tokio::time::sleep(Duration::from_millis(5_100)).await;

                assert_eq!(transport.open_count(), 2);
                assert_eq!(coordinator.state(), ConnectionState::Connected);
                assert_eq!(resyncs(&drain(&mut rx)), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn ended_stream_is_restored_by_liveness_with_resync() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);
                coordinator.connect("a").await.expect("connect");
                drain(&mut rx);

                transport.end_latest_stream();
                settle().await;
                assert_eq!(coordinator.state(), ConnectionState::Disconnected);

                tokio::time::sleep(Duration::from_millis(5_100)).await;

                assert_eq!(transport.opened_tokens(), vec!["a", "a"]);
                assert_eq!(resyncs(&drain(&mut rx)), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_liveness_retries() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, _rx) = coordinator(&transport);
                coordinator.connect("a").await.expect("connect");

                coordinator.disconnect();
                tokio::time::sleep(Duration::from_secs(30)).await;

                assert_eq!(transport.open_count(), 1);
                assert_eq!(coordinator.state(), ConnectionState::Disconnected);
                assert_eq!(transport.closed_links(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn disconnect_during_handshake_discards_the_late_stream() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, mut rx) = coordinator(&transport);

                let pending = {
                    let coordinator = Rc::clone(&coordinator);
                    tokio::task::spawn_local(async move { coordinator.connect("a").await })
                };
                tokio::task::yield_now().await;
                assert_eq!(coordinator.state(), ConnectionState::Connecting);

                coordinator.disconnect();
                let outcome = pending
                    .await
                    .expect("join")
                    .expect("stale connect is not an error");
                settle().await;

                assert_eq!(outcome, ConnectOutcome::Superseded);

                assert_eq!(coordinator.state(), ConnectionState::Disconnected);
                assert_eq!(transport.closed_links(), 1);
                assert_eq!(resyncs(&drain(&mut rx)), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn rejected_handshake_is_reported_and_unbinds_the_token() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, _rx) = coordinator(&transport);
                let recorder = Rc::new(RecordingSink::default());
                let sink: Rc<dyn AuthRejectionSink> = recorder.clone();
                coordinator.set_auth_sink(Rc::downgrade(&sink));
                transport.fail_next_open(TransportError::Unauthorized);

                let result = coordinator.connect("a").await;

                assert_eq!(result, Err(TransportError::Unauthorized));
                assert_eq!(recorder.sources.borrow().as_slice(), ["realtime"]);
                assert_eq!(coordinator.bound_token(), None);
            })
            .await;
    }

    #[tokio::test]
    async fn rebind_only_applies_to_a_bound_connection() {
        LocalSet::new()
            .run_until(async {
                let transport = FakeTransport::new();
                let (coordinator, _rx) = coordinator(&transport);

                coordinator.rebind("ignored");
                settle().await;
                assert_eq!(transport.open_count(), 0);

                coordinator.connect("a").await.expect("connect");
                coordinator.rebind("b");
                settle().await;

                assert_eq!(transport.opened_tokens(), vec!["a", "b"]);
                assert_eq!(coordinator.state(), ConnectionState::Connected);
            })
            .await;
    }
}
