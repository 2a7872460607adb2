//! `ClientConnectionManager`: async driver for one followed conversation.
//!
//! A single task owns the transport and the [`SessionState`]. Commands come
//! in over an `mpsc` channel; state snapshots go out on a `watch` channel and
//! each parsed envelope is broadcast exactly once.

use std::sync::Arc;

use chatline_core::{ClientFrame, ConversationId, ServerEnvelope};
use chatline_settings::ClientSettings;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{ClientError, Result};
use crate::policy::ReconnectPolicy;
use crate::state::{Action, ConnectionEvent, ConnectionStatus, SessionState};
use crate::transport::{Connector, Transport, TransportEvent, WsConnector, derive_ws_url};

const ENVELOPE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Command {
    Connect,
    SetConversation(ConversationId),
    Shutdown,
}

/// Keeps one live subscription to a conversation, reconnecting within a
/// bounded policy.
pub struct ClientConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    envelopes: broadcast::Sender<ServerEnvelope>,
    task: JoinHandle<()>,
}

impl ClientConnectionManager {
    /// Start a driver for the endpoint at `ws_url`. Nothing connects until
    /// [`connect`](Self::connect) or [`set_conversation`](Self::set_conversation).
    pub fn new(
        connector: Arc<dyn Connector>,
        ws_url: impl Into<String>,
        policy: ReconnectPolicy,
        conversation_id: Option<ConversationId>,
    ) -> Self {
        Self::with_client_info(connector, ws_url, policy, conversation_id, None)
    }

    /// Like [`new`](Self::new), attaching `client_info` to every subscribe frame.
    pub fn with_client_info(
        connector: Arc<dyn Connector>,
        ws_url: impl Into<String>,
        policy: ReconnectPolicy,
        conversation_id: Option<ConversationId>,
        client_info: Option<Value>,
    ) -> Self {
        let mut initial = SessionState::new(conversation_id);
        initial.client_info = client_info;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(initial.clone());
        let (envelopes, _) = broadcast::channel(ENVELOPE_CHANNEL_CAPACITY);

        let driver = Driver {
            connector,
            url: ws_url.into(),
            policy,
            state: initial,
            state_tx,
            envelopes: envelopes.clone(),
            commands: command_rx,
            transport: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(driver.run());

        Self {
            commands,
            state,
            envelopes,
            task,
        }
    }

    /// Build from settings, using the `tokio-tungstenite` connector.
    pub fn from_settings(
        settings: &ClientSettings,
        conversation_id: Option<ConversationId>,
    ) -> Result<Self> {
        let url = derive_ws_url(&settings.base_url)?;
        Ok(Self::new(
            Arc::new(WsConnector::default()),
            url,
            ReconnectPolicy::from(settings),
            conversation_id,
        ))
    }

    /// Open a fresh connection. No-op while connecting or open.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Leave the terminal `Error` state and start over with fresh counters.
    pub fn retry(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Follow `conversation_id`, resubscribing on the current connection
    /// if one is open.
    pub fn set_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.send(Command::SetConversation(conversation_id))
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Receive every envelope parsed from now on.
    pub fn subscribe_envelopes(&self) -> broadcast::Receiver<ServerEnvelope> {
        self.envelopes.subscribe()
    }

    /// Whether the driver task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}

impl Drop for ClientConnectionManager {
    fn drop(&mut self) {
        // The driver closes the transport, then exits once the channel closes.
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    envelopes: broadcast::Sender<ServerEnvelope>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport: Option<Box<dyn Transport>>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => Some(ConnectionEvent::Connect),
                    Some(Command::SetConversation(id)) => Some(ConnectionEvent::SetConversation(id)),
                    Some(Command::Shutdown) => Some(ConnectionEvent::Shutdown),
                    None => break,
                },
                event = next_transport_event(self.transport.as_deref_mut()) => {
                    self.on_transport_event(event)
                }
                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    Some(ConnectionEvent::ReconnectTimerFired)
                }
            };
            if let Some(event) = event {
                self.dispatch(event).await;
            }
        }

        self.disconnect().await;
        debug!("connection driver stopped");
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Option<ConnectionEvent> {
        match event {
            TransportEvent::Text(text) => match ServerEnvelope::parse(&text) {
                Ok(envelope) => {
                    let _ = self.envelopes.send(envelope.clone());
                    Some(ConnectionEvent::Message(envelope))
                }
                Err(e) => {
                    warn!(error = %e, len = text.len(), "dropping unparseable server frame");
                    None
                }
            },
            TransportEvent::Closed { code } => {
                self.transport = None;
                info!(?code, "connection closed");
                Some(ConnectionEvent::Closed { code })
            }
            TransportEvent::Error(e) => {
                self.transport = None;
                warn!(error = %e, "transport error");
                Some(ConnectionEvent::Failed)
            }
        }
    }

    /// Apply `event` and run actions until none produces a follow-up event.
    async fn dispatch(&mut self, event: ConnectionEvent) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let action = self.state.apply(event, &self.policy);
            self.publish_state();
            next = self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) -> Option<ConnectionEvent> {
        match action {
            Action::None => None,
            Action::Connect => {
                self.reconnect_at = None;
                self.disconnect().await;
                info!(attempt = self.state.reconnect_attempts, "connecting");
                Some(self.open_transport().await)
            }
            Action::SendSubscribe(conversation_id) => {
                let frame = ClientFrame::Subscribe {
                    conversation_id: conversation_id.clone(),
                    client_info: self.state.client_info.clone(),
                };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode subscribe frame");
                        return None;
                    }
                };
                let transport = self.transport.as_mut()?;
                match transport.send_text(text).await {
                    Ok(()) => {
                        debug!(conversation_id = %conversation_id, "subscribe sent");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to send subscribe frame");
                        self.transport = None;
                        Some(ConnectionEvent::Failed)
                    }
                }
            }
            Action::ScheduleReconnect(delay) => {
                info!(
                    attempt = self.state.reconnect_attempts,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::GiveUp => {
                warn!(
                    attempts = self.state.reconnect_attempts,
                    errors = self.state.error_count,
                    "reconnection limit reached, giving up"
                );
                self.reconnect_at = None;
                self.disconnect().await;
                None
            }
            Action::Disconnect => {
                self.reconnect_at = None;
                self.disconnect().await;
                None
            }
        }
    }

    /// Run the handshake while still serving commands. `Shutdown` or a
    /// dropped manager abandons it; a new target is recorded and subscribed
    /// to once the connection opens.
    async fn open_transport(&mut self) -> ConnectionEvent {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = async move { connector.connect(&url).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(transport) => {
                            self.transport = Some(transport);
                            ConnectionEvent::Opened
                        }
                        Err(e) => {
                            warn!(error = %e, "connect failed");
                            ConnectionEvent::Failed
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        debug!("connect abandoned");
                        return ConnectionEvent::Shutdown;
                    }
                    Some(Command::SetConversation(id)) => {
                        let action = self
                            .state
                            .apply(ConnectionEvent::SetConversation(id), &self.policy);
                        debug_assert_eq!(action, Action::None);
                        self.publish_state();
                    }
                    Some(Command::Connect) => {}
                },
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send_replace(self.state.clone());
    }
}

async fn next_transport_event(transport: Option<&mut (dyn Transport + 'static)>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Transport whose inbound side is fed by the test.
    struct ScriptedTransport {
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.outbound.send(text).map_err(|_| ClientError::Stopped)
        }

        async fn recv(&mut self) -> TransportEvent {
            self.inbound
                .recv()
                .await
                .unwrap_or(TransportEvent::Closed { code: None })
        }

        async fn close(&mut self) {}
    }

    /// Test-side handle for one scripted connection.
    struct Peer {
        inbound: mpsc::UnboundedSender<TransportEvent>,
        outbound: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn push(&self, envelope: &ServerEnvelope) {
            self.inbound
                .send(TransportEvent::Text(envelope.to_json().unwrap()))
                .unwrap();
        }

        fn close(&self, code: Option<u16>) {
            self.inbound.send(TransportEvent::Closed { code }).unwrap();
        }

        async fn next_sent(&mut self) -> ClientFrame {
            let text = tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
                .await
                .unwrap()
                .unwrap();
            ClientFrame::parse(&text).unwrap()
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        /// `true` entries accept, `false` entries refuse. Refuses when empty.
        script: Mutex<VecDeque<bool>>,
        peers: Mutex<VecDeque<Peer>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn with_script(script: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            })
        }

        fn take_peer(&self) -> Peer {
            self.peers.lock().pop_front().expect("no connection accepted")
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
            self.attempts.lock().push(Instant::now());
            if !self.script.lock().pop_front().unwrap_or(false) {
                return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed.into());
            }
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            self.peers.lock().push_back(Peer {
                inbound: in_tx,
                outbound: out_rx,
            });
            Ok(Box::new(ScriptedTransport {
                inbound: in_rx,
                outbound: out_tx,
            }))
        }
    }

    /// Holds each handshake until released, then defers to the script.
    struct GatedConnector {
        inner: Arc<ScriptedConnector>,
        started: Notify,
        release: Notify,
    }

    impl GatedConnector {
        fn new(script: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                inner: ScriptedConnector::with_script(script),
                started: Notify::new(),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
            self.started.notify_one();
            self.release.notified().await;
            self.inner.connect(url).await
        }
    }

    fn gated_manager(connector: &Arc<GatedConnector>, conversation: &str) -> ClientConnectionManager {
        ClientConnectionManager::new(
            Arc::clone(connector) as Arc<dyn Connector>,
            "ws://test/ws",
            ReconnectPolicy::default(),
            Some(conversation.into()),
        )
    }

    fn manager(connector: &Arc<ScriptedConnector>, conversation: Option<&str>) -> ClientConnectionManager {
        ClientConnectionManager::new(
            Arc::clone(connector) as Arc<dyn Connector>,
            "ws://test/ws",
            ReconnectPolicy::default(),
            conversation.map(ConversationId::from),
        )
    }

    async fn wait_for(
        manager: &ClientConnectionManager,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        let mut rx = manager.watch_state();
        let state = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("state not reached")
            .expect("driver stopped");
        state.clone()
    }

    #[tokio::test]
    async fn subscribes_on_open_and_acks() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, Some("conv-1"));
        let mut envelopes = mgr.subscribe_envelopes();
        mgr.connect().unwrap();

        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut peer = connector.take_peer();
        assert_eq!(
            peer.next_sent().await,
            ClientFrame::subscribe("conv-1".into())
        );
        assert!(!mgr.snapshot().is_subscribed);

        let ack = ServerEnvelope::Subscribed {
            conversation_id: "conv-1".into(),
        };
        peer.push(&ack);
        let state = wait_for(&mgr, |s| s.is_subscribed).await;
        assert_eq!(state.last_message, Some(ack.clone()));
        assert_eq!(envelopes.recv().await.unwrap(), ack);
    }

    #[tokio::test]
    async fn invalid_frames_are_dropped() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, Some("c"));
        let mut envelopes = mgr.subscribe_envelopes();
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let peer = connector.take_peer();

        peer.inbound
            .send(TransportEvent::Text("not json".into()))
            .unwrap();
        peer.push(&ServerEnvelope::Subscribed {
            conversation_id: "c".into(),
        });

        assert_matches!(
            envelopes.recv().await.unwrap(),
            ServerEnvelope::Subscribed { .. }
        );
        assert_eq!(mgr.status(), ConnectionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_attempts_spaced_by_delay() {
        let connector = ScriptedConnector::with_script([]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();

        let state = wait_for(&mgr, |s| s.status == ConnectionStatus::Error).await;
        assert_eq!(state.reconnect_attempts, 5);
        assert_eq!(state.error_count, 6);
        assert!(!state.is_subscribed);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 6);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(3000));
        }

        // Terminal: no further attempts without retry.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 6);
        assert_eq!(mgr.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_leaves_error_state() {
        let connector = ScriptedConnector::with_script([false, false, false, false, false, false, true]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Error).await;

        mgr.retry().unwrap();
        let state = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        assert_eq!(state.error_count, 0);
        assert_eq!(state.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_and_resubscribes() {
        let connector = ScriptedConnector::with_script([true, true]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut first = connector.take_peer();
        let _ = first.next_sent().await;
        first.push(&ServerEnvelope::Subscribed {
            conversation_id: "c".into(),
        });
        let _ = wait_for(&mgr, |s| s.is_subscribed).await;

        first.close(Some(1006));
        let state = wait_for(&mgr, |s| s.status == ConnectionStatus::Reconnecting).await;
        assert!(!state.is_subscribed);
        assert_eq!(state.reconnect_attempts, 1);

        let state = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        assert_eq!(state.reconnect_attempts, 0);
        let mut second = connector.take_peer();
        assert_eq!(second.next_sent().await, ClientFrame::subscribe("c".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_is_terminal() {
        let connector = ScriptedConnector::with_script([true, true]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let peer = connector.take_peer();

        peer.close(Some(1000));
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Closed).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn set_conversation_while_open_resubscribes() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, Some("a"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut peer = connector.take_peer();
        let _ = peer.next_sent().await;

        mgr.set_conversation("b".into()).unwrap();
        assert_eq!(peer.next_sent().await, ClientFrame::subscribe("b".into()));
        assert_eq!(connector.attempts().len(), 1);

        peer.push(&ServerEnvelope::Subscribed {
            conversation_id: "b".into(),
        });
        let state = wait_for(&mgr, |s| s.is_subscribed).await;
        assert_eq!(state.conversation_id, Some("b".into()));
    }

    #[tokio::test]
    async fn set_conversation_while_closed_connects() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, None);
        mgr.set_conversation("late".into()).unwrap();

        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut peer = connector.take_peer();
        assert_eq!(peer.next_sent().await, ClientFrame::subscribe("late".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        connector.take_peer().close(None);
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Reconnecting).await;

        mgr.shutdown().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Closed).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn client_info_is_sent_with_subscribe() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = ClientConnectionManager::with_client_info(
            Arc::clone(&connector) as Arc<dyn Connector>,
            "ws://test/ws",
            ReconnectPolicy::default(),
            Some("c".into()),
            Some(serde_json::json!({"app": "test"})),
        );
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut peer = connector.take_peer();
        assert_matches!(
            peer.next_sent().await,
            ClientFrame::Subscribe { client_info: Some(info), .. } if info["app"] == "test"
        );
    }

    #[tokio::test]
    async fn dropped_manager_stops_driver() {
        let connector = ScriptedConnector::with_script([true]);
        let mgr = manager(&connector, Some("c"));
        mgr.connect().unwrap();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut rx = mgr.watch_state();
        drop(mgr);

        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn shutdown_interrupts_pending_handshake() {
        let connector = GatedConnector::new([true]);
        let mgr = gated_manager(&connector, "conv-1");
        mgr.connect().unwrap();
        connector.started.notified().await;

        mgr.shutdown().unwrap();
        let state = wait_for(&mgr, |s| s.status == ConnectionStatus::Closed).await;
        assert!(!state.is_subscribed);

        connector.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connector.inner.attempts().is_empty());
        assert_eq!(mgr.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn set_conversation_during_handshake_subscribes_new_target() {
        let connector = GatedConnector::new([true]);
        let mgr = gated_manager(&connector, "old");
        mgr.connect().unwrap();
        connector.started.notified().await;

        mgr.set_conversation("new".into()).unwrap();
        let state = wait_for(&mgr, |s| s.conversation_id.as_deref() == Some("new")).await;
        assert_eq!(state.status, ConnectionStatus::Connecting);

        connector.release.notify_one();
        let _ = wait_for(&mgr, |s| s.status == ConnectionStatus::Open).await;
        let mut peer = connector.inner.take_peer();
        assert_eq!(peer.next_sent().await, ClientFrame::subscribe("new".into()));
    }

    #[tokio::test]
    async fn dropping_manager_abandons_pending_handshake() {
        let connector = GatedConnector::new([true]);
        let mgr = gated_manager(&connector, "conv-1");
        mgr.connect().unwrap();
        connector.started.notified().await;

        drop(mgr);
        tokio::time::sleep(Duration::from_millis(50)).await;
        connector.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connector.inner.attempts().is_empty());
        assert!(connector.inner.peers.lock().is_empty());
    }
}
