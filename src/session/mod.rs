//! Per-tab connection sessions.
//!
//! A session is the broker between one page and whichever backend is
//! currently alive. It owns at most one socket adapter at a time, probes
//! before connecting, fails over when the active backend dies, and reports
//! the aggregate verdict to the [`ConnectionStateHub`].
//!
//! # Architecture
//!
//! ```text
//!  page ──RpcRequest──► SessionHandle ─┐
//!  UI  ──settings/check──────────────► │ events
//!                                      ▼
//!                              ┌──────────────┐   actions   ┌──────────────┐
//!                              │   Machine    │────────────►│  actor loop  │
//!                              │ (pure steps) │             │ sockets/timers│
//!                              └──────────────┘             └──────┬───────┘
//!                                      ▲        socket events      │
//!                                      └───────────────────────────┘
//! ```
//!
//! All session state lives in the actor task; adapters, probes, and timers
//! talk to it through channels only, so there is no lock around the state
//! machine and no preemption inside a transition.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `machine` | Pure state machine: phases, events, actions |
//! | `registry` | Process-wide tab → session map |

// ============================================================================
// Submodules
// ============================================================================

/// Pure state machine.
pub mod machine;

/// Process-wide session registry.
pub mod registry;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backend::{BackendKind, PageMeta};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::RpcRequest;
use crate::state::ConnectionStateHub;
use crate::transport::socket::{BackendSocket, SocketEvent, SocketEventKind};
use crate::transport::probe_endpoint;

use machine::{Action, Machine, ProbePurpose, SessionEvent};
use registry::SessionRegistry;

// ============================================================================
// SessionHandle
// ============================================================================

/// Cheap handle to a running session.
///
/// Cloned into the registry and the page plumbing. All methods enqueue an
/// event for the actor; they fail only once the session is torn down.
#[derive(Clone)]
pub struct SessionHandle {
    tab_id: TabId,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// The tab this session belongs to.
    #[inline]
    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Accepts a JSON-RPC request from the page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is torn down.
    pub fn send(&self, request: RpcRequest) -> Result<()> {
        self.emit(SessionEvent::PageSend(request))
    }

    /// Notifies the session that settings or endpoints changed.
    ///
    /// The active adapter closes intentionally; the next send re-probes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is torn down.
    pub fn settings_changed(&self) -> Result<()> {
        self.emit(SessionEvent::SettingsChanged)
    }

    /// Forces an immediate probe + state update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is torn down.
    pub fn check_connection(&self) -> Result<()> {
        self.emit(SessionEvent::CheckConnection)
    }

    /// Tears the session down: closes adapters, cancels timers, removes the
    /// session from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is already gone.
    pub fn close(&self) -> Result<()> {
        self.emit(SessionEvent::Teardown)
    }

    fn emit(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::session_closed(self.tab_id))
    }
}

// ============================================================================
// TabSession
// ============================================================================

/// Factory for per-tab session actors.
pub struct TabSession;

impl TabSession {
    /// Spawns a session for `tab_id` and registers it.
    ///
    /// Responses and other backend frames for the page are delivered on
    /// `page_tx` in backend emission order. The session removes itself from
    /// `registry` on teardown.
    pub fn spawn(
        tab_id: TabId,
        meta: PageMeta,
        config: Arc<RwLock<BridgeConfig>>,
        hub: Arc<ConnectionStateHub>,
        registry: Arc<SessionRegistry>,
        page_tx: mpsc::UnboundedSender<Value>,
    ) -> SessionHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();

        let handle = SessionHandle {
            tab_id,
            events: event_tx.clone(),
        };
        registry.register(tab_id, handle.clone());

        let actor = SessionActor {
            tab_id,
            meta,
            config,
            hub,
            registry,
            page_tx,
            event_tx,
            socket_tx,
            machine: Machine::new(tab_id),
            active: None,
            recheck: None,
        };

        tokio::spawn(actor.run(event_rx, socket_rx));

        handle
    }
}

// ============================================================================
// SessionActor
// ============================================================================

/// The session event loop: owns the machine, the active adapter, and the
/// timer tasks.
struct SessionActor {
    tab_id: TabId,
    meta: PageMeta,
    config: Arc<RwLock<BridgeConfig>>,
    hub: Arc<ConnectionStateHub>,
    registry: Arc<SessionRegistry>,
    page_tx: mpsc::UnboundedSender<Value>,
    /// Cloned into probe and timer tasks so results come back as events.
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    machine: Machine,
    /// The single active adapter. The invariant that no message can reach
    /// two backends holds because there is never more than one of these.
    active: Option<BackendSocket>,
    /// Periodic App-recovery prober, only while on Fallback.
    recheck: Option<JoinHandle<()>>,
    /// Event channel handed to adapters.
    socket_tx: mpsc::UnboundedSender<SocketEvent>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut socket_rx: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        debug!(tab = %self.tab_id, "session started");

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                socket_event = socket_rx.recv() => match socket_event {
                    Some(SocketEvent { backend, kind }) => match kind {
                        SocketEventKind::Opened => SessionEvent::AdapterOpened(backend),
                        SocketEventKind::Down => SessionEvent::AdapterDown(backend),
                        SocketEventKind::Frame(value) => {
                            SessionEvent::InboundFrame(backend, value)
                        }
                    },
                    None => break,
                },
            };

            let actions = self.machine.step(event);
            if self.perform(actions) == Flow::Exit {
                break;
            }
        }

        self.shutdown();
    }

    /// Executes the side effects of one transition.
    fn perform(&mut self, actions: Vec<Action>) -> Flow {
        for action in actions {
            match action {
                Action::Probe { target, purpose } => self.spawn_probe(target, purpose),
                Action::OpenAdapter { backend, replay } => self.open_adapter(backend, replay),
                Action::CloseAdapter { backend } => self.close_adapter(backend),
                Action::SwitchAdapter { from, to } => {
                    let leftovers = self.take_adapter(from);
                    self.open_adapter(to, leftovers);
                }
                Action::Forward { backend, wire } => self.forward(backend, wire),
                Action::DeliverToPage { frame } => {
                    // A page that went away mid-flight is not an error.
                    if self.page_tx.send(frame).is_err() {
                        trace!(tab = %self.tab_id, "page channel gone, frame dropped");
                    }
                }
                Action::PublishState { state, source } => self.hub.set_state(state, source),
                Action::StartAppRecheck => self.start_recheck(),
                Action::StopAppRecheck => self.stop_recheck(),
                Action::ScheduleRetry => self.schedule_retry(),
                Action::Deregister => {
                    self.registry.remove(self.tab_id);
                    return Flow::Exit;
                }
            }
        }
        Flow::Continue
    }

    // ------------------------------------------------------------------
    // Adapters
    // ------------------------------------------------------------------

    fn open_adapter(&mut self, backend: BackendKind, replay: Vec<String>) {
        let endpoint = self.endpoint(backend);
        let socket = BackendSocket::new(backend, endpoint, self.socket_tx.clone());
        socket.open();
        for wire in replay {
            socket.send(wire);
        }
        self.active = Some(socket);
    }

    fn close_adapter(&mut self, backend: BackendKind) {
        let leftovers = self.take_adapter(backend);
        // Anything the dead adapter never sent goes back to the session
        // queue so the next backend replays it in original order.
        self.machine.requeue_front(leftovers);
    }

    /// Closes and removes the adapter, returning its unsent messages.
    fn take_adapter(&mut self, backend: BackendKind) -> Vec<String> {
        match self.active.take() {
            Some(socket) if socket.backend() == backend => socket.close(),
            Some(socket) => {
                // Defensive: put an unexpected adapter back untouched.
                warn!(
                    tab = %self.tab_id,
                    expected = %backend,
                    actual = %socket.backend(),
                    "close for non-active backend"
                );
                self.active = Some(socket);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn forward(&mut self, backend: BackendKind, wire: String) {
        match &self.active {
            Some(socket) if socket.backend() == backend => socket.send(wire),
            _ => {
                // The adapter vanished between transition and execution;
                // keep the message for the next cycle.
                warn!(tab = %self.tab_id, backend = %backend, "no active adapter, requeueing");
                self.machine.requeue_front(vec![wire]);
            }
        }
    }

    // ------------------------------------------------------------------
    // Probes and timers
    // ------------------------------------------------------------------

    fn spawn_probe(&self, target: BackendKind, purpose: ProbePurpose) {
        let endpoint = self.endpoint(target);
        let timeout = self.config.read().policy.probe_timeout;
        let events = self.event_tx.clone();

        tokio::spawn(async move {
            let reachable = probe_endpoint(&endpoint, timeout).await;
            let _ = events.send(SessionEvent::ProbeDone {
                target,
                purpose,
                reachable,
            });
        });
    }

    fn start_recheck(&mut self) {
        self.stop_recheck();

        let config = Arc::clone(&self.config);
        let meta = self.meta.clone();
        let events = self.event_tx.clone();

        self.recheck = Some(tokio::spawn(async move {
            loop {
                let (interval, timeout, endpoint) = {
                    let config = config.read();
                    (
                        config.policy.app_recheck_interval,
                        config.policy.probe_timeout,
                        BackendKind::App.endpoint(&config, &meta),
                    )
                };
                tokio::time::sleep(interval).await;

                let reachable = probe_endpoint(&endpoint, timeout).await;
                if events
                    .send(SessionEvent::ProbeDone {
                        target: BackendKind::App,
                        purpose: ProbePurpose::Recheck,
                        reachable,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn stop_recheck(&mut self) {
        if let Some(task) = self.recheck.take() {
            task.abort();
        }
    }

    fn schedule_retry(&self) {
        let backoff = self.config.read().policy.retry_backoff;
        let events = self.event_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            // Ignored if the session moved on or closed meanwhile.
            let _ = events.send(SessionEvent::RetryElapsed);
        });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn endpoint(&self, backend: BackendKind) -> String {
        backend.endpoint(&self.config.read(), &self.meta)
    }

    fn shutdown(&mut self) {
        self.stop_recheck();
        if let Some(socket) = self.active.take() {
            socket.close();
        }
        debug!(tab = %self.tab_id, "session stopped");
    }
}

/// Whether the actor keeps running after a batch of actions.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    use crate::config::RetryPolicy;
    use crate::state::{ConnectionState, StatusIndicator};

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    /// Backend stub answering every JSON-RPC request with `result: tag`.
    ///
    /// `close_after` drops a connection (no close handshake) after that many
    /// responses, simulating an abrupt backend death.
    async fn spawn_backend_on(
        listener: TcpListener,
        tag: &'static str,
        close_after: Option<usize>,
    ) -> u16 {
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let mut served = 0usize;
                    while let Some(Ok(frame)) = ws.next().await {
                        if let Message::Text(text) = frame {
                            let Ok(request) = serde_json::from_str::<Value>(&text) else {
                                continue;
                            };
                            let reply =
                                serde_json::json!({"id": request["id"], "result": tag});
                            if ws
                                .send(Message::Text(reply.to_string().into()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                            served += 1;
                            if Some(served) == close_after {
                                // Abrupt drop, no close frame.
                                return;
                            }
                        }
                    }
                });
            }
        });

        port
    }

    async fn spawn_backend(tag: &'static str, close_after: Option<usize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        spawn_backend_on(listener, tag, close_after).await
    }

    /// Reserves a local port nothing listens on.
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    fn fast_config(app_port: u16, fallback_port: u16) -> Arc<RwLock<BridgeConfig>> {
        let mut config = BridgeConfig::new()
            .with_app_port(app_port)
            .with_fallback_port(fallback_port)
            .with_policy(RetryPolicy {
                probe_timeout: Duration::from_secs(1),
                retry_backoff: Duration::from_millis(200),
                // Long enough that no test switches back by accident.
                app_recheck_interval: Duration::from_secs(60),
            });
        config.host = "127.0.0.1".to_string();
        Arc::new(RwLock::new(config))
    }

    struct Harness {
        handle: SessionHandle,
        page_rx: mpsc::UnboundedReceiver<Value>,
        hub: Arc<ConnectionStateHub>,
        registry: Arc<SessionRegistry>,
    }

    fn spawn_session(config: Arc<RwLock<BridgeConfig>>, hub: Arc<ConnectionStateHub>) -> Harness {
        // RUST_LOG=wallet_bridge=trace makes scenario failures readable.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let registry = Arc::new(SessionRegistry::new());
        let (page_tx, page_rx) = mpsc::unbounded_channel();

        let handle = TabSession::spawn(
            TabId::new(1).expect("valid tab id"),
            PageMeta::empty(),
            config,
            Arc::clone(&hub),
            Arc::clone(&registry),
            page_tx,
        );

        Harness {
            handle,
            page_rx,
            hub,
            registry,
        }
    }

    fn request(id: u64) -> RpcRequest {
        RpcRequest::new(id, "eth_chainId", None)
    }

    async fn recv_frame(page_rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        timeout(Duration::from_secs(10), page_rx.recv())
            .await
            .expect("frame before timeout")
            .expect("page channel open")
    }

    async fn wait_for_state(
        hub: &ConnectionStateHub,
        state: ConnectionState,
        source: Option<BackendKind>,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if hub.get_state() == (state, source) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "state never became {state:?}/{source:?}, got {:?}",
                hub.get_state()
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[derive(Default)]
    struct CountingIndicator {
        notifications: AtomicUsize,
    }

    impl StatusIndicator for Arc<CountingIndicator> {
        fn set_alert(&self, _visible: bool) {}
        fn notify_offline(&self) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_app_preferred_when_both_reachable() {
        let app = spawn_backend("app", None).await;
        let fallback = spawn_backend("fallback", None).await;
        let mut h = spawn_session(fast_config(app, fallback), Arc::new(ConnectionStateHub::new()));

        h.handle.send(request(1)).expect("send");

        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["result"], "app");

        wait_for_state(&h.hub, ConnectionState::Connected, Some(BackendKind::App)).await;
    }

    #[tokio::test]
    async fn test_sends_before_backend_arrive_in_order() {
        let app = spawn_backend("app", None).await;
        let fallback = dead_port().await;
        let mut h = spawn_session(fast_config(app, fallback), Arc::new(ConnectionStateHub::new()));

        // All three go out before the probe resolves; they must reach the
        // backend (and come back) in enqueue order.
        h.handle.send(request(1)).expect("send");
        h.handle.send(request(2)).expect("send");
        h.handle.send(request(3)).expect("send");

        for expected in 1..=3u64 {
            let frame = recv_frame(&mut h.page_rx).await;
            assert_eq!(frame["id"], expected);
        }
    }

    #[tokio::test]
    async fn test_failover_to_fallback_when_app_dies() {
        // The app serves exactly one response per connection, then drops.
        let app = spawn_backend("app", Some(1)).await;
        let fallback = spawn_backend("fallback", None).await;
        let mut h = spawn_session(fast_config(app, fallback), Arc::new(ConnectionStateHub::new()));

        h.handle.send(request(1)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["result"], "app");

        // The abrupt drop triggers failover; traffic continues on fallback.
        wait_for_state(&h.hub, ConnectionState::Connected, Some(BackendKind::Fallback)).await;

        h.handle.send(request(2)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["id"], 2);
        assert_eq!(frame["result"], "fallback");

        // check-connection agrees with the session's own verdict.
        let mut states = h.hub.subscribe();
        h.handle.check_connection().expect("check");
        let payload = timeout(Duration::from_secs(5), states.recv())
            .await
            .expect("broadcast before timeout")
            .expect("subscribed");
        assert_eq!(payload.state, ConnectionState::Connected);
        assert_eq!(payload.source, Some(BackendKind::Fallback));
    }

    #[tokio::test]
    async fn test_outage_queues_then_delivers_exactly_once() {
        let app = dead_port().await;
        let fallback = dead_port().await;

        let config = fast_config(app, fallback);
        config.write().policy.probe_timeout = Duration::from_millis(500);
        let mut h = spawn_session(Arc::clone(&config), Arc::new(ConnectionStateHub::new()));

        h.handle.send(request(1)).expect("send");

        // Both probes fail: disconnected, request stays queued, nothing
        // reaches the page.
        wait_for_state(&h.hub, ConnectionState::Disconnected, None).await;
        assert!(h.page_rx.try_recv().is_err());

        // The app comes up on its known port within the backoff window.
        let listener = TcpListener::bind(("127.0.0.1", app)).await.expect("rebind");
        spawn_backend_on(listener, "app", None).await;

        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["result"], "app");

        // Exactly once: no duplicate delivery afterwards.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.page_rx.try_recv().is_err());

        wait_for_state(&h.hub, ConnectionState::Connected, Some(BackendKind::App)).await;
    }

    #[tokio::test]
    async fn test_settings_change_is_silent_and_reprobes() {
        let first_app = spawn_backend("first", None).await;
        let second_app = spawn_backend("second", None).await;
        let fallback = dead_port().await;

        let indicator = Arc::new(CountingIndicator::default());
        let hub = Arc::new(ConnectionStateHub::with_indicator(Box::new(Arc::clone(
            &indicator,
        ))));

        let config = fast_config(first_app, fallback);
        let mut h = spawn_session(Arc::clone(&config), hub);

        h.handle.send(request(1)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["result"], "first");

        // Endpoint change: the adapter closes intentionally and the global
        // verdict resets so probes run fresh.
        config.write().app_port_override = Some(second_app);
        h.handle.settings_changed().expect("settings");
        wait_for_state(&h.hub, ConnectionState::Unknown, None).await;

        // The next send re-probes and lands on the new endpoint.
        h.handle.send(request(2)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["result"], "second");

        // No disconnect notification anywhere in the cycle.
        assert_eq!(indicator.notifications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_deregisters_and_rejects_commands() {
        let config = fast_config(dead_port().await, dead_port().await);
        let h = spawn_session(config, Arc::new(ConnectionStateHub::new()));

        assert_eq!(h.registry.len(), 1);
        h.handle.close().expect("close");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !h.registry.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "never deregistered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The actor is gone; commands are rejected once the event channel
        // closes.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.handle.send(request(1)).is_ok() {
            assert!(tokio::time::Instant::now() < deadline, "commands never rejected");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_fallback_session_recovers_to_app_via_recheck() {
        // App starts dead; fallback is healthy; recheck runs fast.
        let app = dead_port().await;
        let fallback = spawn_backend("fallback", None).await;

        let config = fast_config(app, fallback);
        config.write().policy.app_recheck_interval = Duration::from_millis(200);
        config.write().policy.probe_timeout = Duration::from_millis(500);
        let mut h = spawn_session(Arc::clone(&config), Arc::new(ConnectionStateHub::new()));

        h.handle.send(request(1)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["result"], "fallback");
        wait_for_state(&h.hub, ConnectionState::Connected, Some(BackendKind::Fallback)).await;

        // The app comes back; the periodic recheck should find it and
        // switch the session over.
        let listener = TcpListener::bind(("127.0.0.1", app)).await.expect("rebind");
        spawn_backend_on(listener, "app", None).await;

        wait_for_state(&h.hub, ConnectionState::Connected, Some(BackendKind::App)).await;

        h.handle.send(request(2)).expect("send");
        let frame = recv_frame(&mut h.page_rx).await;
        assert_eq!(frame["result"], "app");
    }
}

