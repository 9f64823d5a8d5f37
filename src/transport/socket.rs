//! Queueing WebSocket adapter for a single backend endpoint.
//!
//! A [`BackendSocket`] owns at most one live socket at a time. Messages sent
//! before the socket is open are queued and flushed in order on open, exactly
//! once each. Closing is either *intentional* (requested by the owning
//! session; no event fires) or *unintentional* (remote drop, error,
//! malformed frame; a down event fires so the session can fail over).
//!
//! # Event Loop
//!
//! `open()` spawns a task that connects, flushes the queue, then services
//! the socket: inbound text frames are forwarded as parsed JSON, the literal
//! text frame `"ping"` is answered with `"pong"` without any JSON parse, and
//! outbound messages arrive over an internal writer channel.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::backend::BackendKind;

// ============================================================================
// Types
// ============================================================================

/// Transport event delivered to the owning session.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    /// Which backend's adapter produced the event.
    pub backend: BackendKind,
    /// What happened.
    pub kind: SocketEventKind,
}

/// Kinds of transport events.
#[derive(Debug, Clone)]
pub enum SocketEventKind {
    /// The socket finished its handshake; the queue has been flushed.
    Opened,
    /// The socket went down without an intentional close. Covers open
    /// failure, abrupt close, socket errors, and malformed inbound JSON.
    Down,
    /// A parsed inbound JSON frame.
    Frame(Value),
}

/// Connection phase of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    /// No socket, none being established.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Live socket, queue flushed.
    Open,
    /// Intentional teardown in progress.
    Closing,
}

// ============================================================================
// BackendSocket
// ============================================================================

/// Socket adapter for one backend endpoint.
///
/// Cheap to clone is not a goal here: the session owns exactly one adapter
/// per backend and drops it after an intentional close.
pub struct BackendSocket {
    /// Backend this adapter fronts.
    backend: BackendKind,
    /// Endpoint URL (App URLs carry the page metadata query).
    url: String,
    /// Event channel into the owning session.
    events: mpsc::UnboundedSender<SocketEvent>,
    /// Shared state between handle and I/O task.
    inner: Arc<Mutex<SocketInner>>,
}

struct SocketInner {
    phase: SocketPhase,
    /// FIFO outbound queue, held while not open. Unbounded but expected
    /// small: it only covers the connect handshake window.
    queue: VecDeque<String>,
    /// Suppresses the down event for closes the session itself requested.
    intentional_close: bool,
    /// Writer channel into the live I/O task, while open.
    writer: Option<mpsc::UnboundedSender<String>>,
    /// Bumped on every open; lets a superseded I/O task detect it is stale
    /// and step aside without touching shared state.
    epoch: u64,
}

impl BackendSocket {
    /// Creates an adapter for `url`, delivering events on `events`.
    ///
    /// No socket is established until [`open`](Self::open) or the first
    /// [`send`](Self::send).
    #[must_use]
    pub fn new(
        backend: BackendKind,
        url: impl Into<String>,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        Self {
            backend,
            url: url.into(),
            events,
            inner: Arc::new(Mutex::new(SocketInner {
                phase: SocketPhase::Idle,
                queue: VecDeque::new(),
                intentional_close: false,
                writer: None,
                epoch: 0,
            })),
        }
    }

    /// Returns the backend this adapter fronts.
    #[inline]
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().phase == SocketPhase::Open
    }

    /// Returns `true` if a handshake is in progress.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.inner.lock().phase == SocketPhase::Connecting
    }

    /// Starts connecting. No-op if already open or connecting.
    pub fn open(&self) {
        let epoch = {
            let mut inner = self.inner.lock();
            match inner.phase {
                SocketPhase::Open | SocketPhase::Connecting => return,
                SocketPhase::Idle | SocketPhase::Closing => {
                    inner.phase = SocketPhase::Connecting;
                    inner.intentional_close = false;
                    inner.epoch += 1;
                    inner.epoch
                }
            }
        };

        debug!(backend = %self.backend, url = %self.url, "opening backend socket");

        let backend = self.backend;
        let url = self.url.clone();
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();

        tokio::spawn(async move {
            Self::run_socket(backend, url, inner, events, epoch).await;
        });
    }

    /// Sends a message, queueing it if the socket is not yet open.
    ///
    /// Sending while idle triggers [`open`](Self::open) as a side effect.
    pub fn send(&self, message: String) {
        let mut inner = self.inner.lock();
        match inner.phase {
            SocketPhase::Open => {
                if let Some(writer) = &inner.writer
                    && writer.send(message.clone()).is_ok()
                {
                    return;
                }
                // Writer died under us; keep the message for the next open.
                inner.queue.push_back(message);
            }
            SocketPhase::Connecting | SocketPhase::Closing => {
                inner.queue.push_back(message);
            }
            SocketPhase::Idle => {
                inner.queue.push_back(message);
                drop(inner);
                self.open();
            }
        }
    }

    /// Closes the socket intentionally and returns any unsent messages.
    ///
    /// The resulting socket close does *not* produce a down event. The
    /// drained queue lets the caller requeue unsent traffic onto another
    /// adapter in original order.
    pub fn close(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let leftovers: Vec<String> = inner.queue.drain(..).collect();

        match inner.phase {
            SocketPhase::Idle | SocketPhase::Closing => {}
            SocketPhase::Connecting | SocketPhase::Open => {
                inner.phase = SocketPhase::Closing;
                inner.intentional_close = true;
                // Dropping the writer ends the I/O task.
                inner.writer = None;
            }
        }

        if !leftovers.is_empty() {
            debug!(
                backend = %self.backend,
                count = leftovers.len(),
                "drained unsent messages on close"
            );
        }

        leftovers
    }
}

// ============================================================================
// BackendSocket - I/O Task
// ============================================================================

impl BackendSocket {
    /// Connects and services the socket until it closes.
    async fn run_socket(
        backend: BackendKind,
        url: String,
        inner: Arc<Mutex<SocketInner>>,
        events: mpsc::UnboundedSender<SocketEvent>,
        epoch: u64,
    ) {
        let stream = match connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                if Self::reset(&inner, epoch) == Teardown::Unintentional {
                    warn!(backend = %backend, error = %e, "backend connect failed");
                    let _ = events.send(SocketEvent {
                        backend,
                        kind: SocketEventKind::Down,
                    });
                }
                return;
            }
        };

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();

        // Transition to open and flush the queue, unless the session closed
        // the adapter (or reopened it) while the handshake was in flight.
        let superseded = {
            let mut guard = inner.lock();
            if guard.epoch != epoch || guard.intentional_close {
                if guard.epoch == epoch {
                    guard.intentional_close = false;
                    guard.phase = SocketPhase::Idle;
                }
                true
            } else {
                guard.phase = SocketPhase::Open;
                guard.writer = Some(writer_tx.clone());
                while let Some(queued) = guard.queue.pop_front() {
                    // The receiver is local; this cannot fail yet.
                    let _ = writer_tx.send(queued);
                }
                false
            }
        };

        if superseded {
            let mut stream = stream;
            let _ = stream.close(None).await;
            return;
        }

        debug!(backend = %backend, "backend socket open");
        let _ = events.send(SocketEvent {
            backend,
            kind: SocketEventKind::Opened,
        });

        let (mut ws_write, mut ws_read) = stream.split();

        loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            // Keep-alive: literal "ping" gets a literal
                            // "pong", no JSON parse attempted.
                            if text.as_str() == "ping" {
                                trace!(backend = %backend, "ping -> pong");
                                if ws_write.send(Message::Text("pong".into())).await.is_err() {
                                    break;
                                }
                                continue;
                            }

                            match serde_json::from_str::<Value>(&text) {
                                Ok(value) => {
                                    let _ = events.send(SocketEvent {
                                        backend,
                                        kind: SocketEventKind::Frame(value),
                                    });
                                }
                                Err(e) => {
                                    // Malformed frame is a transport fault.
                                    warn!(backend = %backend, error = %e, "malformed frame");
                                    break;
                                }
                            }
                        }

                        Some(Ok(Message::Ping(payload))) => {
                            if ws_write.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(backend = %backend, "socket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(backend = %backend, error = %e, "socket error");
                            break;
                        }

                        None => {
                            debug!(backend = %backend, "socket stream ended");
                            break;
                        }

                        // Binary and Pong frames carry nothing for us.
                        _ => {}
                    }
                }

                outbound = writer_rx.recv() => {
                    match outbound {
                        Some(text) => {
                            if ws_write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            // close() dropped the writer: intentional.
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        match Self::reset(&inner, epoch) {
            Teardown::Unintentional => {
                let _ = events.send(SocketEvent {
                    backend,
                    kind: SocketEventKind::Down,
                });
            }
            Teardown::Intentional => {
                debug!(backend = %backend, "socket closed intentionally");
            }
            Teardown::Stale => {}
        }
    }

    /// Returns the adapter to idle (unless a newer open superseded this
    /// task); reports how the teardown should be interpreted.
    fn reset(inner: &Arc<Mutex<SocketInner>>, epoch: u64) -> Teardown {
        let mut guard = inner.lock();
        if guard.epoch != epoch {
            return Teardown::Stale;
        }
        guard.phase = SocketPhase::Idle;
        guard.writer = None;
        let intentional = guard.intentional_close;
        guard.intentional_close = false;
        if intentional {
            Teardown::Intentional
        } else {
            Teardown::Unintentional
        }
    }
}

/// How a finished I/O task's teardown is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Session requested the close; no event fires.
    Intentional,
    /// The backend went away; a down event fires.
    Unintentional,
    /// A newer open superseded this task; state untouched, no event.
    Stale,
}

// ============================================================================
// Tests
// ============================================================================
