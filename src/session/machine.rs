//! The per-tab connection state machine.
//!
//! Every decision a session makes (which backend to probe, when to fail
//! over, what to queue, what to publish) is a pure transition here:
//! `(phase, event) -> (phase, actions)`. The surrounding actor (see the
//! parent module) owns sockets and timers and merely interprets the returned
//! [`Action`]s, which keeps the whole decision surface unit-testable without
//! a single real socket.
//!
//! # Phases
//!
//! ```text
//! Idle ──send──► Initializing ──probe ok──► OnApp ◄──────────┐
//!                     │   │                   │              │
//!                     │   └──app down, fb ok─►│       recheck sees app
//!                     │                       ▼              │
//!                     │                   OnFallback ────────┘
//!                     └──both down──► Retrying ──backoff──► Initializing
//!
//! any phase ──teardown──► Closed
//! ```
//!
//! Initialization is single-flight by construction: it is a *phase*, not a
//! flag, and the actor feeds events from one channel, so concurrent send
//! triggers merge into the in-flight cycle instead of racing a boolean.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backend::BackendKind;
use crate::identifiers::TabId;
use crate::protocol::{RpcId, RpcRequest, RpcResponse};
use crate::state::ConnectionState;

// ============================================================================
// Events
// ============================================================================

/// Why a probe was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePurpose {
    /// Part of an initialization / failover cycle.
    Init,
    /// Periodic App-recovery check while running on Fallback.
    Recheck,
    /// UI-triggered `check-connection`.
    Check,
}

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The page issued a JSON-RPC request.
    PageSend(RpcRequest),
    /// An adapter finished its handshake.
    AdapterOpened(BackendKind),
    /// An adapter went down without an intentional close.
    AdapterDown(BackendKind),
    /// An adapter delivered a parsed inbound frame.
    InboundFrame(BackendKind, Value),
    /// A probe resolved.
    ProbeDone {
        /// The probed backend.
        target: BackendKind,
        /// Why the probe ran.
        purpose: ProbePurpose,
        /// Whether the endpoint answered in time.
        reachable: bool,
    },
    /// The initialization backoff elapsed.
    RetryElapsed,
    /// Settings or endpoints changed; drop connections and start fresh.
    SettingsChanged,
    /// UI asked for an immediate probe + state update.
    CheckConnection,
    /// The tab went away.
    Teardown,
}

// ============================================================================
// Actions
// ============================================================================

/// Side effects the actor must perform after a transition.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Run a reachability probe and post the result back.
    Probe {
        /// Backend to probe.
        target: BackendKind,
        /// Purpose to echo back in the result event.
        purpose: ProbePurpose,
    },
    /// Create and open an adapter, replaying `replay` into it first.
    OpenAdapter {
        /// Backend to open.
        backend: BackendKind,
        /// Queued wire messages to flush, in original order.
        replay: Vec<String>,
    },
    /// Close the adapter intentionally; unsent messages go back to the
    /// session queue.
    CloseAdapter {
        /// Backend whose adapter to close.
        backend: BackendKind,
    },
    /// Close `from` and open `to`, carrying unsent messages across in
    /// original order.
    SwitchAdapter {
        /// Backend being abandoned.
        from: BackendKind,
        /// Backend taking over.
        to: BackendKind,
    },
    /// Forward one wire message to the active adapter.
    Forward {
        /// The active backend.
        backend: BackendKind,
        /// Serialized request.
        wire: String,
    },
    /// Emit a frame to the page channel.
    DeliverToPage {
        /// The backend frame, verbatim.
        frame: Value,
    },
    /// Publish aggregate connection state.
    PublishState {
        /// New state.
        state: ConnectionState,
        /// Active backend tag, when connected.
        source: Option<BackendKind>,
    },
    /// Start the periodic App-recovery probe.
    StartAppRecheck,
    /// Stop the periodic App-recovery probe.
    StopAppRecheck,
    /// Arm the single initialization retry after the backoff.
    ScheduleRetry,
    /// Remove this session from the registry; the actor exits after this.
    Deregister,
}

// ============================================================================
// Phase
// ============================================================================

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No backend, no traffic yet.
    Idle,
    /// Probe/connect cycle in flight (the single-flight guard).
    Initializing {
        /// Which backend the outstanding probe targets.
        probing: BackendKind,
        /// Whether Fallback may be tried if the App probe fails. False when
        /// this cycle was entered from a Fallback death (no downgrade
        /// target below Fallback).
        try_fallback: bool,
    },
    /// Routing traffic through the App.
    OnApp,
    /// Routing traffic through the fallback node, hunting for App recovery.
    OnFallback,
    /// Both backends down; a single retry is scheduled.
    Retrying,
    /// Torn down; all events are ignored.
    Closed,
}

// ============================================================================
// Machine
// ============================================================================

/// Pure state for one tab's session.
pub struct Machine {
    tab_id: TabId,
    phase: Phase,
    /// Wire messages accepted before any backend became active.
    queue: VecDeque<String>,
    /// In-flight request bookkeeping, for logging only.
    pending: FxHashMap<RpcId, RpcRequest>,
}

impl Machine {
    /// Creates an idle machine for `tab_id`.
    #[must_use]
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            phase: Phase::Idle,
            queue: VecDeque::new(),
            pending: FxHashMap::default(),
        }
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of in-flight requests being tracked.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of messages waiting for a backend.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Puts unsent adapter leftovers back at the front of the queue,
    /// preserving their original order.
    pub fn requeue_front(&mut self, leftovers: Vec<String>) {
        for wire in leftovers.into_iter().rev() {
            self.queue.push_front(wire);
        }
    }

    /// Applies one event and returns the side effects to perform.
    pub fn step(&mut self, event: SessionEvent) -> Vec<Action> {
        if self.phase == Phase::Closed {
            trace!(tab = %self.tab_id, ?event, "event after teardown ignored");
            return Vec::new();
        }

        // check-connection probe results resolve the same way regardless of
        // phase: they only feed the published verdict.
        if let SessionEvent::ProbeDone {
            target,
            purpose: ProbePurpose::Check,
            reachable,
        } = &event
        {
            return self.on_check_probe(*target, *reachable);
        }

        match self.phase {
            Phase::Idle => self.step_idle(event),
            Phase::Initializing {
                probing,
                try_fallback,
            } => self.step_initializing(event, probing, try_fallback),
            Phase::OnApp => self.step_active(event, BackendKind::App),
            Phase::OnFallback => self.step_active(event, BackendKind::Fallback),
            Phase::Retrying => self.step_retrying(event),
            Phase::Closed => unreachable!("handled above"),
        }
    }
}

// ============================================================================
// Machine - Per-Phase Transitions
// ============================================================================

impl Machine {
    fn step_idle(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::PageSend(request) => {
                self.accept(request);
                self.phase = Phase::Initializing {
                    probing: BackendKind::App,
                    try_fallback: true,
                };
                debug!(tab = %self.tab_id, "first send, initializing");
                vec![Action::Probe {
                    target: BackendKind::App,
                    purpose: ProbePurpose::Init,
                }]
            }
            SessionEvent::SettingsChanged => {
                vec![Action::PublishState {
                    state: ConnectionState::Unknown,
                    source: None,
                }]
            }
            SessionEvent::CheckConnection => vec![Action::Probe {
                target: BackendKind::App,
                purpose: ProbePurpose::Check,
            }],
            SessionEvent::Teardown => self.teardown(None, false),
            // Stale probe results, timer ticks, and socket events from an
            // abandoned cycle land here; nothing to do.
            _ => Vec::new(),
        }
    }

    fn step_initializing(
        &mut self,
        event: SessionEvent,
        probing: BackendKind,
        try_fallback: bool,
    ) -> Vec<Action> {
        match event {
            // Single-flight: queue, never start a second cycle.
            SessionEvent::PageSend(request) => {
                self.accept(request);
                Vec::new()
            }
            SessionEvent::ProbeDone {
                target,
                purpose: ProbePurpose::Init,
                reachable,
            } if target == probing => self.on_init_probe(target, try_fallback, reachable),
            SessionEvent::SettingsChanged => {
                self.phase = Phase::Idle;
                vec![Action::PublishState {
                    state: ConnectionState::Unknown,
                    source: None,
                }]
            }
            SessionEvent::Teardown => self.teardown(None, false),
            _ => Vec::new(),
        }
    }

    fn on_init_probe(
        &mut self,
        target: BackendKind,
        try_fallback: bool,
        reachable: bool,
    ) -> Vec<Action> {
        match (target, reachable) {
            (BackendKind::App, true) => {
                self.phase = Phase::OnApp;
                debug!(tab = %self.tab_id, "app reachable, connecting");
                vec![Action::OpenAdapter {
                    backend: BackendKind::App,
                    replay: self.drain_queue(),
                }]
            }
            (BackendKind::App, false) if try_fallback => {
                self.phase = Phase::Initializing {
                    probing: BackendKind::Fallback,
                    try_fallback: true,
                };
                debug!(tab = %self.tab_id, "app unreachable, probing fallback");
                vec![Action::Probe {
                    target: BackendKind::Fallback,
                    purpose: ProbePurpose::Init,
                }]
            }
            (BackendKind::Fallback, true) => {
                self.phase = Phase::OnFallback;
                debug!(tab = %self.tab_id, "fallback reachable, connecting");
                vec![
                    Action::OpenAdapter {
                        backend: BackendKind::Fallback,
                        replay: self.drain_queue(),
                    },
                    Action::StartAppRecheck,
                ]
            }
            // App-only cycle failed, or Fallback failed too: everything is
            // down. One retry, no busy loop.
            (BackendKind::App, false) | (BackendKind::Fallback, false) => {
                self.phase = Phase::Retrying;
                debug!(tab = %self.tab_id, "no backend reachable, backing off");
                vec![
                    Action::PublishState {
                        state: ConnectionState::Disconnected,
                        source: None,
                    },
                    Action::ScheduleRetry,
                ]
            }
        }
    }

    /// Shared handling for `OnApp` / `OnFallback`.
    fn step_active(&mut self, event: SessionEvent, active: BackendKind) -> Vec<Action> {
        match event {
            SessionEvent::PageSend(request) => match self.accept(request) {
                Some(wire) => vec![Action::Forward {
                    backend: active,
                    wire,
                }],
                None => Vec::new(),
            },
            SessionEvent::AdapterOpened(backend) if backend == active => {
                vec![Action::PublishState {
                    state: ConnectionState::Connected,
                    source: Some(active),
                }]
            }
            SessionEvent::AdapterDown(backend) if backend == active => self.on_active_down(active),
            SessionEvent::InboundFrame(backend, frame) if backend == active => {
                self.settle(&frame);
                vec![Action::DeliverToPage { frame }]
            }
            SessionEvent::ProbeDone {
                target: BackendKind::App,
                purpose: ProbePurpose::Recheck,
                reachable,
            } if active == BackendKind::Fallback => {
                if reachable {
                    self.phase = Phase::OnApp;
                    debug!(tab = %self.tab_id, "app recovered, switching back");
                    vec![
                        Action::StopAppRecheck,
                        Action::SwitchAdapter {
                            from: BackendKind::Fallback,
                            to: BackendKind::App,
                        },
                    ]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::SettingsChanged => {
                self.phase = Phase::Idle;
                debug!(tab = %self.tab_id, "settings changed, dropping backend");
                let mut actions = vec![Action::CloseAdapter { backend: active }];
                if active == BackendKind::Fallback {
                    actions.push(Action::StopAppRecheck);
                }
                actions.push(Action::PublishState {
                    state: ConnectionState::Unknown,
                    source: None,
                });
                actions
            }
            SessionEvent::CheckConnection => {
                // A healthy session answers from what it knows; it never
                // probes the other backend while its own is up.
                vec![Action::PublishState {
                    state: ConnectionState::Connected,
                    source: Some(active),
                }]
            }
            SessionEvent::Teardown => {
                self.teardown(Some(active), active == BackendKind::Fallback)
            }
            // Events for the non-active backend are stale by definition.
            _ => Vec::new(),
        }
    }

    fn on_active_down(&mut self, active: BackendKind) -> Vec<Action> {
        match active {
            BackendKind::App => {
                // Try the downgrade path.
                self.phase = Phase::Initializing {
                    probing: BackendKind::Fallback,
                    try_fallback: true,
                };
                debug!(tab = %self.tab_id, "app connection lost, probing fallback");
                vec![
                    Action::CloseAdapter {
                        backend: BackendKind::App,
                    },
                    Action::Probe {
                        target: BackendKind::Fallback,
                        purpose: ProbePurpose::Init,
                    },
                ]
            }
            BackendKind::Fallback => {
                // No downgrade below Fallback: go straight for the App and
                // fail to the backoff path if it is down too.
                self.phase = Phase::Initializing {
                    probing: BackendKind::App,
                    try_fallback: false,
                };
                debug!(tab = %self.tab_id, "fallback connection lost, probing app");
                vec![
                    Action::CloseAdapter {
                        backend: BackendKind::Fallback,
                    },
                    Action::StopAppRecheck,
                    Action::Probe {
                        target: BackendKind::App,
                        purpose: ProbePurpose::Init,
                    },
                ]
            }
        }
    }

    fn step_retrying(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::PageSend(request) => {
                self.accept(request);
                Vec::new()
            }
            SessionEvent::RetryElapsed => {
                self.phase = Phase::Initializing {
                    probing: BackendKind::App,
                    try_fallback: true,
                };
                debug!(tab = %self.tab_id, "retrying initialization");
                vec![Action::Probe {
                    target: BackendKind::App,
                    purpose: ProbePurpose::Init,
                }]
            }
            SessionEvent::SettingsChanged => {
                // The armed retry will fire into Idle and be ignored.
                self.phase = Phase::Idle;
                vec![Action::PublishState {
                    state: ConnectionState::Unknown,
                    source: None,
                }]
            }
            SessionEvent::CheckConnection => vec![Action::Probe {
                target: BackendKind::App,
                purpose: ProbePurpose::Check,
            }],
            SessionEvent::Teardown => self.teardown(None, false),
            _ => Vec::new(),
        }
    }

    fn on_check_probe(&mut self, target: BackendKind, reachable: bool) -> Vec<Action> {
        match (target, reachable) {
            (target, true) => vec![Action::PublishState {
                state: ConnectionState::Connected,
                source: Some(target),
            }],
            (BackendKind::App, false) => vec![Action::Probe {
                target: BackendKind::Fallback,
                purpose: ProbePurpose::Check,
            }],
            (BackendKind::Fallback, false) => vec![Action::PublishState {
                state: ConnectionState::Disconnected,
                source: None,
            }],
        }
    }
}

// ============================================================================
// Machine - Bookkeeping
// ============================================================================

impl Machine {
    /// Records a request in the pending table and returns its wire form.
    ///
    /// Duplicate in-flight ids keep their original table entry (each id is
    /// claimed exactly once); the request is still forwarded.
    fn accept(&mut self, request: RpcRequest) -> Option<String> {
        let wire = match serde_json::to_string(&request) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(tab = %self.tab_id, error = %e, "unserializable request dropped");
                return None;
            }
        };

        if self.pending.contains_key(&request.id) {
            warn!(tab = %self.tab_id, id = %request.id, "duplicate in-flight request id");
        } else {
            trace!(tab = %self.tab_id, id = %request.id, method = %request.method, "request in flight");
            self.pending.insert(request.id.clone(), request);
        }

        // While no backend is active the wire form goes to the queue instead
        // of the caller.
        if matches!(self.phase, Phase::OnApp | Phase::OnFallback) {
            Some(wire)
        } else {
            self.queue.push_back(wire);
            None
        }
    }

    /// Clears pending bookkeeping for a response frame.
    fn settle(&mut self, frame: &Value) {
        if let Some(id) = RpcResponse::id_of(frame)
            && let Some(request) = self.pending.remove(&id)
        {
            trace!(tab = %self.tab_id, id = %id, method = %request.method, "response received");
        }
    }

    fn drain_queue(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    fn teardown(&mut self, active: Option<BackendKind>, recheck_running: bool) -> Vec<Action> {
        self.phase = Phase::Closed;
        self.queue.clear();
        self.pending.clear();
        debug!(tab = %self.tab_id, "session torn down");

        let mut actions = Vec::new();
        if let Some(backend) = active {
            actions.push(Action::CloseAdapter { backend });
        }
        if recheck_running {
            actions.push(Action::StopAppRecheck);
        }
        actions.push(Action::Deregister);
        actions
    }
}

// ============================================================================
// Tests
// ============================================================================
