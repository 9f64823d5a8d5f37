//! Process-wide connection state.
//!
//! Sessions are the only writers; UI observers subscribe for broadcasts and
//! read the current verdict on demand. There is no ambient global: the hub
//! is an explicit shared container handed to sessions by reference.
//!
//! # Side Effects
//!
//! Every [`ConnectionStateHub::set_state`] call:
//!
//! 1. Broadcasts a `connection-state` payload to all subscribers (delivery
//!    failures are swallowed; an observer with no listener is normal).
//! 2. Updates the visible indicator: disconnected shows the alert marker,
//!    connected clears it.
//! 3. On the *first* transition into disconnected since the last connected,
//!    raises a one-shot offline notification. The one-shot flag resets only
//!    when the state becomes connected again, so flapping and repeated probe
//!    failures cannot spam the user.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::backend::BackendKind;

// ============================================================================
// Constants
// ============================================================================

/// Broadcast channel capacity. Observers that fall this far behind lose old
/// updates, which is fine for a latest-wins state signal.
const BROADCAST_CAPACITY: usize = 16;

// ============================================================================
// ConnectionState
// ============================================================================

/// Aggregate connectivity verdict shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A backend is reachable and active.
    Connected,
    /// Neither backend is reachable.
    Disconnected,
    /// No verdict yet (startup, or settings changed and probes must re-run).
    Unknown,
}

// ============================================================================
// StateBroadcast
// ============================================================================

/// Payload sent to all observers on every state change.
///
/// # Format
///
/// ```json
/// {"type": "connection-state", "state": "connected", "source": "app"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBroadcast {
    /// Message discriminator, always `"connection-state"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The new aggregate state.
    pub state: ConnectionState,

    /// Which backend the verdict refers to, when connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<BackendKind>,
}

impl StateBroadcast {
    /// Creates a broadcast payload.
    #[must_use]
    pub fn new(state: ConnectionState, source: Option<BackendKind>) -> Self {
        Self {
            kind: "connection-state".to_string(),
            state,
            source,
        }
    }
}

// ============================================================================
// StatusIndicator
// ============================================================================

/// Hook for user-visible indicators (badge marker, system notification).
///
/// The default hub uses a no-op implementation; embedders install their own.
pub trait StatusIndicator: Send + Sync {
    /// Shows or clears the alert marker.
    fn set_alert(&self, visible: bool);

    /// Raises the one-shot offline notification.
    fn notify_offline(&self);
}

/// Indicator that does nothing (headless embedders, tests).
#[derive(Debug, Default)]
pub struct NoopIndicator;

impl StatusIndicator for NoopIndicator {
    fn set_alert(&self, _visible: bool) {}
    fn notify_offline(&self) {}
}

// ============================================================================
// ConnectionStateHub
// ============================================================================

/// Shared container for the aggregate connection state.
///
/// Mutated only by sessions; read (and subscribed to) by everything else.
pub struct ConnectionStateHub {
    /// Current verdict and one-shot bookkeeping.
    inner: Mutex<HubInner>,

    /// Fan-out to observers.
    tx: broadcast::Sender<StateBroadcast>,

    /// User-visible indicator hook.
    indicator: Box<dyn StatusIndicator>,
}

struct HubInner {
    state: ConnectionState,
    source: Option<BackendKind>,
    /// Set once the offline notification fired; cleared on connected.
    offline_notified: bool,
}

impl Default for ConnectionStateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateHub {
    /// Creates a hub with a no-op indicator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_indicator(Box::new(NoopIndicator))
    }

    /// Creates a hub with a custom indicator hook.
    #[must_use]
    pub fn with_indicator(indicator: Box<dyn StatusIndicator>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(HubInner {
                state: ConnectionState::Unknown,
                source: None,
                offline_notified: false,
            }),
            tx,
            indicator,
        }
    }

    /// Subscribes to state broadcasts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateBroadcast> {
        self.tx.subscribe()
    }

    /// Returns the current state and active backend tag.
    #[must_use]
    pub fn get_state(&self) -> (ConnectionState, Option<BackendKind>) {
        let inner = self.inner.lock();
        (inner.state, inner.source)
    }

    /// Publishes a new state.
    ///
    /// See the module docs for the side-effect contract.
    pub fn set_state(&self, state: ConnectionState, source: Option<BackendKind>) {
        let notify = {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.source = source;

            match state {
                ConnectionState::Disconnected => {
                    let first = !inner.offline_notified;
                    inner.offline_notified = true;
                    first
                }
                ConnectionState::Connected => {
                    inner.offline_notified = false;
                    false
                }
                ConnectionState::Unknown => false,
            }
        };

        debug!(?state, source = ?source.map(BackendKind::source_tag), "connection state");

        match state {
            ConnectionState::Disconnected => self.indicator.set_alert(true),
            ConnectionState::Connected => self.indicator.set_alert(false),
            ConnectionState::Unknown => {}
        }

        if notify {
            self.indicator.notify_offline();
        }

        // No subscribers is not an error.
        if self.tx.send(StateBroadcast::new(state, source)).is_err() {
            trace!("no connection-state subscribers");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingIndicator {
        alerts_shown: AtomicUsize,
        alerts_cleared: AtomicUsize,
        notifications: AtomicUsize,
    }

    impl StatusIndicator for Arc<RecordingIndicator> {
        fn set_alert(&self, visible: bool) {
            if visible {
                self.alerts_shown.fetch_add(1, Ordering::SeqCst);
            } else {
                self.alerts_cleared.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn notify_offline(&self) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recording_hub() -> (ConnectionStateHub, Arc<RecordingIndicator>) {
        let indicator = Arc::new(RecordingIndicator::default());
        let hub = ConnectionStateHub::with_indicator(Box::new(Arc::clone(&indicator)));
        (hub, indicator)
    }

    #[test]
    fn test_initial_state_unknown() {
        let hub = ConnectionStateHub::new();
        let (state, source) = hub.get_state();
        assert_eq!(state, ConnectionState::Unknown);
        assert_eq!(source, None);
    }

    #[test]
    fn test_set_state_updates_and_tags_source() {
        let hub = ConnectionStateHub::new();
        hub.set_state(ConnectionState::Connected, Some(BackendKind::Fallback));

        let (state, source) = hub.get_state();
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(source, Some(BackendKind::Fallback));
    }

    #[test]
    fn test_offline_notification_is_one_shot() {
        let (hub, indicator) = recording_hub();

        hub.set_state(ConnectionState::Disconnected, None);
        hub.set_state(ConnectionState::Disconnected, None);
        hub.set_state(ConnectionState::Disconnected, None);

        // Repeated failures notify exactly once.
        assert_eq!(indicator.notifications.load(Ordering::SeqCst), 1);

        hub.set_state(ConnectionState::Connected, Some(BackendKind::App));
        hub.set_state(ConnectionState::Disconnected, None);

        // A full reconnect cycle re-arms the notification.
        assert_eq!(indicator.notifications.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_does_not_rearm_notification() {
        let (hub, indicator) = recording_hub();

        hub.set_state(ConnectionState::Disconnected, None);
        hub.set_state(ConnectionState::Unknown, None);
        hub.set_state(ConnectionState::Disconnected, None);

        // Only connected resets the one-shot flag.
        assert_eq!(indicator.notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_indicator_alert_tracking() {
        let (hub, indicator) = recording_hub();

        hub.set_state(ConnectionState::Disconnected, None);
        assert_eq!(indicator.alerts_shown.load(Ordering::SeqCst), 1);

        hub.set_state(ConnectionState::Connected, Some(BackendKind::App));
        assert_eq!(indicator.alerts_cleared.load(Ordering::SeqCst), 1);

        // Unknown leaves the indicator alone.
        hub.set_state(ConnectionState::Unknown, None);
        assert_eq!(indicator.alerts_shown.load(Ordering::SeqCst), 1);
        assert_eq!(indicator.alerts_cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribers_receive_broadcasts() {
        let hub = ConnectionStateHub::new();
        let mut rx = hub.subscribe();

        hub.set_state(ConnectionState::Connected, Some(BackendKind::App));

        let payload = tokio_test::block_on(rx.recv()).expect("broadcast");
        assert_eq!(payload.kind, "connection-state");
        assert_eq!(payload.state, ConnectionState::Connected);
        assert_eq!(payload.source, Some(BackendKind::App));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_swallowed() {
        let hub = ConnectionStateHub::new();
        // Must not panic or error with nobody listening.
        hub.set_state(ConnectionState::Disconnected, None);
    }

    #[test]
    fn test_broadcast_payload_wire_format() {
        let payload = StateBroadcast::new(ConnectionState::Connected, Some(BackendKind::Fallback));
        let json = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"connection-state","state":"connected","source":"fallback"}"#
        );

        let payload = StateBroadcast::new(ConnectionState::Unknown, None);
        let json = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(json, r#"{"type":"connection-state","state":"unknown"}"#);
    }
}
