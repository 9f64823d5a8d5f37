//! Bounded-timeout reachability probing.
//!
//! A probe answers one question, "is this endpoint accepting WebSocket
//! connections right now?", without establishing a persistent session.
//! The throwaway socket is always closed before the probe resolves, and the
//! result is a plain boolean: timeouts and errors both mean unreachable,
//! never an error to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, trace};

// ============================================================================
// Probing
// ============================================================================

/// Probes `url` for reachability within `probe_timeout`.
///
/// Resolves `true` if a WebSocket handshake completes in time, `false` on
/// connect error or timeout. Never leaves a dangling handle.
pub async fn probe_endpoint(url: &str, probe_timeout: Duration) -> bool {
    match timeout(probe_timeout, connect_async(url)).await {
        Ok(Ok((mut stream, _))) => {
            let _ = stream.close(None).await;
            trace!(url, "probe: reachable");
            true
        }
        Ok(Err(e)) => {
            debug!(url, error = %e, "probe: unreachable");
            false
        }
        Err(_) => {
            debug!(url, timeout_ms = probe_timeout.as_millis() as u64, "probe: timed out");
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
