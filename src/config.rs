//! Bridge configuration.
//!
//! Provides a type-safe interface for configuring the bridge: which App
//! control port to use (developer mode switches it), where the fallback node
//! lives, and the retry policy timings.
//!
//! # Example
//!
//! ```ignore
//! use wallet_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::new()
//!     .with_dev_mode();
//!
//! assert_eq!(config.app_port(), 9102);
//! ```
//!
//! The policy intervals are reasonable defaults, not tuned semantics; nothing
//! in the session logic depends on their exact values.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// App control port in normal mode.
const APP_PORT: u16 = 9002;

/// App control port in developer mode.
const APP_DEV_PORT: u16 = 9102;

/// Fallback node JSON-RPC port.
const FALLBACK_PORT: u16 = 8545;

/// Host both backends are reached on.
const LOCAL_HOST: &str = "localhost";

// ============================================================================
// RetryPolicy
// ============================================================================

/// Timing policy for probes, retries, and recovery checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum time a reachability probe may take before counting as
    /// unreachable.
    pub probe_timeout: Duration,

    /// Delay before retrying the whole initialization after both backends
    /// were found unreachable.
    pub retry_backoff: Duration,

    /// Interval at which a fallback session checks whether the App has come
    /// back.
    pub app_recheck_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(1),
            app_recheck_interval: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Bridge configuration.
///
/// Controls which endpoints sessions connect to and the retry timings.
/// A settings change (e.g. toggling developer mode) is delivered to live
/// sessions through the registry; they drop their sockets intentionally and
/// re-resolve endpoints from the new configuration on the next send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Developer mode switches the App control port.
    pub dev_mode: bool,

    /// Host for both backends. Overridable for tests.
    pub host: String,

    /// App control port override (takes precedence over the mode-derived
    /// port when set).
    pub app_port_override: Option<u16>,

    /// Fallback node port override.
    pub fallback_port_override: Option<u16>,

    /// Probe/retry/recheck timings.
    pub policy: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            dev_mode: false,
            host: LOCAL_HOST.to_string(),
            app_port_override: None,
            fallback_port_override: None,
            policy: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Enables developer mode (App port becomes 9102).
    #[inline]
    #[must_use]
    pub fn with_dev_mode(mut self) -> Self {
        self.dev_mode = true;
        self
    }

    /// Overrides the App control port.
    #[inline]
    #[must_use]
    pub fn with_app_port(mut self, port: u16) -> Self {
        self.app_port_override = Some(port);
        self
    }

    /// Overrides the fallback node port.
    #[inline]
    #[must_use]
    pub fn with_fallback_port(mut self, port: u16) -> Self {
        self.fallback_port_override = Some(port);
        self
    }

    /// Overrides the retry policy.
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ============================================================================
// Endpoint Resolution
// ============================================================================

impl BridgeConfig {
    /// Returns the effective App control port.
    #[inline]
    #[must_use]
    pub fn app_port(&self) -> u16 {
        self.app_port_override
            .unwrap_or(if self.dev_mode { APP_DEV_PORT } else { APP_PORT })
    }

    /// Returns the effective fallback node port.
    #[inline]
    #[must_use]
    pub fn fallback_port(&self) -> u16 {
        self.fallback_port_override.unwrap_or(FALLBACK_PORT)
    }

    /// Returns the bare App endpoint URL (no page metadata).
    ///
    /// Format: `ws://{host}:{port}`
    #[inline]
    #[must_use]
    pub fn app_endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.app_port())
    }

    /// Returns the fallback node endpoint URL.
    #[inline]
    #[must_use]
    pub fn fallback_endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.fallback_port())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = BridgeConfig::new();
        assert_eq!(config.app_port(), 9002);
        assert_eq!(config.fallback_port(), 8545);
    }

    #[test]
    fn test_dev_mode_switches_app_port() {
        let config = BridgeConfig::new().with_dev_mode();
        assert_eq!(config.app_port(), 9102);
        // Fallback port is mode-independent.
        assert_eq!(config.fallback_port(), 8545);
    }

    #[test]
    fn test_port_overrides_win() {
        let config = BridgeConfig::new()
            .with_dev_mode()
            .with_app_port(19002)
            .with_fallback_port(18545);
        assert_eq!(config.app_port(), 19002);
        assert_eq!(config.fallback_port(), 18545);
    }

    #[test]
    fn test_endpoint_format() {
        let config = BridgeConfig::new();
        assert_eq!(config.app_endpoint(), "ws://localhost:9002");
        assert_eq!(config.fallback_endpoint(), "ws://localhost:8545");
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.probe_timeout, Duration::from_secs(2));
        assert_eq!(policy.retry_backoff, Duration::from_secs(1));
        assert_eq!(policy.app_recheck_interval, Duration::from_secs(5));
    }
}
