//! WebSocket transport layer.
//!
//! This module handles communication between the bridge and its two local
//! backends (desktop App control port, fallback node).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session        │                              │  Backend        │
//! │                 │         WebSocket            │  (App or        │
//! │  BackendSocket  │◄────────────────────────────►│   fallback      │
//! │  per backend    │      localhost:PORT          │   node)         │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `socket` | Queueing socket adapter with intentional-close handling |
//! | `probe` | Bounded-timeout reachability checks |

// ============================================================================
// Submodules
// ============================================================================

/// Queueing socket adapter.
pub mod socket;

/// Reachability probing.
pub mod probe;

// ============================================================================
// Re-exports
// ============================================================================

pub use probe::probe_endpoint;
pub use socket::{BackendSocket, SocketEvent, SocketEventKind};
