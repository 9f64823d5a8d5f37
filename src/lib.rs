//! Wallet Bridge - Ethereum JSON-RPC connection broker.
//!
//! This library brokers JSON-RPC traffic between web pages and a local
//! wallet backend, presenting each page a single logical connection while
//! transparently choosing between two real backends: the desktop App
//! (local WebSocket control port) and a fallback local node (standard
//! JSON-RPC WebSocket endpoint).
//!
//! # Architecture
//!
//! One [`TabSession`] actor runs per browser tab:
//!
//! - **App preferred**: initialization probes the App first; Fallback is
//!   only used when the App is unreachable, and a Fallback session keeps
//!   hunting for App recovery.
//! - **Nothing lost, nothing doubled**: requests queue while no backend is
//!   active and replay in order; exactly one adapter is active at a time.
//! - **Quiet recovery**: individual reconnects are invisible; observers see
//!   only the aggregate connected/disconnected verdict, with a one-shot
//!   offline notification.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parking_lot::RwLock;
//! use tokio::sync::mpsc;
//! use wallet_bridge::{
//!     BridgeConfig, ConnectionStateHub, PageMeta, RpcRequest, SessionRegistry, TabId,
//!     TabSession,
//! };
//!
//! # fn main() -> wallet_bridge::Result<()> {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let config = Arc::new(RwLock::new(BridgeConfig::new()));
//! let hub = Arc::new(ConnectionStateHub::new());
//! let registry = Arc::new(SessionRegistry::new());
//!
//! // One session per tab; responses arrive on the page channel.
//! let (page_tx, mut page_rx) = mpsc::unbounded_channel();
//! let session = TabSession::spawn(
//!     TabId::new(1).unwrap(),
//!     PageMeta::empty(),
//!     config,
//!     hub,
//!     registry,
//!     page_tx,
//! );
//!
//! session.send(RpcRequest::new(1u64, "eth_chainId", None))?;
//! let response = page_rx.recv().await;
//! # Ok::<(), wallet_bridge::Error>(())
//! # })
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Backend identity and endpoint construction |
//! | [`config`] | Bridge configuration and retry policy |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | JSON-RPC and control message types |
//! | [`session`] | Per-tab state machine, actor, and registry |
//! | [`state`] | Process-wide connection state hub |
//! | [`transport`] | Socket adapter and reachability probes |
//! | [`wallet`] | One-shot wallet snapshot queries |

// ============================================================================
// Modules
// ============================================================================

/// Backend identity and endpoint construction.
pub mod backend;

/// Bridge configuration and retry policy.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Per-tab connection sessions.
pub mod session;

/// Process-wide connection state.
pub mod state;

/// WebSocket transport layer.
pub mod transport;

/// One-shot wallet snapshot queries.
pub mod wallet;

// ============================================================================
// Re-exports
// ============================================================================

// Backend types
pub use backend::{BackendKind, PageMeta};

// Configuration types
pub use config::{BridgeConfig, RetryPolicy};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::TabId;

// Protocol types
pub use protocol::{ControlRequest, RpcError, RpcId, RpcRequest, RpcResponse, WalletInfo};

// Session types
pub use session::registry::SessionRegistry;
pub use session::{SessionHandle, TabSession};

// State types
pub use state::{ConnectionState, ConnectionStateHub, StateBroadcast, StatusIndicator};

// Transport types
pub use transport::{BackendSocket, probe_endpoint};

// Wallet queries
pub use wallet::fetch_wallet_info;
