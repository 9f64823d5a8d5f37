//! Wire message types.
//!
//! Two surfaces speak JSON to the bridge:
//!
//! | Module | Description |
//! |--------|-------------|
//! | `rpc` | JSON-RPC requests/responses relayed between page and backend |
//! | `control` | UI control messages and wallet-info payloads |
//!
//! The bridge treats RPC payloads as opaque: it correlates ids and forwards,
//! nothing more.

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC request/response types.
pub mod rpc;

/// UI control message types.
pub mod control;

// ============================================================================
// Re-exports
// ============================================================================

pub use control::{ControlRequest, WalletInfo};
pub use rpc::{RpcError, RpcId, RpcRequest, RpcResponse};
