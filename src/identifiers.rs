//! Type-safe identifiers for bridge entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! JSON-RPC request ids live in [`crate::protocol::RpcId`] instead, since
//! they are chosen by the page and may be numbers or strings.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// TabId
// ============================================================================

/// Browser tab identifier.
///
/// One session exists per top-level tab; sub-frames never get their own
/// session. Tab IDs come from the browser and are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Creates a tab ID from a raw value.
    ///
    /// Returns `None` if the value is 0 (browsers never assign tab 0).
    #[inline]
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Returns the raw tab ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
