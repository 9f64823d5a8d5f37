//! Backend identity and endpoint construction.
//!
//! A session routes traffic to exactly one of two backends at a time:
//! the desktop App (control port) or the fallback local node. This module
//! defines the backend discriminator and builds the per-page App endpoint
//! URL carrying connection metadata.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;

// ============================================================================
// BackendKind
// ============================================================================

/// The two real backends a session can route traffic to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Desktop wallet application, reached over its local control port.
    App,
    /// Local blockchain node speaking plain JSON-RPC.
    Fallback,
}

impl BackendKind {
    /// Human-readable source tag used in state broadcasts.
    #[inline]
    #[must_use]
    pub const fn source_tag(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Fallback => "fallback",
        }
    }

    /// Resolves the endpoint URL for this backend.
    ///
    /// The App endpoint carries the page metadata as a query string; the
    /// fallback endpoint is plain.
    #[must_use]
    pub fn endpoint(self, config: &BridgeConfig, meta: &PageMeta) -> String {
        match self {
            Self::App => {
                let base = config.app_endpoint();
                match meta.query_string() {
                    Some(query) => format!("{base}?{query}"),
                    None => base,
                }
            }
            Self::Fallback => config.fallback_endpoint(),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_tag())
    }
}

// ============================================================================
// PageMeta
// ============================================================================

/// Connection metadata describing the page behind a session.
///
/// Encoded into the App endpoint query string so the desktop App can show
/// which page a connection belongs to. Unset fields are omitted entirely
/// rather than sent as empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    /// Page origin, e.g. `https://app.example.org`.
    pub origin: Option<String>,

    /// Full page URL.
    pub url: Option<String>,

    /// Page title at connect time.
    pub title: Option<String>,
}

impl PageMeta {
    /// Creates empty metadata (fallback sessions, tests).
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            origin: None,
            url: None,
            title: None,
        }
    }

    /// Builds the URL-encoded query string, or `None` when every field is
    /// unset.
    #[must_use]
    pub fn query_string(&self) -> Option<String> {
        let mut pairs = Vec::with_capacity(3);

        if let Some(origin) = &self.origin {
            pairs.push(format!("origin={}", urlencoding::encode(origin)));
        }
        if let Some(url) = &self.url {
            pairs.push(format!("url={}", urlencoding::encode(url)));
        }
        if let Some(title) = &self.title {
            pairs.push(format!("title={}", urlencoding::encode(title)));
        }

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("&"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
