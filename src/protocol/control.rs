//! Control messages exchanged with UI surfaces.
//!
//! Popup and devtools panels talk to the bridge with a small tagged message
//! set: query the aggregate connection state, force a probe, or fetch wallet
//! basics. None of these route page traffic.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// ControlRequest
// ============================================================================

/// A control message accepted from a UI surface.
///
/// # Format
///
/// ```json
/// {"type": "check-connection"}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// Read the current aggregate connection state.
    GetConnectionState,
    /// Force an immediate probe and state update.
    CheckConnection,
    /// Fetch accounts/chain/balance from the configured endpoint.
    GetWalletInfo,
}

// ============================================================================
// WalletInfo
// ============================================================================

/// Snapshot returned for a `get-wallet-info` request.
///
/// Values are hex-encoded exactly as the backend returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Accounts exposed by the wallet (`eth_accounts`).
    pub accounts: Vec<String>,

    /// Chain id (`eth_chainId`), e.g. `"0x1"`.
    #[serde(rename = "chainId")]
    pub chain_id: String,

    /// Balance of the first account in wei (`eth_getBalance`), when any
    /// account exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_tags() {
        let json = serde_json::to_string(&ControlRequest::CheckConnection).expect("serialize");
        assert_eq!(json, r#"{"type":"check-connection"}"#);

        let parsed: ControlRequest =
            serde_json::from_str(r#"{"type":"get-connection-state"}"#).expect("parse");
        assert_eq!(parsed, ControlRequest::GetConnectionState);

        let parsed: ControlRequest =
            serde_json::from_str(r#"{"type":"get-wallet-info"}"#).expect("parse");
        assert_eq!(parsed, ControlRequest::GetWalletInfo);
    }

    #[test]
    fn test_unknown_control_rejected() {
        let result = serde_json::from_str::<ControlRequest>(r#"{"type":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_wallet_info_serialization() {
        let info = WalletInfo {
            accounts: vec!["0xabc".to_string()],
            chain_id: "0x1".to_string(),
            balance: Some("0xde0b6b3a7640000".to_string()),
        };

        let json = serde_json::to_string(&info).expect("serialize");
        assert!(json.contains("\"chainId\":\"0x1\""));
        assert!(json.contains("\"balance\""));

        let empty = WalletInfo {
            accounts: vec![],
            chain_id: "0x1".to_string(),
            balance: None,
        };
        let json = serde_json::to_string(&empty).expect("serialize");
        assert!(!json.contains("balance"));
    }
}
