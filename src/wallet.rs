//! One-shot wallet snapshot queries.
//!
//! Backs the `get-wallet-info` control message: opens a throwaway
//! connection to the configured endpoint, asks for accounts, chain id, and
//! the first account's balance, and closes. Unlike session traffic this is
//! a fallible request/response exchange, so backend JSON-RPC errors surface
//! as [`Error::Rpc`] here instead of passing through to a page.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{RpcRequest, RpcResponse, WalletInfo};

// ============================================================================
// Wallet Info
// ============================================================================

/// Fetches accounts, chain id, and first-account balance from `endpoint`.
///
/// The whole exchange is bounded by `op_timeout`; the throwaway socket is
/// closed before returning.
///
/// # Errors
///
/// - [`Error::Endpoint`] if `endpoint` is not a valid URL
/// - [`Error::ConnectionTimeout`] if the exchange exceeds `op_timeout`
/// - [`Error::Connection`] / [`Error::WebSocket`] on transport failure
/// - [`Error::Rpc`] if the backend answers any query with an error
pub async fn fetch_wallet_info(endpoint: &str, op_timeout: Duration) -> Result<WalletInfo> {
    // Reject garbage endpoints before spending the timeout on them.
    Url::parse(endpoint).map_err(|_| Error::endpoint(endpoint))?;

    match timeout(op_timeout, query_wallet(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(Error::connection_timeout(op_timeout.as_millis() as u64)),
    }
}

async fn query_wallet(endpoint: &str) -> Result<WalletInfo> {
    let (mut ws, _) = connect_async(endpoint).await?;

    let accounts_value = call(&mut ws, 1, "eth_accounts", None).await?;
    let accounts: Vec<String> = accounts_value
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let chain_id = call(&mut ws, 2, "eth_chainId", None)
        .await?
        .as_str()
        .unwrap_or_default()
        .to_string();

    let balance = match accounts.first() {
        Some(account) => {
            let params = json!([account, "latest"]);
            let value = call(&mut ws, 3, "eth_getBalance", Some(params)).await?;
            value.as_str().map(str::to_string)
        }
        None => None,
    };

    let _ = ws.close(None).await;

    debug!(accounts = accounts.len(), chain_id = %chain_id, "wallet info fetched");

    Ok(WalletInfo {
        accounts,
        chain_id,
        balance,
    })
}

/// Socket type produced by [`connect_async`].
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Sends one request and reads frames until its response arrives.
async fn call(ws: &mut WsStream, id: u64, method: &str, params: Option<Value>) -> Result<Value> {
    let request = RpcRequest::new(id, method, params);
    ws.send(Message::Text(request.to_wire()?.into())).await?;

    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => {
                // Tolerate the App's keep-alive convention.
                if text.as_str() == "ping" {
                    ws.send(Message::Text("pong".into())).await?;
                    continue;
                }

                let value: Value = serde_json::from_str(&text)
                    .map_err(|e| Error::protocol(format!("unparseable frame: {e}")))?;

                // Unrelated frames (subscriptions, stale responses) are
                // skipped; only our id settles the call.
                let matches = RpcResponse::id_of(&value)
                    .is_some_and(|frame_id| frame_id == id.into());
                if !matches {
                    continue;
                }

                if let Some(error) = value.get("error") {
                    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
                    let message = error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(Error::rpc(code, message));
                }

                return Ok(value.get("result").cloned().unwrap_or(Value::Null));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(Error::ConnectionClosed)
}

// ============================================================================
// Tests
// ============================================================================
