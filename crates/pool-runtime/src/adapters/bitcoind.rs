//! # Bitcoin Core JSON-RPC Node
//!
//! [`LocalNode`] over `getblocktemplate` / `submitblock`, with
//! `getbestblockhash` as a reachability check.

use crate::container::NodeRpcSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{
    BlockCandidate, Hash, LocalNode, NodeError, NodeTemplate, SubmitAccepted, SubmitRejected,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

/// The subset of the `getblocktemplate` result the pool uses.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcBlockTemplate {
    height: u64,
    previousblockhash: String,
    coinbasevalue: u64,
    bits: String,
    curtime: u32,
    #[serde(default)]
    transactions: Vec<RpcTemplateTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTemplateTransaction {
    txid: String,
}

/// Failures of a single RPC call, before they are mapped onto the port's
/// error types.
#[derive(Debug)]
enum CallError {
    Unreachable(String),
    TimedOut,
    Rpc(String),
    Malformed(String),
}

impl From<CallError> for NodeError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Unreachable(reason) => NodeError::Unreachable(reason),
            CallError::TimedOut => NodeError::Unreachable("request timed out".to_string()),
            CallError::Rpc(reason) => NodeError::Rpc(reason),
            CallError::Malformed(reason) => NodeError::Malformed(reason),
        }
    }
}

/// JSON-RPC client for a Bitcoin Core compatible node.
pub struct BitcoindNode {
    client: Client,
    settings: NodeRpcSettings,
    request_id: AtomicU64,
}

impl BitcoindNode {
    pub fn new(settings: NodeRpcSettings) -> Result<Self, NodeError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout.min(Duration::from_secs(2)))
            .build()
            .map_err(|e| NodeError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            settings,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Display-order hash of the node's chain tip.
    pub async fn best_block_hash(&self) -> Result<String, NodeError> {
        Ok(self.call::<_, String>("getbestblockhash", [(); 0]).await?)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, CallError> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| CallError::Malformed(format!("{method}: missing result")))
    }

    /// Like [`Self::call`], but a `null` result is `Ok(None)`.
    async fn call_optional<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Option<R>, CallError> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.settings.url).json(&request);
        if let Some(user) = &self.settings.user {
            builder = builder.basic_auth(user, self.settings.password.as_ref());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::TimedOut
            } else {
                CallError::Unreachable(e.to_string())
            }
        })?;

        // Bitcoin Core answers RPC errors with HTTP 500 and a JSON body, so
        // the status is not checked before decoding.
        let status = response.status();
        let body: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CallError::TimedOut
            } else {
                CallError::Malformed(format!("HTTP {status}: {e}"))
            }
        })?;

        if let Some(error) = body.error {
            return Err(CallError::Rpc(error.to_string()));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl LocalNode for BitcoindNode {
    async fn get_block_template(&self) -> Result<NodeTemplate, NodeError> {
        let params = [serde_json::json!({ "rules": ["segwit"] })];
        let template: RpcBlockTemplate = self.call("getblocktemplate", params).await?;
        to_node_template(template)
    }

    async fn submit_block(
        &self,
        candidate: &BlockCandidate,
    ) -> Result<SubmitAccepted, SubmitRejected> {
        if candidate.block_data.is_empty() {
            return Err(SubmitRejected::Rejected {
                reason: "candidate carries no block data".to_string(),
            });
        }

        let params = [hex::encode(&candidate.block_data)];
        let block_hash = candidate.block_hash();
        match self.call_optional::<_, String>("submitblock", params).await {
            Ok(result) => submit_result(block_hash, result),
            Err(CallError::TimedOut) => Err(SubmitRejected::TimedOut {
                after_ms: self.settings.timeout.as_millis() as u64,
            }),
            Err(CallError::Unreachable(reason)) => Err(SubmitRejected::Unreachable { reason }),
            Err(CallError::Rpc(reason)) | Err(CallError::Malformed(reason)) => {
                Err(SubmitRejected::Rejected { reason })
            }
        }
    }
}

/// Map a `submitblock` result string. `duplicate` means the node already
/// has the block, which is as good as accepting it.
pub(crate) fn submit_result(
    block_hash: Hash,
    result: Option<String>,
) -> Result<SubmitAccepted, SubmitRejected> {
    match result.as_deref() {
        None | Some("duplicate") => Ok(SubmitAccepted { block_hash }),
        Some(reason) => Err(SubmitRejected::Rejected {
            reason: reason.to_string(),
        }),
    }
}

pub(crate) fn to_node_template(template: RpcBlockTemplate) -> Result<NodeTemplate, NodeError> {
    let prev_block_hash = parse_display_hash(&template.previousblockhash)?;
    let bits = u32::from_str_radix(&template.bits, 16)
        .map_err(|e| NodeError::Malformed(format!("bits {:?}: {e}", template.bits)))?;

    let mut hasher = Sha256::new();
    for tx in &template.transactions {
        hasher.update(parse_display_hash(&tx.txid)?);
    }
    let mut tx_commitment = [0u8; 32];
    tx_commitment.copy_from_slice(&hasher.finalize());

    Ok(NodeTemplate {
        height: template.height,
        prev_block_hash,
        coinbase_value: template.coinbasevalue,
        tx_commitment,
        bits,
        curtime: template.curtime,
    })
}

/// Reversed-hex hash to internal byte order.
fn parse_display_hash(display: &str) -> Result<Hash, NodeError> {
    let mut bytes = hex::decode(display)
        .map_err(|e| NodeError::Malformed(format!("hash {display:?}: {e}")))?;
    if bytes.len() != 32 {
        return Err(NodeError::Malformed(format!(
            "hash {display:?}: {} bytes",
            bytes.len()
        )));
    }
    bytes.reverse();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}
