//! JSON-RPC adapter to the blockchain node
//!
//! Thin wrapper over the node's administrative RPC surface. Every call
//! carries basic auth and the client-wide timeout; failures surface as
//! adapter errors and leave the alert unprocessed for the retry worker.

use crate::config::RpcConfig;
use async_trait::async_trait;
use beacon_model::{
    AdapterError, BlockHash, ConfiscationOutcome, FundRecord, NodeAdapter, NotProcessedTx,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RpcNodeAdapter {
    client: reqwest::Client,
    config: RpcConfig,
}

impl RpcNodeAdapter {
    pub fn new(config: RpcConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Rpc(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "beacond",
            "method": method,
            "params": params,
        });
        debug!(method, "node rpc call");

        let response = self
            .client
            .post(&self.config.url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout
                } else {
                    AdapterError::Rpc(e.to_string())
                }
            })?;

        let status = response.status();
        let envelope: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Rpc(format!("invalid rpc response: {e}")))?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(AdapterError::Rpc(err.to_string()));
        }
        if !status.is_success() {
            return Err(AdapterError::Rpc(format!("http status {status}")));
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn funds_param(funds: &[FundRecord]) -> Value {
    json!({
        "funds": funds
            .iter()
            .map(|fund| {
                json!({
                    "txOut": {
                        "txId": fund.txid.to_string(),
                        "vout": fund.vout,
                    },
                    "enforceAtHeight": [{
                        "start": fund.enforce_start,
                        "stop": fund.enforce_end,
                    }],
                    "policyExpiresWithConsensus": fund.expires(),
                })
            })
            .collect::<Vec<_>>(),
    })
}

#[async_trait]
impl NodeAdapter for RpcNodeAdapter {
    async fn ban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError> {
        info!(peer, reason, "banning peer");
        self.call("setban", json!([peer, "add"])).await?;
        Ok(())
    }

    async fn unban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError> {
        info!(peer, reason, "unbanning peer");
        self.call("setban", json!([peer, "remove"])).await?;
        Ok(())
    }

    async fn freeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError> {
        info!(count = funds.len(), "freezing funds");
        self.call("addToPolicyBlacklist", json!([funds_param(funds)]))
            .await?;
        Ok(())
    }

    async fn unfreeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError> {
        info!(count = funds.len(), "unfreezing funds");
        self.call("removeFromPolicyBlacklist", json!([funds_param(funds)]))
            .await?;
        Ok(())
    }

    async fn confiscate_transaction(
        &self,
        enforce_at_height: i64,
        tx: &[u8],
    ) -> Result<ConfiscationOutcome, AdapterError> {
        info!(enforce_at_height, "whitelisting confiscation transaction");
        let params = json!([{
            "funds": [{
                "confiscationTx": {
                    "enforceAtHeight": enforce_at_height,
                    "hex": hex::encode(tx),
                },
            }],
        }]);
        let result = self.call("addToConfiscationTxidWhitelist", params).await?;

        let not_processed = result
            .get("notProcessed")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| NotProcessedTx {
                        txid: entry
                            .get("txId")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        reason: entry
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("unspecified")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ConfiscationOutcome { not_processed })
    }

    async fn invalidate_block(
        &self,
        block_hash: &BlockHash,
        reason: &str,
    ) -> Result<(), AdapterError> {
        info!(block_hash = %block_hash, reason, "invalidating block");
        self.call("invalidateblock", json!([block_hash.to_string()]))
            .await?;
        Ok(())
    }
}

/// Stand-in adapter for `--no-node`: logs every administrative action
/// instead of applying it.
pub struct LogOnlyNodeAdapter;

#[async_trait]
impl NodeAdapter for LogOnlyNodeAdapter {
    async fn ban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError> {
        info!(peer, reason, "no node configured; ban not applied");
        Ok(())
    }

    async fn unban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError> {
        info!(peer, reason, "no node configured; unban not applied");
        Ok(())
    }

    async fn freeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError> {
        info!(count = funds.len(), "no node configured; freeze not applied");
        Ok(())
    }

    async fn unfreeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError> {
        info!(count = funds.len(), "no node configured; unfreeze not applied");
        Ok(())
    }

    async fn confiscate_transaction(
        &self,
        enforce_at_height: i64,
        _tx: &[u8],
    ) -> Result<ConfiscationOutcome, AdapterError> {
        info!(enforce_at_height, "no node configured; confiscation not applied");
        Ok(ConfiscationOutcome::default())
    }

    async fn invalidate_block(
        &self,
        block_hash: &BlockHash,
        reason: &str,
    ) -> Result<(), AdapterError> {
        info!(block_hash = %block_hash, reason, "no node configured; invalidate not applied");
        Ok(())
    }
}
