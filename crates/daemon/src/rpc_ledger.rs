//! JSON-RPC 2.0 ledger client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prmx_oracle_core::model::PolicyId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::ledger::{ErrorMetadata, ErrorRegistry, FinalizedTx, Ledger, LedgerError, SignedReport, TxStatus};

/// Timing knobs for [`RpcLedger`].
#[derive(Debug, Clone)]
pub struct RpcLedgerOptions {
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Delay between status polls while waiting for finality.
    pub finality_poll: Duration,
    /// Overall wait for finality after submission.
    pub finality_timeout: Duration,
}

impl Default for RpcLedgerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            finality_poll: Duration::from_secs(2),
            finality_timeout: Duration::from_secs(120),
        }
    }
}

/// [`Ledger`] backed by a node's JSON-RPC endpoint.
///
/// Runtime error metadata is fetched lazily and cached for the process lifetime.
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
    opts: RpcLedgerOptions,
    next_id: AtomicU64,
    errors: OnceCell<ErrorRegistry>,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcLedger {
    /// Builds the HTTP client; no request is made yet.
    pub fn new(url: impl Into<String>, opts: RpcLedgerOptions) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(opts.request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            opts,
            next_id: AtomicU64::new(1),
            errors: OnceCell::new(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method}: {e}")))?;

        if let Some(err) = resp.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = resp.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| LedgerError::Transport(format!("{method}: bad result: {e}")))
    }

    /// Runtime error metadata, fetched on first use and cached.
    async fn error_registry(&self) -> Result<&ErrorRegistry, LedgerError> {
        self.errors
            .get_or_try_init(|| async {
                let rows: Vec<ErrorMetadata> = self.call("prmxOracle_errorMetadata", json!([])).await?;
                tracing::debug!(entries = rows.len(), "loaded ledger error metadata");
                Ok::<_, LedgerError>(ErrorRegistry::new(rows))
            })
            .await
    }

    async fn wait_for_finality(&self, tx_hash: &str) -> Result<FinalizedTx, LedgerError> {
        let started = Instant::now();
        loop {
            let status: TxStatus = self.call("prmxOracle_transactionStatus", json!([tx_hash])).await?;
            match status {
                TxStatus::Finalized {
                    block_hash,
                    dispatch_error: None,
                } => {
                    return Ok(FinalizedTx {
                        tx_hash: tx_hash.to_string(),
                        block_hash,
                    })
                }
                TxStatus::Finalized {
                    dispatch_error: Some(raw),
                    ..
                } => {
                    let registry = self.error_registry().await?;
                    return Err(LedgerError::Dispatch(registry.decode(&raw)));
                }
                TxStatus::Invalid { reason } => return Err(LedgerError::Invalid(reason)),
                TxStatus::Dropped | TxStatus::Usurped | TxStatus::FinalityTimeout => {
                    return Err(LedgerError::Dropped {
                        tx_hash: tx_hash.to_string(),
                        status: format!("{status:?}"),
                    })
                }
                TxStatus::Ready | TxStatus::Broadcast | TxStatus::InBlock { .. } | TxStatus::Retracted => {
                    tracing::trace!(tx_hash, ?status, "awaiting finality");
                }
            }

            let waited = started.elapsed();
            if waited >= self.opts.finality_timeout {
                return Err(LedgerError::FinalityTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.opts.finality_poll).await;
        }
    }
}

impl Ledger for RpcLedger {
    async fn report_exists(&self, policy_id: PolicyId) -> Result<bool, LedgerError> {
        self.call("prmxOracle_v2ReportExists", json!([policy_id])).await
    }

    async fn account_nonce(&self, account: &str) -> Result<u64, LedgerError> {
        self.call("system_accountNextIndex", json!([account])).await
    }

    async fn submit_and_watch(&self, report: SignedReport) -> Result<FinalizedTx, LedgerError> {
        let params = serde_json::to_value(&report).map_err(|e| LedgerError::Transport(e.to_string()))?;
        let tx_hash: String = self.call("prmxOracle_submitV2Report", json!([params])).await?;
        tracing::info!(policy_id = report.call.policy_id, %tx_hash, "report broadcast");
        self.wait_for_finality(&tx_hash).await
    }
}
