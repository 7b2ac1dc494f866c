//! Ledger seam: existence check, nonce lookup and finalized submission.

use std::collections::HashMap;
use std::future::Future;

use prmx_oracle_core::evidence::EvidenceHash;
use prmx_oracle_core::model::{EpochMs, Outcome, PolicyId, ReportPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Arguments of the `submit_v2_report` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportCall {
    /// Policy being reported.
    pub policy_id: PolicyId,
    /// Trigger decision.
    pub outcome: Outcome,
    /// Crossing time, or window end.
    pub observed_at_ms: EpochMs,
    /// Cumulative rainfall in thousandths of a millimetre.
    pub cumulative_mm_x1000: u64,
    /// Raw evidence digest.
    pub evidence_hash: EvidenceHash,
}

impl ReportCall {
    /// Converts the float payload to the fixed-point call.
    pub fn from_payload(payload: &ReportPayload) -> Self {
        Self {
            policy_id: payload.policy_id,
            outcome: payload.outcome,
            observed_at_ms: payload.observed_at_ms,
            cumulative_mm_x1000: payload.cumulative_mm_x1000(),
            evidence_hash: payload.evidence_hash,
        }
    }
}

/// Signed transaction as handed to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedReport {
    /// `0x` hex public key.
    pub signer: String,
    /// Account nonce the signature commits to.
    pub nonce: u64,
    /// The call being signed.
    pub call: ReportCall,
    /// `0x` hex ed25519 signature.
    pub signature: String,
}

/// A transaction that reached finality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizedTx {
    /// `0x` hex transaction hash.
    pub tx_hash: String,
    /// Block the transaction was finalized in.
    pub block_hash: String,
}

/// Undecoded dispatch failure as reported by the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawDispatchError {
    /// A pallet error, resolved through [`ErrorRegistry`].
    Module {
        /// Pallet index in the runtime.
        index: u8,
        /// Error index within the pallet.
        error: u8,
    },
    /// Wrong origin for the call.
    BadOrigin,
    /// Account or index lookup failed.
    CannotLookup,
    /// Anything else, as free text.
    Other {
        /// Node-supplied description.
        message: String,
    },
}

/// Transaction lifecycle as reported by `prmxOracle_transactionStatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    /// In the pool, waiting.
    Ready,
    /// Gossiped to peers.
    Broadcast,
    /// Included, not yet final.
    InBlock {
        /// Including block.
        block_hash: String,
    },
    /// The including block was reorganized away.
    Retracted,
    /// Final. The call may still have failed to dispatch.
    Finalized {
        /// Finalized block.
        block_hash: String,
        /// Set when the call itself failed.
        #[serde(default)]
        dispatch_error: Option<RawDispatchError>,
    },
    /// The node stopped tracking finality for this transaction.
    FinalityTimeout,
    /// Replaced by another transaction with the same nonce.
    Usurped,
    /// Evicted from the pool.
    Dropped,
    /// Rejected before inclusion.
    Invalid {
        /// Node-supplied rejection reason.
        reason: String,
    },
}

/// One row of the runtime's error metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMetadata {
    /// Pallet index in the runtime.
    pub module_index: u8,
    /// Error index within the pallet.
    pub error_index: u8,
    /// Pallet name.
    pub module: String,
    /// Error variant name.
    pub name: String,
    /// Doc lines attached to the variant.
    #[serde(default)]
    pub docs: Vec<String>,
}

/// Decoded, human-readable dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{module}.{name}: {docs}")]
pub struct DispatchError {
    /// Pallet name.
    pub module: String,
    /// Error variant name.
    pub name: String,
    /// Joined doc lines, or a placeholder.
    pub docs: String,
}

impl DispatchError {
    /// Builds a decoded error from its parts.
    pub fn new(module: impl Into<String>, name: impl Into<String>, docs: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            docs: docs.into(),
        }
    }
}

/// Lookup table from `(module_index, error_index)` to error metadata.
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    entries: HashMap<(u8, u8), ErrorMetadata>,
}

impl ErrorRegistry {
    /// Indexes metadata rows by `(module_index, error_index)`.
    pub fn new(rows: impl IntoIterator<Item = ErrorMetadata>) -> Self {
        Self {
            entries: rows
                .into_iter()
                .map(|m| ((m.module_index, m.error_index), m))
                .collect(),
        }
    }

    /// Number of known errors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before metadata has been loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a raw dispatch error. Unknown indices decode to a placeholder.
    pub fn decode(&self, raw: &RawDispatchError) -> DispatchError {
        match raw {
            RawDispatchError::Module { index, error } => match self.entries.get(&(*index, *error)) {
                Some(meta) => {
                    let docs = meta.docs.join(" ").trim().to_string();
                    let docs = if docs.is_empty() { "no documentation".to_string() } else { docs };
                    DispatchError::new(&meta.module, &meta.name, docs)
                }
                None => DispatchError::new(format!("module#{index}"), format!("error#{error}"), "unknown error"),
            },
            RawDispatchError::BadOrigin => DispatchError::new("system", "BadOrigin", "bad origin for the call"),
            RawDispatchError::CannotLookup => {
                DispatchError::new("system", "CannotLookup", "failed to look up an account or index")
            }
            RawDispatchError::Other { message } => DispatchError::new("system", "Other", message),
        }
    }
}

/// Ledger client failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Connection, timeout or malformed response.
    #[error("ledger transport error: {0}")]
    Transport(String),
    /// JSON-RPC error object returned by the node.
    #[error("ledger rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// Finality was not observed in time. The report may still land.
    #[error("transaction {tx_hash} not finalized within {waited_ms}ms")]
    FinalityTimeout {
        /// Submitted transaction.
        tx_hash: String,
        /// How long the client waited.
        waited_ms: u64,
    },
    /// The transaction was dropped, usurped, or lost track of by the node.
    #[error("transaction {tx_hash} dropped: {status}")]
    Dropped {
        /// Submitted transaction.
        tx_hash: String,
        /// Last status seen.
        status: String,
    },
    /// Rejected before inclusion.
    #[error("transaction rejected as invalid: {0}")]
    Invalid(String),
    /// Included and finalized, but the call failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl LedgerError {
    /// Worth retrying on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Rpc { .. } | Self::FinalityTimeout { .. } | Self::Dropped { .. }
        )
    }
}

/// Ledger client used by the oracle.
///
/// Futures are `Send` so the scheduler can drive them from a spawned task.
pub trait Ledger: Send + Sync + 'static {
    /// Whether a V2 report for `policy_id` is already on-chain.
    fn report_exists(&self, policy_id: PolicyId) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Next nonce for `account`.
    fn account_nonce(&self, account: &str) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Submits `report` and resolves once the transaction is finalized.
    ///
    /// A dispatch failure inside a finalized block is an error.
    fn submit_and_watch(&self, report: SignedReport) -> impl Future<Output = Result<FinalizedTx, LedgerError>> + Send;
}
