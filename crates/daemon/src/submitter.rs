//! Turns a trigger decision into a finalized, auditable report.

use std::sync::Arc;

use prmx_oracle_core::evidence::{hash_evidence, EvidenceHash};
use prmx_oracle_core::model::{EpochMs, EvidenceRecord, Outcome, PolicyId, ReportPayload};
use prmx_oracle_core::now_ms;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ledger::{DispatchError, Ledger, LedgerError};
use crate::signer::ReportSigner;
use crate::store::EvidenceStore;

/// Everything needed to report one policy.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// Policy to report.
    pub policy_id: PolicyId,
    /// Trigger decision.
    pub outcome: Outcome,
    /// Crossing time, or window end.
    pub observed_at_ms: EpochMs,
    /// Rain summed up to `observed_at_ms`.
    pub cumulative_mm: f64,
    /// Evidence payload, canonicalized and hashed before signing.
    pub evidence: Value,
}

/// Outcome of a finalized submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    /// Reported policy.
    pub policy_id: PolicyId,
    /// Finalized transaction.
    pub tx_hash: String,
    /// Block it was finalized in.
    pub block_hash: String,
    /// Hash carried by the call.
    pub evidence_hash: EvidenceHash,
    /// False if the local audit copy could not be written. The report is
    /// final on the ledger regardless.
    pub evidence_persisted: bool,
    /// False if the monitor row could not be moved to `reported`.
    pub monitor_updated: bool,
}

/// Why a report did not reach finality.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The runtime rejected the call; rendered as `<module>.<name>: <docs>`.
    #[error(transparent)]
    Dispatch(DispatchError),
    /// Transport, pool or finality failure.
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for SubmissionError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Dispatch(d) => Self::Dispatch(d),
            other => Self::Ledger(other),
        }
    }
}

impl SubmissionError {
    /// Dispatch failures are final; ledger failures follow [`LedgerError::is_transient`].
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Dispatch(_) => false,
            Self::Ledger(e) => e.is_transient(),
        }
    }
}

/// Drives one report from evidence hash to a persisted, final record.
pub struct ReportSubmitter<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    signer: Arc<ReportSigner>,
}

impl<S: EvidenceStore, L: Ledger> ReportSubmitter<S, L> {
    /// Shares the service's store, ledger and key.
    pub fn new(store: Arc<S>, ledger: Arc<L>, signer: Arc<ReportSigner>) -> Self {
        Self { store, ledger, signer }
    }

    /// Hashes, signs and submits, returning only after finalization.
    ///
    /// No retries here; the existence check must be done by the caller.
    pub async fn submit(&self, req: ReportRequest) -> Result<SubmissionReceipt, SubmissionError> {
        let evidence = hash_evidence(&req.evidence);
        let payload = ReportPayload {
            policy_id: req.policy_id,
            outcome: req.outcome,
            observed_at_ms: req.observed_at_ms,
            cumulative_mm: req.cumulative_mm,
            evidence_hash: evidence.hash,
        };

        let nonce = self.ledger.account_nonce(self.signer.account()).await?;
        let signed = self.signer.sign_report(&payload, nonce);
        info!(
            policy_id = req.policy_id,
            outcome = ?req.outcome,
            evidence_hash = %evidence.hash,
            nonce,
            "submitting report"
        );

        let finalized = self.ledger.submit_and_watch(signed).await?;
        info!(
            policy_id = req.policy_id,
            tx_hash = %finalized.tx_hash,
            block_hash = %finalized.block_hash,
            "report finalized"
        );

        // The chain is authoritative from here on; local failures are logged only.
        let now = now_ms();
        let record = EvidenceRecord {
            evidence_hash: evidence.hash.to_hex(),
            policy_id: req.policy_id,
            canonical_json: evidence.canonical_json,
            created_ms: now,
        };
        let evidence_persisted = match self.store.put_evidence(&record).await {
            Ok(inserted) => {
                if !inserted {
                    warn!(policy_id = req.policy_id, evidence_hash = %evidence.hash, "evidence already stored");
                }
                true
            }
            Err(e) => {
                error!(
                    policy_id = req.policy_id,
                    evidence_hash = %evidence.hash,
                    error = %e,
                    "failed to persist evidence for finalized report; audit trail needs reconciliation"
                );
                false
            }
        };

        let monitor_updated = match self
            .store
            .mark_reported(
                req.policy_id,
                Some(finalized.tx_hash.clone()),
                Some(evidence.hash.to_hex()),
                now,
            )
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                error!(
                    policy_id = req.policy_id,
                    tx_hash = %finalized.tx_hash,
                    error = %e,
                    "failed to mark monitor reported for finalized report"
                );
                false
            }
        };

        Ok(SubmissionReceipt {
            policy_id: req.policy_id,
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block_hash,
            evidence_hash: evidence.hash,
            evidence_persisted,
            monitor_updated,
        })
    }
}
