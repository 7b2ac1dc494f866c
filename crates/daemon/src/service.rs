use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use anyhow::Context;

use prmx_oracle_core::api::{CycleReport, MonitorFailure, RegisterMonitorRequest};
use prmx_oracle_core::evaluate::{evaluate, Decision, EvaluationParams};
use prmx_oracle_core::evidence::build_evidence;
use prmx_oracle_core::model::{EpochMs, Monitor, MonitorState, Observation, PolicyId};
use prmx_oracle_core::{new_ulid, now_ms};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::signer::ReportSigner;
use crate::store::EvidenceStore;
use crate::submitter::{ReportRequest, ReportSubmitter, SubmissionError, SubmissionReceipt};

/// Why a cycle did not run to completion.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Another cycle holds the lock.
    #[error("an evaluation cycle is already running")]
    AlreadyRunning,
    /// Monitors could not be loaded.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Registration or ingest rejected.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// Request failed validation.
    #[error("invalid monitor: {0}")]
    Invalid(String),
    /// The policy's report is final; it cannot be watched again.
    #[error("policy {0} is already reported")]
    AlreadyReported(PolicyId),
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
enum MonitorError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

enum MonitorOutcome {
    Reported(SubmissionReceipt),
    Reconciled,
    NoTrigger,
    NotOpen,
    InsufficientData,
    Skipped,
}

/// Owns the oracle's shared resources and the single cycle implementation.
pub struct OracleService<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    submitter: ReportSubmitter<S, L>,
    params: EvaluationParams,
    max_report_attempts: u32,
    cycle_lock: Mutex<()>,
    last_cycle: StdMutex<Option<CycleReport>>,
}

impl<S: EvidenceStore, L: Ledger> OracleService<S, L> {
    /// Wires the store, ledger and signer into one service.
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        signer: Arc<ReportSigner>,
        params: EvaluationParams,
        max_report_attempts: u32,
    ) -> Self {
        let submitter = ReportSubmitter::new(Arc::clone(&store), Arc::clone(&ledger), signer);
        Self {
            store,
            ledger,
            submitter,
            params,
            max_report_attempts,
            cycle_lock: Mutex::new(()),
            last_cycle: StdMutex::new(None),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether a cycle holds the lock right now.
    pub fn is_cycle_running(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    /// Tally of the most recently finished cycle.
    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// One evaluation cycle at the current wall-clock time.
    ///
    /// Used by both the timer and manual triggers.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(now_ms()).await
    }

    /// One evaluation cycle, evaluating windows against `now`.
    pub async fn run_cycle_at(&self, now: EpochMs) -> Result<CycleReport, CycleError> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            return Err(CycleError::AlreadyRunning);
        };

        let mut report = CycleReport {
            cycle_id: new_ulid().to_string(),
            started_ms: now_ms(),
            ..Default::default()
        };

        let monitors = self.store.list_monitors().await.context("loading monitors")?;
        for monitor in monitors {
            if !monitor.is_active(self.max_report_attempts) {
                continue;
            }
            report.evaluated += 1;

            match self.process_monitor(&monitor, now).await {
                Ok(MonitorOutcome::Reported(receipt)) => {
                    report.reported += 1;
                    if !receipt.evidence_persisted || !receipt.monitor_updated {
                        warn!(
                            cycle_id = %report.cycle_id,
                            policy_id = monitor.policy_id,
                            evidence_persisted = receipt.evidence_persisted,
                            monitor_updated = receipt.monitor_updated,
                            "report finalized but local state is behind"
                        );
                    }
                }
                Ok(MonitorOutcome::Reconciled) => report.reconciled += 1,
                Ok(MonitorOutcome::NoTrigger) => report.no_trigger += 1,
                Ok(MonitorOutcome::NotOpen) => report.not_open += 1,
                Ok(MonitorOutcome::InsufficientData) => report.insufficient_data += 1,
                Ok(MonitorOutcome::Skipped) => report.evaluated -= 1,
                Err(e) => {
                    let message = format!("{e:#}");
                    let transient = match &e {
                        MonitorError::Ledger(l) => l.is_transient(),
                        MonitorError::Submission(s) => s.is_transient(),
                        MonitorError::Store(_) => true,
                    };
                    warn!(
                        cycle_id = %report.cycle_id,
                        policy_id = monitor.policy_id,
                        transient,
                        error = %message,
                        "monitor failed"
                    );
                    if let Err(store_err) = self.store.mark_failed(monitor.policy_id, message.clone(), transient, now_ms()).await {
                        warn!(policy_id = monitor.policy_id, error = %store_err, "could not record failure");
                    }
                    report.failed += 1;
                    report.failures.push(MonitorFailure {
                        policy_id: monitor.policy_id,
                        error: message,
                    });
                }
            }
        }

        report.finished_ms = now_ms();
        info!(
            cycle_id = %report.cycle_id,
            evaluated = report.evaluated,
            reported = report.reported,
            reconciled = report.reconciled,
            insufficient_data = report.insufficient_data,
            failed = report.failed,
            "cycle finished"
        );
        *self.last_cycle.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    async fn process_monitor(&self, monitor: &Monitor, now: EpochMs) -> Result<MonitorOutcome, MonitorError> {
        let observations = self
            .store
            .observations(&monitor.location_id, monitor.window_start_ms, monitor.window_end_ms)
            .await
            .context("loading observations")?;

        let decision = evaluate(monitor, &observations, now, &self.params);
        let finding = match &decision {
            Decision::Trigger(f) | Decision::WindowExpiredNoTrigger(f) => *f,
            Decision::Skip { .. } => return Ok(MonitorOutcome::Skipped),
            Decision::WindowNotOpen => return Ok(MonitorOutcome::NotOpen),
            Decision::NoTrigger { cumulative_mm } => {
                debug!(policy_id = monitor.policy_id, cumulative_mm, "below threshold");
                return Ok(MonitorOutcome::NoTrigger);
            }
            Decision::InsufficientData(reason) => {
                warn!(policy_id = monitor.policy_id, ?reason, "insufficient data");
                return Ok(MonitorOutcome::InsufficientData);
            }
        };

        // Idempotency gate: must complete before any submission for this policy.
        if self.ledger.report_exists(monitor.policy_id).await? {
            info!(policy_id = monitor.policy_id, "report already on-chain; reconciling local state");
            self.store.mark_reported(monitor.policy_id, None, None, now_ms()).await?;
            return Ok(MonitorOutcome::Reconciled);
        }

        let evidence = build_evidence(monitor, &observations, &finding);
        let receipt = self
            .submitter
            .submit(ReportRequest {
                policy_id: monitor.policy_id,
                outcome: finding.outcome,
                observed_at_ms: finding.observed_at_ms,
                cumulative_mm: finding.cumulative_mm,
                evidence,
            })
            .await?;
        Ok(MonitorOutcome::Reported(receipt))
    }

    /// Creates or resets a monitor. A reported policy cannot be re-registered.
    pub async fn register_monitor(&self, req: RegisterMonitorRequest) -> Result<Monitor, RegisterError> {
        if req.location_id.trim().is_empty() {
            return Err(RegisterError::Invalid("location_id is empty".into()));
        }
        if !req.threshold_mm.is_finite() || req.threshold_mm <= 0.0 {
            return Err(RegisterError::Invalid(format!("threshold_mm must be positive, got {}", req.threshold_mm)));
        }
        if req.window_end_ms <= req.window_start_ms {
            return Err(RegisterError::Invalid("window_end_ms must be after window_start_ms".into()));
        }
        if let Some(existing) = self.store.get_monitor(req.policy_id).await? {
            if existing.state == MonitorState::Reported {
                return Err(RegisterError::AlreadyReported(req.policy_id));
            }
        }

        let monitor = Monitor::new(
            req.policy_id,
            req.location_id,
            req.threshold_mm,
            req.window_start_ms,
            req.window_end_ms,
            now_ms(),
        );
        self.store.upsert_monitor(&monitor).await?;
        info!(policy_id = monitor.policy_id, location_id = %monitor.location_id, "monitor registered");
        Ok(monitor)
    }

    /// Marks a monitor cancelled. False when it was missing or already terminal.
    pub async fn cancel_monitor(&self, policy_id: PolicyId) -> anyhow::Result<bool> {
        let cancelled = self.store.cancel_monitor(policy_id, now_ms()).await?;
        if cancelled {
            info!(policy_id, "monitor cancelled");
        }
        Ok(cancelled)
    }

    /// Validates and stores a batch of readings. All-or-nothing validation.
    pub async fn ingest_observations(&self, observations: &[Observation]) -> Result<usize, RegisterError> {
        for o in observations {
            if o.location_id.trim().is_empty() {
                return Err(RegisterError::Invalid("observation location_id is empty".into()));
            }
            if !o.rainfall_mm.is_finite() || o.rainfall_mm < 0.0 {
                return Err(RegisterError::Invalid(format!(
                    "rainfall_mm must be a non-negative number, got {} at {}",
                    o.rainfall_mm, o.observed_at_ms
                )));
            }
        }
        for o in observations {
            self.store.record_observation(o).await?;
        }
        debug!(count = observations.len(), "observations ingested");
        Ok(observations.len())
    }
}
