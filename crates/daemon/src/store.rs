//! Evidence store seam plus an in-memory implementation for tests.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use prmx_oracle_core::model::{EpochMs, EvidenceRecord, Monitor, MonitorState, Observation, PolicyId};

/// Persistence for monitors, evidence and observations.
///
/// `monitors` are mutable lifecycle rows keyed by policy id; `evidence` is
/// append-only and keyed by content hash.
pub trait EvidenceStore: Send + Sync + 'static {
    /// Inserts or replaces the monitor row for `monitor.policy_id`.
    fn upsert_monitor(&self, monitor: &Monitor) -> impl Future<Output = Result<()>> + Send;

    /// One monitor, if registered.
    fn get_monitor(&self, policy_id: PolicyId) -> impl Future<Output = Result<Option<Monitor>>> + Send;

    /// All monitors ordered by policy id.
    fn list_monitors(&self) -> impl Future<Output = Result<Vec<Monitor>>> + Send;

    /// Moves a monitor to `reported`. Returns false if it was already
    /// reported (or does not exist); a reported row is never rewritten.
    fn mark_reported(
        &self,
        policy_id: PolicyId,
        report_tx_hash: Option<String>,
        evidence_hash: Option<String>,
        now: EpochMs,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Records a failed attempt. No-op for terminal monitors.
    ///
    /// Only non-transient failures count toward `failed_attempts`; a
    /// transient one just records `last_error`.
    fn mark_failed(
        &self,
        policy_id: PolicyId,
        error: String,
        transient: bool,
        now: EpochMs,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Cancels a pending/failed monitor. Returns whether it changed.
    fn cancel_monitor(&self, policy_id: PolicyId, now: EpochMs) -> impl Future<Output = Result<bool>> + Send;

    /// Stores an evidence record. Returns false if the hash already exists,
    /// in which case the stored record is left untouched.
    fn put_evidence(&self, record: &EvidenceRecord) -> impl Future<Output = Result<bool>> + Send;

    /// Looks up a record by lowercase hex hash.
    fn get_evidence(&self, evidence_hash: &str) -> impl Future<Output = Result<Option<EvidenceRecord>>> + Send;

    /// Every record written for `policy_id`.
    fn list_evidence(&self, policy_id: PolicyId) -> impl Future<Output = Result<Vec<EvidenceRecord>>> + Send;

    /// Upserts a reading keyed by `(location_id, observed_at_ms)`.
    fn record_observation(&self, observation: &Observation) -> impl Future<Output = Result<()>> + Send;

    /// Readings for `location_id` in `[from_ms, to_ms)`, oldest first.
    fn observations(
        &self,
        location_id: &str,
        from_ms: EpochMs,
        to_ms: EpochMs,
    ) -> impl Future<Output = Result<Vec<Observation>>> + Send;
}

/// In-memory store. Not durable; used by tests and `--db mem://`-style demos.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    monitors: BTreeMap<PolicyId, Monitor>,
    evidence: HashMap<String, EvidenceRecord>,
    observations: HashMap<String, BTreeMap<EpochMs, Observation>>,
    fail_evidence_writes: bool,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put_evidence` fail, to exercise audit-write failures.
    pub fn fail_evidence_writes(&self, fail: bool) {
        self.lock().fail_evidence_writes = fail;
    }

    /// Number of stored evidence records.
    pub fn evidence_count(&self) -> usize {
        self.lock().evidence.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EvidenceStore for MemoryStore {
    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<()> {
        self.lock().monitors.insert(monitor.policy_id, monitor.clone());
        Ok(())
    }

    async fn get_monitor(&self, policy_id: PolicyId) -> Result<Option<Monitor>> {
        Ok(self.lock().monitors.get(&policy_id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.lock().monitors.values().cloned().collect())
    }

    async fn mark_reported(
        &self,
        policy_id: PolicyId,
        report_tx_hash: Option<String>,
        evidence_hash: Option<String>,
        now: EpochMs,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let Some(m) = inner.monitors.get_mut(&policy_id) else {
            return Ok(false);
        };
        if m.state == MonitorState::Reported {
            return Ok(false);
        }
        m.state = MonitorState::Reported;
        m.report_tx_hash = report_tx_hash;
        m.evidence_hash = evidence_hash;
        m.last_error = None;
        m.updated_ms = now;
        Ok(true)
    }

    async fn mark_failed(&self, policy_id: PolicyId, error: String, transient: bool, now: EpochMs) -> Result<()> {
        let mut inner = self.lock();
        if let Some(m) = inner.monitors.get_mut(&policy_id) {
            if !m.state.is_terminal() {
                m.state = MonitorState::Failed;
                if !transient {
                    m.failed_attempts += 1;
                }
                m.last_error = Some(error);
                m.updated_ms = now;
            }
        }
        Ok(())
    }

    async fn cancel_monitor(&self, policy_id: PolicyId, now: EpochMs) -> Result<bool> {
        let mut inner = self.lock();
        match inner.monitors.get_mut(&policy_id) {
            Some(m) if !m.state.is_terminal() => {
                m.state = MonitorState::Cancelled;
                m.updated_ms = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put_evidence(&self, record: &EvidenceRecord) -> Result<bool> {
        let mut inner = self.lock();
        if inner.fail_evidence_writes {
            anyhow::bail!("evidence store unavailable");
        }
        if inner.evidence.contains_key(&record.evidence_hash) {
            return Ok(false);
        }
        inner.evidence.insert(record.evidence_hash.clone(), record.clone());
        Ok(true)
    }

    async fn get_evidence(&self, evidence_hash: &str) -> Result<Option<EvidenceRecord>> {
        Ok(self.lock().evidence.get(evidence_hash).cloned())
    }

    async fn list_evidence(&self, policy_id: PolicyId) -> Result<Vec<EvidenceRecord>> {
        let mut out: Vec<EvidenceRecord> = self
            .lock()
            .evidence
            .values()
            .filter(|r| r.policy_id == policy_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_ms);
        Ok(out)
    }

    async fn record_observation(&self, observation: &Observation) -> Result<()> {
        self.lock()
            .observations
            .entry(observation.location_id.clone())
            .or_default()
            .insert(observation.observed_at_ms, observation.clone());
        Ok(())
    }

    async fn observations(&self, location_id: &str, from_ms: EpochMs, to_ms: EpochMs) -> Result<Vec<Observation>> {
        let inner = self.lock();
        let Some(series) = inner.observations.get(location_id) else {
            return Ok(Vec::new());
        };
        if from_ms >= to_ms {
            return Ok(Vec::new());
        }
        Ok(series.range(from_ms..to_ms).map(|(_, o)| o.clone()).collect())
    }
}
