#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use prmx_oracle_core::evaluate::EvaluationParams;
use prmx_oracle_core::model::{EpochMs, Monitor, Observation, PolicyId};
use prmx_oracle_daemon::ledger::{DispatchError, FinalizedTx, Ledger, LedgerError, SignedReport};
use prmx_oracle_daemon::service::OracleService;
use prmx_oracle_daemon::signer::ReportSigner;
use prmx_oracle_daemon::store::{EvidenceStore, MemoryStore};
use tokio::sync::Notify;

pub const HOUR: i64 = 60 * 60 * 1000;
pub const START: EpochMs = 1_735_689_600_000;
pub const END: EpochMs = START + 24 * HOUR;

pub enum Fault {
    Transport,
    Dispatch(DispatchError),
}

/// Pauses `submit_and_watch` until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct Inner {
    on_chain: HashSet<PolicyId>,
    submissions: Vec<SignedReport>,
    faults: VecDeque<Fault>,
    exists_calls: usize,
    nonce: u64,
    gate: Option<Arc<Gate>>,
}

/// In-process ledger: finalizes every submission immediately unless a fault is queued.
#[derive(Default)]
pub struct FakeLedger {
    inner: Mutex<Inner>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_on_chain(&self, policy_id: PolicyId) {
        self.inner.lock().unwrap().on_chain.insert(policy_id);
    }

    pub fn fail_next_submit(&self, fault: Fault) {
        self.inner.lock().unwrap().faults.push_back(fault);
    }

    pub fn hold_submissions(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.inner.lock().unwrap().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn submissions(&self) -> Vec<SignedReport> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn exists_calls(&self) -> usize {
        self.inner.lock().unwrap().exists_calls
    }
}

impl Ledger for FakeLedger {
    async fn report_exists(&self, policy_id: PolicyId) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.exists_calls += 1;
        Ok(inner.on_chain.contains(&policy_id))
    }

    async fn account_nonce(&self, _account: &str) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().unwrap().nonce)
    }

    async fn submit_and_watch(&self, report: SignedReport) -> Result<FinalizedTx, LedgerError> {
        let gate = self.inner.lock().unwrap().gate.clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut inner = self.inner.lock().unwrap();
        match inner.faults.pop_front() {
            Some(Fault::Transport) => return Err(LedgerError::Transport("connection reset".into())),
            Some(Fault::Dispatch(e)) => return Err(LedgerError::Dispatch(e)),
            None => {}
        }
        inner.nonce += 1;
        inner.on_chain.insert(report.call.policy_id);
        let n = inner.submissions.len() as u64 + 1;
        inner.submissions.push(report);
        Ok(FinalizedTx {
            tx_hash: format!("0x{n:064x}"),
            block_hash: format!("0x{:064x}", n + 1000),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<FakeLedger>,
    pub svc: Arc<OracleService<MemoryStore, FakeLedger>>,
}

pub fn harness() -> Harness {
    harness_with_attempts(5)
}

pub fn harness_with_attempts(max_report_attempts: u32) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedger::new());
    let signer = Arc::new(ReportSigner::from_seed(&[7u8; 32]));
    let svc = Arc::new(OracleService::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        signer,
        EvaluationParams::default(),
        max_report_attempts,
    ));
    Harness { store, ledger, svc }
}

pub fn reading(location_id: &str, observed_at_ms: EpochMs, rainfall_mm: f64) -> Observation {
    Observation {
        location_id: location_id.into(),
        observed_at_ms,
        rainfall_mm,
        source: Some("gauge".into()),
    }
}

pub async fn add_monitor(store: &MemoryStore, policy_id: PolicyId, location_id: &str, threshold_mm: f64) {
    store
        .upsert_monitor(&Monitor::new(policy_id, location_id, threshold_mm, START, END, START))
        .await
        .unwrap();
}

pub async fn add_readings(store: &MemoryStore, location_id: &str, readings: &[(EpochMs, f64)]) {
    for &(at, mm) in readings {
        store.record_observation(&reading(location_id, at, mm)).await.unwrap();
    }
}
