use serde::{Deserialize, Serialize};

use crate::model::{EpochMs, Observation, PolicyId};

/// Register (or re-register) a monitor for a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMonitorRequest {
    /// Policy to watch.
    pub policy_id: PolicyId,
    /// Station or grid cell whose readings count.
    pub location_id: String,
    /// Trigger level in millimetres; must be positive.
    pub threshold_mm: f64,
    /// Inclusive window start.
    pub window_start_ms: EpochMs,
    /// Exclusive window end; must be after the start.
    pub window_end_ms: EpochMs,
}

/// Cancel response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMonitorResponse {
    /// Policy the request named.
    pub policy_id: PolicyId,
    /// False when the monitor was already terminal.
    pub cancelled: bool,
}

/// Batch of readings to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestObservationsRequest {
    /// Readings in any order.
    pub observations: Vec<Observation>,
}

/// Ingest response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestObservationsResponse {
    /// Number of readings stored.
    pub accepted: usize,
}

/// One monitor that failed during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorFailure {
    /// Monitor that failed.
    pub policy_id: PolicyId,
    /// Error chain, outermost first.
    pub error: String,
}

/// Per-monitor tally of one evaluation cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    /// ULID of the cycle, logged with each cycle event.
    pub cycle_id: String,
    /// When the cycle took the lock.
    pub started_ms: EpochMs,
    /// When the last monitor was handled.
    pub finished_ms: EpochMs,

    /// Active monitors looked at.
    pub evaluated: usize,
    /// Reports submitted and finalized.
    pub reported: usize,
    /// Already on-chain; local state caught up without submitting.
    pub reconciled: usize,
    /// Window still open and below threshold.
    pub no_trigger: usize,
    /// Window not yet started.
    pub not_open: usize,
    /// No reading, stale readings, or an expired window without enough data.
    pub insufficient_data: usize,
    /// Monitors whose report attempt failed this cycle.
    pub failed: usize,

    /// One entry per failed monitor.
    #[serde(default)]
    pub failures: Vec<MonitorFailure>,
}

/// Scheduler status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the periodic timer is armed.
    pub running: bool,
    /// Timer period.
    pub interval_ms: u64,
    /// Set when a cycle is executing right now.
    pub cycle_in_progress: bool,
    /// Tally of the most recently finished cycle.
    #[serde(default)]
    pub last_cycle: Option<CycleReport>,
}

/// Start/stop response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerTransition {
    /// False when the request was a no-op.
    pub changed: bool,
    /// Timer state after the request.
    pub running: bool,
}
