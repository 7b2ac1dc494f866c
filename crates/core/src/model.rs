use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceHash;

/// On-ledger policy identifier.
pub type PolicyId = u64;

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Under observation, nothing reported yet.
    Pending,
    /// A report for this policy is final on the ledger. Terminal.
    Reported,
    /// The last report attempt failed; retried on a later cycle.
    Failed,
    /// Withdrawn by an operator. Terminal.
    Cancelled,
}

impl MonitorState {
    /// Terminal monitors are never evaluated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reported | Self::Cancelled)
    }

    /// Stable lowercase name, as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reported => "reported",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One policy/location pairing under parametric observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    /// Policy this monitor reports on.
    pub policy_id: PolicyId,
    /// Observation source (weather station / grid cell) the policy is tied to.
    pub location_id: String,
    /// Cumulative rainfall that fires the trigger.
    pub threshold_mm: f64,
    /// Coverage window, half-open `[start, end)`.
    pub window_start_ms: EpochMs,
    /// Exclusive end of the coverage window.
    pub window_end_ms: EpochMs,

    /// Where the monitor is in its lifecycle.
    pub state: MonitorState,
    /// Finalized transaction that carried the report; `None` when reconciled.
    #[serde(default)]
    pub report_tx_hash: Option<String>,
    /// Lowercase hex hash of the stored evidence record.
    #[serde(default)]
    pub evidence_hash: Option<String>,
    /// Non-transient report failures. Transient ones leave it unchanged.
    #[serde(default)]
    pub failed_attempts: u32,
    /// Message of the most recent failure of any kind.
    #[serde(default)]
    pub last_error: Option<String>,

    /// Registration time.
    pub created_ms: EpochMs,
    /// Time of the last state change.
    pub updated_ms: EpochMs,
}

impl Monitor {
    /// New pending monitor.
    pub fn new(
        policy_id: PolicyId,
        location_id: impl Into<String>,
        threshold_mm: f64,
        window_start_ms: EpochMs,
        window_end_ms: EpochMs,
        now: EpochMs,
    ) -> Self {
        Self {
            policy_id,
            location_id: location_id.into(),
            threshold_mm,
            window_start_ms,
            window_end_ms,
            state: MonitorState::Pending,
            report_tx_hash: None,
            evidence_hash: None,
            failed_attempts: 0,
            last_error: None,
            created_ms: now,
            updated_ms: now,
        }
    }

    /// Whether the cycle should look at this monitor at all.
    pub fn is_active(&self, max_report_attempts: u32) -> bool {
        match self.state {
            MonitorState::Pending => true,
            MonitorState::Failed => self.failed_attempts < max_report_attempts,
            MonitorState::Reported | MonitorState::Cancelled => false,
        }
    }
}

/// A single rainfall reading for a location.
///
/// `rainfall_mm` is the increment since the previous reading, not a running total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// Station or grid cell the reading belongs to.
    pub location_id: String,
    /// When the reading was taken.
    pub observed_at_ms: EpochMs,
    /// Rain since the previous reading, in millimetres.
    pub rainfall_mm: f64,
    /// Free-form provider tag, e.g. `gauge`.
    #[serde(default)]
    pub source: Option<String>,
}

/// Trigger decision carried by a report.
///
/// An enum rather than a bool so later schemes can add outcomes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The window closed below threshold.
    NotOccurred,
    /// Cumulative rainfall reached the threshold.
    Occurred,
}

impl Outcome {
    /// Single-byte wire code used in the signed message.
    pub fn code(self) -> u8 {
        match self {
            Self::NotOccurred => 0,
            Self::Occurred => 1,
        }
    }
}

/// Value submitted to the ledger for one policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportPayload {
    /// Policy being reported.
    pub policy_id: PolicyId,
    /// Trigger decision.
    pub outcome: Outcome,
    /// Crossing reading time, or the window end for `NotOccurred`.
    pub observed_at_ms: EpochMs,
    /// Rain summed over the window up to `observed_at_ms`.
    pub cumulative_mm: f64,
    /// Hash of the evidence that backs this report.
    pub evidence_hash: EvidenceHash,
}

impl ReportPayload {
    /// Fixed-point cumulative value as carried on the ledger (micrometres).
    pub fn cumulative_mm_x1000(&self) -> u64 {
        if self.cumulative_mm.is_finite() && self.cumulative_mm > 0.0 {
            (self.cumulative_mm * 1000.0).round() as u64
        } else {
            0
        }
    }
}

/// Immutable, content-addressed audit artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceRecord {
    /// Lowercase hex SHA-256 of `canonical_json`.
    pub evidence_hash: String,
    /// Policy the evidence was produced for.
    pub policy_id: PolicyId,
    /// Canonical JSON blob exactly as hashed.
    pub canonical_json: String,
    /// When the record was first written.
    pub created_ms: EpochMs,
}
