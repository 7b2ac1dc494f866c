//! Parametric trigger evaluation.
//!
//! `evaluate` is a pure function of the monitor, its observations and the
//! supplied clock, so a decision can be replayed from stored data.

use serde::{Deserialize, Serialize};

use crate::model::{EpochMs, Monitor, MonitorState, Observation, Outcome};

/// Tunables for evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationParams {
    /// Readings older than this (relative to "now", or to the window end
    /// once the window has elapsed) mean the feed is stale.
    pub max_staleness_ms: i64,
}

impl Default for EvaluationParams {
    fn default() -> Self {
        Self {
            max_staleness_ms: 6 * 60 * 60 * 1000,
        }
    }
}

/// Facts a report is built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Trigger decision.
    pub outcome: Outcome,
    /// Crossing reading time, or the window end when nothing fired.
    pub observed_at_ms: EpochMs,
    /// Running sum at `observed_at_ms`.
    pub cumulative_mm: f64,
    /// Readings accumulated up to `observed_at_ms`.
    pub observation_count: usize,
}

/// Why a decision could not be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficientData {
    /// No readings inside the window.
    NoObservations,
    /// Latest reading is older than the staleness bound.
    Stale {
        /// Time of the newest usable reading.
        last_observed_at_ms: EpochMs,
    },
    /// A reading carries a negative or non-finite value.
    Malformed {
        /// Time of the offending reading.
        observed_at_ms: EpochMs,
        /// The value as received.
        rainfall_mm: f64,
    },
}

/// Evaluator output for one monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Monitor is terminal; nothing to do.
    Skip {
        /// State that made it terminal.
        state: MonitorState,
    },
    /// Coverage window has not started.
    WindowNotOpen,
    /// Threshold not reached yet; keep monitoring.
    NoTrigger {
        /// Rain summed so far.
        cumulative_mm: f64,
    },
    /// Threshold reached; outcome is `occurred`.
    Trigger(Finding),
    /// Window elapsed below threshold; outcome is `not_occurred`.
    WindowExpiredNoTrigger(Finding),
    /// Explicit non-decision; never a silent "no event".
    InsufficientData(InsufficientData),
}

impl Decision {
    /// The finding to report, if this decision calls for a report.
    pub fn reportable(&self) -> Option<&Finding> {
        match self {
            Self::Trigger(f) | Self::WindowExpiredNoTrigger(f) => Some(f),
            _ => None,
        }
    }
}

/// Decides whether `monitor`'s parametric condition has been met at `now_ms`.
///
/// `observations` may be unsorted and may include readings outside the
/// window; both are handled here.
pub fn evaluate(
    monitor: &Monitor,
    observations: &[Observation],
    now_ms: EpochMs,
    params: &EvaluationParams,
) -> Decision {
    if monitor.state.is_terminal() {
        return Decision::Skip { state: monitor.state };
    }
    if now_ms < monitor.window_start_ms {
        return Decision::WindowNotOpen;
    }

    let mut window: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.observed_at_ms >= monitor.window_start_ms && o.observed_at_ms < monitor.window_end_ms)
        .filter(|o| o.observed_at_ms <= now_ms)
        .collect();
    window.sort_by_key(|o| o.observed_at_ms);

    if let Some(bad) = window.iter().find(|o| !o.rainfall_mm.is_finite() || o.rainfall_mm < 0.0) {
        return Decision::InsufficientData(InsufficientData::Malformed {
            observed_at_ms: bad.observed_at_ms,
            rainfall_mm: bad.rainfall_mm,
        });
    }

    let mut cumulative = 0.0_f64;
    for (idx, obs) in window.iter().enumerate() {
        cumulative += obs.rainfall_mm;
        if cumulative >= monitor.threshold_mm {
            return Decision::Trigger(Finding {
                outcome: Outcome::Occurred,
                observed_at_ms: obs.observed_at_ms,
                cumulative_mm: cumulative,
                observation_count: idx + 1,
            });
        }
    }

    let Some(last) = window.last() else {
        return Decision::InsufficientData(InsufficientData::NoObservations);
    };

    let expired = now_ms >= monitor.window_end_ms;
    let reference = if expired { monitor.window_end_ms } else { now_ms };
    let fresh_after = reference.saturating_sub(params.max_staleness_ms.max(0));
    if last.observed_at_ms < fresh_after {
        return Decision::InsufficientData(InsufficientData::Stale {
            last_observed_at_ms: last.observed_at_ms,
        });
    }

    if expired {
        Decision::WindowExpiredNoTrigger(Finding {
            outcome: Outcome::NotOccurred,
            observed_at_ms: monitor.window_end_ms,
            cumulative_mm: cumulative,
            observation_count: window.len(),
        })
    } else {
        Decision::NoTrigger { cumulative_mm: cumulative }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;

    fn monitor(threshold_mm: f64) -> Monitor {
        Monitor::new(42, "st-7", threshold_mm, 0, 24 * HOUR, 0)
    }

    fn obs(at: i64, mm: f64) -> Observation {
        Observation {
            location_id: "st-7".into(),
            observed_at_ms: at,
            rainfall_mm: mm,
            source: None,
        }
    }

    fn params() -> EvaluationParams {
        EvaluationParams { max_staleness_ms: 3 * HOUR }
    }

    #[test]
    fn triggers_when_cumulative_crosses_threshold() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 20.0), obs(2 * HOUR, 25.0), obs(3 * HOUR, 17.0)];
        let d = evaluate(&m, &data, 4 * HOUR, &params());
        match d {
            Decision::Trigger(f) => {
                assert_eq!(f.outcome, Outcome::Occurred);
                assert_eq!(f.observed_at_ms, 3 * HOUR);
                assert_eq!(f.cumulative_mm, 62.0);
                assert_eq!(f.observation_count, 3);
            }
            other => panic!("expected trigger, got {other:?}"),
        }
    }

    #[test]
    fn trigger_reports_the_crossing_reading_even_with_later_data() {
        let m = monitor(50.0);
        let data = vec![obs(3 * HOUR, 5.0), obs(HOUR, 30.0), obs(2 * HOUR, 20.0)];
        let d = evaluate(&m, &data, 4 * HOUR, &params());
        let f = d.reportable().copied().unwrap();
        assert_eq!(f.observed_at_ms, 2 * HOUR);
        assert_eq!(f.cumulative_mm, 50.0);
    }

    #[test]
    fn below_threshold_with_open_window_keeps_monitoring() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 10.0), obs(2 * HOUR, 20.0)];
        assert_eq!(
            evaluate(&m, &data, 3 * HOUR, &params()),
            Decision::NoTrigger { cumulative_mm: 30.0 }
        );
    }

    #[test]
    fn expired_window_below_threshold_reports_not_occurred() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 10.0), obs(23 * HOUR, 20.0)];
        match evaluate(&m, &data, 25 * HOUR, &params()) {
            Decision::WindowExpiredNoTrigger(f) => {
                assert_eq!(f.outcome, Outcome::NotOccurred);
                assert_eq!(f.observed_at_ms, 24 * HOUR);
                assert_eq!(f.cumulative_mm, 30.0);
            }
            other => panic!("expected expiry, got {other:?}"),
        }
    }

    #[test]
    fn readings_outside_the_window_are_ignored() {
        let m = Monitor::new(1, "st-7", 50.0, 10 * HOUR, 20 * HOUR, 0);
        let data = vec![obs(HOUR, 100.0), obs(11 * HOUR, 5.0), obs(20 * HOUR, 100.0)];
        assert_eq!(
            evaluate(&m, &data, 12 * HOUR, &params()),
            Decision::NoTrigger { cumulative_mm: 5.0 }
        );
    }

    #[test]
    fn terminal_monitors_are_skipped() {
        let mut m = monitor(1.0);
        m.state = MonitorState::Reported;
        let data = vec![obs(HOUR, 100.0)];
        assert_eq!(
            evaluate(&m, &data, 2 * HOUR, &params()),
            Decision::Skip { state: MonitorState::Reported }
        );
        m.state = MonitorState::Cancelled;
        assert!(evaluate(&m, &data, 2 * HOUR, &params()).reportable().is_none());
    }

    #[test]
    fn failed_monitors_are_still_evaluated() {
        let mut m = monitor(10.0);
        m.state = MonitorState::Failed;
        let d = evaluate(&m, &[obs(HOUR, 11.0)], 2 * HOUR, &params());
        assert!(matches!(d, Decision::Trigger(_)));
    }

    #[test]
    fn no_data_is_explicit() {
        let m = monitor(50.0);
        assert_eq!(
            evaluate(&m, &[], HOUR, &params()),
            Decision::InsufficientData(InsufficientData::NoObservations)
        );
        assert_eq!(
            evaluate(&m, &[], 30 * HOUR, &params()),
            Decision::InsufficientData(InsufficientData::NoObservations)
        );
    }

    #[test]
    fn stale_feed_is_not_a_negative() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 10.0)];
        assert_eq!(
            evaluate(&m, &data, 10 * HOUR, &params()),
            Decision::InsufficientData(InsufficientData::Stale { last_observed_at_ms: HOUR })
        );
        // Expired window without coverage near its end.
        assert_eq!(
            evaluate(&m, &data, 30 * HOUR, &params()),
            Decision::InsufficientData(InsufficientData::Stale { last_observed_at_ms: HOUR })
        );
    }

    #[test]
    fn malformed_readings_are_rejected() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 10.0), obs(2 * HOUR, -1.0)];
        assert!(matches!(
            evaluate(&m, &data, 3 * HOUR, &params()),
            Decision::InsufficientData(InsufficientData::Malformed { observed_at_ms, .. }) if observed_at_ms == 2 * HOUR
        ));
        let data = vec![obs(HOUR, f64::NAN)];
        assert!(matches!(
            evaluate(&m, &data, 2 * HOUR, &params()),
            Decision::InsufficientData(InsufficientData::Malformed { .. })
        ));
    }

    #[test]
    fn future_readings_are_not_counted() {
        let m = monitor(50.0);
        let data = vec![obs(HOUR, 10.0), obs(5 * HOUR, 100.0)];
        assert_eq!(
            evaluate(&m, &data, 2 * HOUR, &params()),
            Decision::NoTrigger { cumulative_mm: 10.0 }
        );
    }

    #[test]
    fn window_not_open() {
        let m = Monitor::new(1, "st-7", 50.0, 10 * HOUR, 20 * HOUR, 0);
        assert_eq!(evaluate(&m, &[obs(HOUR, 80.0)], HOUR, &params()), Decision::WindowNotOpen);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let m = monitor(50.0);
        let data = vec![obs(2 * HOUR, 25.0), obs(HOUR, 20.0), obs(3 * HOUR, 17.0)];
        let a = evaluate(&m, &data, 4 * HOUR, &params());
        let b = evaluate(&m, &data, 4 * HOUR, &params());
        assert_eq!(a, b);
    }

    #[test]
    fn extreme_window_bounds_do_not_overflow() {
        let m = Monitor::new(1, "st-7", 50.0, i64::MIN, i64::MIN + 10, 0);
        let data = vec![obs(i64::MIN + 1, 5.0)];

        let expired = evaluate(&m, &data, 0, &params());
        assert!(matches!(
            expired,
            Decision::WindowExpiredNoTrigger(Finding { observed_at_ms, .. }) if observed_at_ms == i64::MIN + 10
        ));

        let huge = EvaluationParams { max_staleness_ms: i64::MAX };
        assert!(evaluate(&m, &data, 0, &huge).reportable().is_some());

        let negative = EvaluationParams { max_staleness_ms: -HOUR };
        let open = Monitor::new(1, "st-7", 50.0, 0, i64::MAX, 0);
        assert_eq!(
            evaluate(&open, &[obs(HOUR, 5.0)], HOUR, &negative),
            Decision::NoTrigger { cumulative_mm: 5.0 }
        );
    }
}
