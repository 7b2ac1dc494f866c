//! Integration tests for the core crate.

use prmx_oracle_core::api::CycleReport;
use prmx_oracle_core::evaluate::{evaluate, Decision, EvaluationParams, InsufficientData};
use prmx_oracle_core::evidence::{build_evidence, hash_evidence};
use prmx_oracle_core::model::{Monitor, MonitorState, Observation, Outcome};

#[test]
fn test_monitor_state_serde() {
    let reported = MonitorState::Reported;
    let serialized = serde_json::to_string(&reported).unwrap();
    assert_eq!(serialized, r#""reported""#);
    let deserialized: MonitorState = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized, reported);
    assert_eq!(MonitorState::Cancelled.as_str(), "cancelled");
}

#[test]
fn test_outcome_serde() {
    assert_eq!(serde_json::to_string(&Outcome::Occurred).unwrap(), r#""occurred""#);
    assert_eq!(serde_json::to_string(&Outcome::NotOccurred).unwrap(), r#""not_occurred""#);
    assert_eq!(Outcome::NotOccurred.code(), 0);
    assert_eq!(Outcome::Occurred.code(), 1);
}

#[test]
fn test_decision_serde() {
    let d = Decision::InsufficientData(InsufficientData::Stale { last_observed_at_ms: 5 });
    let v = serde_json::to_value(&d).unwrap();
    assert_eq!(v["decision"], "insufficient_data");
    assert_eq!(v["kind"], "stale");
    assert_eq!(v["last_observed_at_ms"], 5);
}

#[test]
fn test_monitor_activity() {
    let mut m = Monitor::new(1, "st", 10.0, 0, 10, 0);
    assert!(m.is_active(3));
    m.state = MonitorState::Failed;
    m.failed_attempts = 2;
    assert!(m.is_active(3));
    m.failed_attempts = 3;
    assert!(!m.is_active(3));
    m.state = MonitorState::Reported;
    assert!(!m.is_active(3));
}

#[test]
fn test_monitor_deserializes_without_optional_fields() {
    let json = r#"{
        "policy_id": 9,
        "location_id": "st",
        "threshold_mm": 12.5,
        "window_start_ms": 0,
        "window_end_ms": 100,
        "state": "pending",
        "created_ms": 1,
        "updated_ms": 1
    }"#;
    let m: Monitor = serde_json::from_str(json).unwrap();
    assert_eq!(m.failed_attempts, 0);
    assert!(m.report_tx_hash.is_none());
}

#[test]
fn test_same_data_same_evidence_hash() {
    let monitor = Monitor::new(42, "st-42", 50.0, 0, 1_000_000, 0);
    let observations: Vec<Observation> = [20.0, 25.0, 17.0]
        .iter()
        .enumerate()
        .map(|(i, mm)| Observation {
            location_id: "st-42".into(),
            observed_at_ms: (i as i64 + 1) * 1_000,
            rainfall_mm: *mm,
            source: Some("gauge".into()),
        })
        .collect();
    let params = EvaluationParams::default();

    let first = evaluate(&monitor, &observations, 10_000, &params);
    let second = evaluate(&monitor, &observations, 20_000, &params);
    let f1 = *first.reportable().unwrap();
    let f2 = *second.reportable().unwrap();

    let h1 = hash_evidence(&build_evidence(&monitor, &observations, &f1));
    let h2 = hash_evidence(&build_evidence(&monitor, &observations, &f2));
    assert_eq!(h1.hash, h2.hash);
    assert_eq!(h1.canonical_json, h2.canonical_json);
}

#[test]
fn test_cycle_report_default_is_empty() {
    let r = CycleReport::default();
    assert_eq!(r.failed, 0);
    assert!(r.failures.is_empty());
    let back: CycleReport = serde_json::from_value(serde_json::to_value(&r).unwrap()).unwrap();
    assert_eq!(back, r);
}
