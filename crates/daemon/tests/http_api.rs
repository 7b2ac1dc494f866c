mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use prmx_oracle_core::api::{CycleReport, SchedulerStatus, SchedulerTransition};
use prmx_oracle_core::model::{EvidenceRecord, Monitor, MonitorState};
use prmx_oracle_core::now_ms;
use prmx_oracle_daemon::http::router;
use prmx_oracle_daemon::scheduler::Scheduler;
use serde_json::{json, Value};

async fn serve(h: &Harness) -> String {
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&h.svc), Duration::from_secs(3600)));
    let app = router(Arc::clone(&h.svc), scheduler);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn register_ingest_cycle_and_audit() {
    let h = harness();
    let base = serve(&h).await;
    let client = reqwest::Client::new();
    let now = now_ms();

    let resp = client
        .post(format!("{base}/v1/monitors"))
        .json(&json!({
            "policy_id": 42,
            "location_id": "st-42",
            "threshold_mm": 50.0,
            "window_start_ms": now - HOUR,
            "window_end_ms": now + HOUR,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base}/v1/observations"))
        .json(&json!({"observations": [
            {"location_id": "st-42", "observed_at_ms": now - 30 * 60 * 1000, "rainfall_mm": 30.0},
            {"location_id": "st-42", "observed_at_ms": now - 10 * 60 * 1000, "rainfall_mm": 32.0},
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["accepted"], json!(2));

    let report: CycleReport = client
        .post(format!("{base}/v1/cycles"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report.reported, 1);

    let monitor: Monitor = client
        .get(format!("{base}/v1/monitors/42"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(monitor.state, MonitorState::Reported);

    let hash = monitor.evidence_hash.unwrap();
    let record: EvidenceRecord = client
        .get(format!("{base}/v1/evidence/0x{hash}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record.evidence_hash, hash);

    let again = client
        .post(format!("{base}/v1/monitors"))
        .json(&json!({
            "policy_id": 42,
            "location_id": "st-42",
            "threshold_mm": 10.0,
            "window_start_ms": now,
            "window_end_ms": now + HOUR,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
    assert!(again.json::<Value>().await.unwrap()["error"].as_str().unwrap().contains("already reported"));
}

#[tokio::test]
async fn error_statuses() {
    let h = harness();
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    assert_eq!(client.get(format!("{base}/healthz")).send().await.unwrap().status(), 200);
    assert_eq!(client.get(format!("{base}/v1/monitors/7")).send().await.unwrap().status(), 404);
    assert_eq!(client.post(format!("{base}/v1/monitors/7/cancel")).send().await.unwrap().status(), 404);
    assert_eq!(client.get(format!("{base}/v1/evidence/nothex")).send().await.unwrap().status(), 400);
    assert_eq!(
        client.get(format!("{base}/v1/evidence/{}", "ab".repeat(32))).send().await.unwrap().status(),
        404
    );

    let bad = client
        .post(format!("{base}/v1/monitors"))
        .json(&json!({
            "policy_id": 1,
            "location_id": "st-1",
            "threshold_mm": -1.0,
            "window_start_ms": 0,
            "window_end_ms": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn manual_cycle_conflicts_with_running_cycle() {
    let h = harness();
    let now = now_ms();
    add_readings(&h.store, "st-42", &[(now - 1_000, 80.0)]).await;
    h.svc
        .register_monitor(prmx_oracle_core::api::RegisterMonitorRequest {
            policy_id: 42,
            location_id: "st-42".into(),
            threshold_mm: 50.0,
            window_start_ms: now - HOUR,
            window_end_ms: now + HOUR,
        })
        .await
        .unwrap();
    let gate = h.ledger.hold_submissions();
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let first = {
        let client = client.clone();
        let url = format!("{base}/v1/cycles");
        tokio::spawn(async move { client.post(url).send().await.unwrap().status() })
    };
    gate.entered.notified().await;

    let second = client.post(format!("{base}/v1/cycles")).send().await.unwrap();
    assert_eq!(second.status(), 409);

    let status: SchedulerStatus = client.get(format!("{base}/v1/scheduler")).send().await.unwrap().json().await.unwrap();
    assert!(status.cycle_in_progress);
    assert!(!status.running);

    gate.release.notify_one();
    assert_eq!(first.await.unwrap(), 200);
}

#[tokio::test]
async fn scheduler_start_stop_endpoints() {
    let h = harness();
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let post = |path: &'static str| {
        let client = client.clone();
        let url = format!("{base}{path}");
        async move { client.post(url).send().await.unwrap().json::<SchedulerTransition>().await.unwrap() }
    };

    let started = post("/v1/scheduler/start").await;
    assert!(started.changed && started.running);
    let again = post("/v1/scheduler/start").await;
    assert!(!again.changed && again.running);

    let status: SchedulerStatus = client.get(format!("{base}/v1/scheduler")).send().await.unwrap().json().await.unwrap();
    assert!(status.running);
    assert_eq!(status.interval_ms, 3_600_000);

    let stopped = post("/v1/scheduler/stop").await;
    assert!(stopped.changed && !stopped.running);
    assert!(!post("/v1/scheduler/stop").await.changed);
}
