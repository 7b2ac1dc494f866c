use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prmx_oracle_core::api::{
    CancelMonitorResponse, CycleReport, IngestObservationsRequest, IngestObservationsResponse,
    RegisterMonitorRequest, SchedulerStatus, SchedulerTransition,
};
use prmx_oracle_core::evidence::EvidenceHash;
use prmx_oracle_core::model::{EvidenceRecord, Monitor, PolicyId};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::ledger::Ledger;
use crate::scheduler::Scheduler;
use crate::service::{CycleError, OracleService, RegisterError};
use crate::store::EvidenceStore;

/// Handler state: the service and its scheduler.
pub struct AppState<S, L> {
    svc: Arc<OracleService<S, L>>,
    scheduler: Arc<Scheduler<S, L>>,
}

impl<S, L> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            svc: Arc::clone(&self.svc),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

/// Operator API routes with tracing and permissive CORS.
pub fn router<S: EvidenceStore, L: Ledger>(
    svc: Arc<OracleService<S, L>>,
    scheduler: Arc<Scheduler<S, L>>,
) -> Router {
    let state = AppState { svc, scheduler };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/monitors", get(list_monitors::<S, L>).post(register_monitor::<S, L>))
        .route("/v1/monitors/{policy_id}", get(get_monitor::<S, L>))
        .route("/v1/monitors/{policy_id}/cancel", post(cancel_monitor::<S, L>))
        .route("/v1/observations", post(ingest_observations::<S, L>))
        .route("/v1/evidence/{hash}", get(get_evidence::<S, L>))
        .route("/v1/cycles", post(run_cycle::<S, L>))
        .route("/v1/scheduler", get(scheduler_status::<S, L>))
        .route("/v1/scheduler/start", post(scheduler_start::<S, L>))
        .route("/v1/scheduler/stop", post(scheduler_stop::<S, L>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_monitors<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
) -> Result<Json<Vec<Monitor>>, AppError> {
    Ok(Json(st.svc.store().list_monitors().await?))
}

async fn get_monitor<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
    Path(policy_id): Path<PolicyId>,
) -> Result<Json<Monitor>, AppError> {
    st.svc
        .store()
        .get_monitor(policy_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no monitor for policy {policy_id}")))
}

async fn register_monitor<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
    Json(req): Json<RegisterMonitorRequest>,
) -> Result<(StatusCode, Json<Monitor>), AppError> {
    let monitor = st.svc.register_monitor(req).await?;
    Ok((StatusCode::CREATED, Json(monitor)))
}

async fn cancel_monitor<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
    Path(policy_id): Path<PolicyId>,
) -> Result<Json<CancelMonitorResponse>, AppError> {
    if st.svc.store().get_monitor(policy_id).await?.is_none() {
        return Err(AppError::not_found(format!("no monitor for policy {policy_id}")));
    }
    let cancelled = st.svc.cancel_monitor(policy_id).await?;
    Ok(Json(CancelMonitorResponse { policy_id, cancelled }))
}

async fn ingest_observations<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
    Json(req): Json<IngestObservationsRequest>,
) -> Result<Json<IngestObservationsResponse>, AppError> {
    let accepted = st.svc.ingest_observations(&req.observations).await?;
    Ok(Json(IngestObservationsResponse { accepted }))
}

async fn get_evidence<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
    Path(hash): Path<String>,
) -> Result<Json<EvidenceRecord>, AppError> {
    let hash: EvidenceHash = hash
        .parse()
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, format!("bad evidence hash: {e}")))?;
    st.svc
        .store()
        .get_evidence(&hash.to_hex())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no evidence {hash}")))
}

async fn run_cycle<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
) -> Result<Json<CycleReport>, AppError> {
    Ok(Json(st.svc.run_cycle().await?))
}

async fn scheduler_status<S: EvidenceStore, L: Ledger>(State(st): State<AppState<S, L>>) -> Json<SchedulerStatus> {
    Json(SchedulerStatus {
        running: st.scheduler.is_running(),
        interval_ms: st.scheduler.interval().as_millis() as u64,
        cycle_in_progress: st.svc.is_cycle_running(),
        last_cycle: st.svc.last_cycle(),
    })
}

async fn scheduler_start<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
) -> Json<SchedulerTransition> {
    let changed = st.scheduler.start();
    Json(SchedulerTransition { changed, running: true })
}

async fn scheduler_stop<S: EvidenceStore, L: Ledger>(
    State(st): State<AppState<S, L>>,
) -> Json<SchedulerTransition> {
    let changed = st.scheduler.stop();
    Json(SchedulerTransition { changed, running: false })
}

/// Handler error rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            error: anyhow::anyhow!(msg.into()),
        }
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
        }
    }
}

impl From<CycleError> for AppError {
    fn from(e: CycleError) -> Self {
        let status = match e {
            CycleError::AlreadyRunning => StatusCode::CONFLICT,
            CycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: e.into(),
        }
    }
}

impl From<RegisterError> for AppError {
    fn from(e: RegisterError) -> Self {
        let status = match e {
            RegisterError::Invalid(_) => StatusCode::BAD_REQUEST,
            RegisterError::AlreadyReported(_) => StatusCode::CONFLICT,
            RegisterError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.error, "request rejected");
        }
        let body = Json(serde_json::json!({
            "error": self.error.to_string()
        }));
        (self.status, body).into_response()
    }
}
