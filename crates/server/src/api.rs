//! JSON API over the approval service.
//!
//! Endpoints:
//! - `POST /api/v1/requests`                    — submit a leave request
//! - `GET  /api/v1/requests/{id}`               — fetch a request with its chain
//! - `POST /api/v1/requests/{id}/decision`      — approve or reject the current level
//! - `POST /api/v1/requests/{id}/cancel`        — requester cancellation
//! - `GET  /api/v1/requests/{id}/audit`         — audit trail for a request
//! - `GET  /api/v1/chains/{user_id}`            — dry-run chain simulation
//! - `POST /api/v1/escalations/sweep`           — run an escalation pass
//! - `GET  /api/v1/escalations/report`          — pending-by-age report

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use furlo_core::domain::employee::EmployeeId;
use furlo_core::domain::leave::LeaveRequestId;
use furlo_core::errors::{ApplicationError, InterfaceError};
use furlo_core::lifecycle::Decision;
use furlo_db::repositories::SqlLeaveRequestRepository;

use crate::service::{ApprovalService, SubmitRequest};

pub type AppService = ApprovalService<SqlLeaveRequestRepository>;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AppService>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: &'static str,
    pub correlation_id: String,
}

fn error_response(error: ApplicationError) -> (StatusCode, Json<ErrorBody>) {
    let correlation_id = Uuid::new_v4().to_string();
    let interface = error.into_interface(correlation_id.clone());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    info!(
        event_name = "api.request.failed",
        correlation_id = %correlation_id,
        status = status.as_u16(),
        error = %interface,
        "request failed"
    );
    (
        status,
        Json(ErrorBody {
            error: interface.to_string(),
            message: interface.user_message(),
            correlation_id,
        }),
    )
}

pub fn router(service: Arc<AppService>) -> Router {
    Router::new()
        .route("/api/v1/requests", post(submit))
        .route("/api/v1/requests/{id}", get(get_request))
        .route("/api/v1/requests/{id}/decision", post(decide))
        .route("/api/v1/requests/{id}/cancel", post(cancel))
        .route("/api/v1/requests/{id}/audit", get(audit_trail))
        .route("/api/v1/chains/{user_id}", get(simulate_chain))
        .route("/api/v1/escalations/sweep", post(sweep))
        .route("/api/v1/escalations/report", get(report))
        .with_state(ApiState { service })
}

async fn submit(
    State(state): State<ApiState>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<crate::service::SubmitOutcome>), (StatusCode, Json<ErrorBody>)> {
    match state.service.submit(body).await {
        Ok(outcome) => Ok((StatusCode::CREATED, Json(outcome))),
        Err(error) => Err(error_response(error)),
    }
}

async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<furlo_core::domain::leave::LeaveRequest>, (StatusCode, Json<ErrorBody>)> {
    state.service.get(&LeaveRequestId(id)).await.map(Json).map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub level: u32,
    pub approver_id: String,
    pub decision: Decision,
    pub comment: Option<String>,
}

async fn decide(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<furlo_core::domain::leave::LeaveRequest>, (StatusCode, Json<ErrorBody>)> {
    state
        .service
        .decide(
            &LeaveRequestId(id),
            body.level,
            &EmployeeId(body.approver_id),
            body.decision,
            body.comment,
        )
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub requester_id: String,
}

async fn cancel(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<furlo_core::domain::leave::LeaveRequest>, (StatusCode, Json<ErrorBody>)> {
    state
        .service
        .cancel(&LeaveRequestId(id), &EmployeeId(body.requester_id))
        .await
        .map(Json)
        .map_err(error_response)
}

async fn audit_trail(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<furlo_core::audit::AuditEvent>>, (StatusCode, Json<ErrorBody>)> {
    state.service.audit_trail(&LeaveRequestId(id)).await.map(Json).map_err(error_response)
}

async fn simulate_chain(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<furlo_core::domain::leave::ApprovalStep>>, (StatusCode, Json<ErrorBody>)> {
    state
        .service
        .simulate_chain(&EmployeeId(user_id))
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepBody {
    /// Explicit request IDs to escalate, skipping the staleness cutoff.
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

async fn sweep(
    State(state): State<ApiState>,
    body: Option<Json<SweepBody>>,
) -> Result<Json<furlo_core::escalation::SweepReport>, (StatusCode, Json<ErrorBody>)> {
    let ids: Option<Vec<LeaveRequestId>> = body
        .and_then(|Json(body)| body.ids)
        .map(|ids| ids.into_iter().map(LeaveRequestId).collect());
    state
        .service
        .sweep(ids.as_deref(), Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

async fn report(
    State(state): State<ApiState>,
) -> Result<Json<crate::service::PendingAgeReport>, (StatusCode, Json<ErrorBody>)> {
    state.service.pending_report(Utc::now()).await.map(Json).map_err(error_response)
}
