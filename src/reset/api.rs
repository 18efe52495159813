use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;

use super::gate::{AdminGate, GateRejection};
use super::models::{ResetTriggerResponse, StartOutcome};
use super::orchestrator::{DEFAULT_HISTORY_LIMIT, ResetOrchestrator};
use crate::errors::ResetError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: ResetOrchestrator,
    pub gate: AdminGate,
    /// When false every reset route answers 404.
    pub reset_enabled: bool,
}

pub type SharedState = Arc<AppState>;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    TooManyRequests { retry_after_secs: u64 },
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::TooManyRequests { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Too many reset requests; retry in {} seconds", retry_after_secs),
                Some(retry_after_secs),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };
        let mut response = (status, Json(serde_json::json!({"error": message}))).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<ResetError> for ApiError {
    fn from(err: ResetError) -> Self {
        match err {
            ResetError::JobNotFound { .. } => ApiError::NotFound(err.to_string()),
            other => {
                tracing::error!(error = %other, "reset request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<GateRejection> for ApiError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Forbidden => ApiError::Forbidden("Invalid or missing admin token".into()),
            GateRejection::MissingConfirmation => ApiError::BadRequest(
                "Missing confirmation: set X-Confirm-Reset: DELETE".into(),
            ),
            GateRejection::RateLimited { retry_after_secs } => {
                ApiError::TooManyRequests { retry_after_secs }
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Reset routes. The enabled check wraps whole routes, so a disabled
/// subsystem answers 404 for every method, not 405 for unknown ones.
pub fn reset_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/admin/reset", post(trigger_reset))
        .route("/api/admin/reset/active", get(list_active))
        .route("/api/admin/reset/history", get(list_history))
        .route("/api/admin/reset/ledger/verify", get(verify_ledger))
        .route("/api/admin/reset/{job_id}", get(get_reset_status))
        .route("/api/admin/reset/{job_id}/stream", get(stream_progress))
        .layer(middleware::from_fn_with_state(state.clone(), require_enabled))
        .with_state(state)
}

/// Hide the subsystem entirely unless it is switched on.
async fn require_enabled(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    if !state.reset_enabled {
        return ApiError::NotFound("Not found".into()).into_response();
    }
    next.run(request).await
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn trigger_reset(
    State(state): State<SharedState>,
    request: Request,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = state.gate.client_ip(request.headers(), peer);
    let identity = match state.gate.check_trigger(request.headers(), ip) {
        Ok(identity) => identity,
        Err(rejection) => {
            tracing::warn!(ip_address = %ip, ?rejection, "factory reset request rejected");
            return Err(rejection.into());
        }
    };

    match state
        .orchestrator
        .start(&identity.started_by, &identity.ip_address)
        .await?
    {
        StartOutcome::Started(audit) => Ok((
            StatusCode::ACCEPTED,
            Json(ResetTriggerResponse::accepted(&audit.job_id)),
        )
            .into_response()),
        StartOutcome::Conflict(active) => Ok((
            StatusCode::CONFLICT,
            Json(ResetTriggerResponse::conflict(&active.job_id)),
        )
            .into_response()),
    }
}

async fn get_reset_status(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.check_token(&headers)?;
    let audit = state.orchestrator.get_reset_audit_by_job_id(&job_id).await?;
    Ok(Json(audit))
}

async fn stream_progress(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.check_token(&headers)?;
    let subscription = state.orchestrator.subscribe(&job_id).await?;
    let events = subscription
        .into_stream(state.orchestrator.stream_timeout())
        .map(|event| Ok::<_, Infallible>(event.to_sse()));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn list_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.check_token(&headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state.orchestrator.get_reset_history(limit).await?;
    Ok(Json(history))
}

async fn list_active(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.check_token(&headers)?;
    let active = state.orchestrator.get_active_jobs().await?;
    Ok(Json(active))
}

async fn verify_ledger(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.check_token(&headers)?;
    let report = state.orchestrator.verify_ledger().await?;
    if !report.valid {
        tracing::error!(broken_at_seq = ?report.broken_at_seq, reason = ?report.reason, "reset ledger failed verification");
    }
    Ok(Json(report))
}

// ── Tests ─────────────────────────────────────────────────────────────
