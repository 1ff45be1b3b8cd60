//! REST surface
//!
//! Every response uses the `{success, data}` envelope; failures carry
//! `{success: false, message, code}` with a status picked from the error
//! kind. Handlers only translate HTTP shapes and delegate to [`AppState`].

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use super::state::AppState;
use crate::polls::{ErrorKind, NewPoll, PollError, SubmitVote};
use crate::sessions::NewSession;

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            message: None,
            data,
        }),
    )
        .into_response()
}

/// A domain error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub PollError);

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(PollError::Validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// Status code for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(err.kind());
        if err.kind() == ErrorKind::Unavailable {
            error!(code = err.code(), error = ?err, "Request failed");
        } else {
            debug!(code = err.code(), status = status.as_u16(), "Request rejected: {}", err);
        }
        let body = json!({
            "success": false,
            "message": err.to_string(),
            "code": err.code(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError(PollError::Validation(message.to_string())))
}

// ============================================================================
// Router
// ============================================================================

/// `/api/v1` routes plus `/health` and `/metrics`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/kick", post(kick))
        .route("/api/v1/sessions/{session_id}/state", get(session_state))
        .route(
            "/api/v1/sessions/{session_id}/participants",
            get(participants),
        )
        .route("/api/v1/polls", post(create_poll))
        .route("/api/v1/polls/active", get(active_poll))
        .route("/api/v1/polls/can-create", get(can_create))
        .route("/api/v1/polls/history", get(history))
        .route("/api/v1/polls/{poll_id}/start", post(start_poll))
        .route("/api/v1/polls/{poll_id}/end", post(end_poll))
        .route("/api/v1/polls/{poll_id}/results", get(poll_results))
        .route("/api/v1/votes", post(submit_vote))
        .fallback(not_found)
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "message": "Route not found"})),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "timestamp": Utc::now().to_rfc3339()}))
}

/// Prometheus text exposition
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

// ============================================================================
// Sessions
// ============================================================================

async fn create_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSession>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let session = state.create_session(&request).await?;
    Ok(ok(
        StatusCode::CREATED,
        json!({"sessionId": session.session_id, "session": session}),
    ))
}

async fn session_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let snapshot = state.session_state(&session_id).await?;
    Ok(ok(StatusCode::OK, snapshot))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsQuery {
    poll_id: Option<String>,
}

async fn participants(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<ParticipantsQuery>,
) -> ApiResult {
    let participants = state
        .participants(&session_id, query.poll_id.as_deref())
        .await?;
    Ok(ok(StatusCode::OK, json!({ "participants": participants })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct KickBody {
    teacher_session_id: Option<String>,
    target_session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KickQuery {
    teacher_session_id: Option<String>,
}

async fn kick(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KickQuery>,
    payload: Result<Json<KickBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let moderator = required(
        body.teacher_session_id.or(query.teacher_session_id),
        "Teacher session ID is required",
    )?;
    let target = required(body.target_session_id, "Target session ID is required")?;

    let session = state.kick(&moderator, &target).await?;
    Ok((
        StatusCode::OK,
        Json(Envelope {
            success: true,
            message: Some("Student kicked successfully"),
            data: json!({ "session": session }),
        }),
    )
        .into_response())
}

// ============================================================================
// Polls
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePollBody {
    #[serde(flatten)]
    poll: NewPoll,
    #[serde(default)]
    session_id: Option<String>,
}

async fn create_poll(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePollBody>, JsonRejection>,
) -> ApiResult {
    let Json(CreatePollBody {
        mut poll,
        session_id,
    }) = payload?;
    if let Some(session_id) = session_id.filter(|id| !id.trim().is_empty()) {
        poll.created_by = session_id;
    }
    let poll = state.create_poll(&poll).await?;
    Ok(ok(StatusCode::CREATED, json!({ "poll": poll })))
}

/// Body of start/end requests
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModeratorBody {
    session_id: Option<String>,
    teacher_session_id: Option<String>,
}

impl ModeratorBody {
    fn session_id(self) -> Result<String, ApiError> {
        required(
            self.session_id.or(self.teacher_session_id),
            "Teacher session ID is required",
        )
    }
}

async fn start_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    payload: Result<Json<ModeratorBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let poll = state.start_poll(&poll_id, &body.session_id()?).await?;
    Ok(ok(
        StatusCode::OK,
        json!({
            "startTime": poll.start_time,
            "duration": poll.duration,
            "poll": poll,
        }),
    ))
}

async fn end_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    payload: Result<Json<ModeratorBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let ended = state.end_poll(&poll_id, &body.session_id()?).await?;
    Ok(ok(StatusCode::OK, ended))
}

async fn active_poll(State(state): State<Arc<AppState>>) -> ApiResult {
    let data = match state.active_poll().await? {
        Some(active) => json!({
            "poll": active.poll,
            "remainingTime": active.remaining_time,
        }),
        None => json!({ "poll": null }),
    };
    Ok(ok(StatusCode::OK, data))
}

async fn can_create(State(state): State<Arc<AppState>>) -> ApiResult {
    let can_create = state.can_create_new_poll().await?;
    Ok(ok(StatusCode::OK, json!({ "canCreate": can_create })))
}

async fn poll_results(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
) -> ApiResult {
    let results = state.votes.get_poll_results(&poll_id).await?;
    Ok(ok(StatusCode::OK, json!({ "results": results })))
}

/// Lenient paging; unparsable values fall back to defaults
#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    page: Option<String>,
    limit: Option<String>,
}

fn lenient_int(value: Option<&str>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let page = lenient_int(query.page.as_deref());
    let limit = lenient_int(query.limit.as_deref());
    let history = state.lifecycle.poll_history(page, limit).await?;
    Ok(ok(
        StatusCode::OK,
        json!({
            "history": history,
            "pagination": { "page": page.max(1), "count": history.len() },
        }),
    ))
}

// ============================================================================
// Votes
// ============================================================================

async fn submit_vote(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitVote>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let receipt = state.submit_vote(request).await?;
    Ok(ok(StatusCode::CREATED, receipt))
}
