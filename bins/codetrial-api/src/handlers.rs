// HTTP route handlers for the Codetrial API

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use codetrial_common::catalog::NewTest;
use codetrial_common::languages::LanguageLimits;
use codetrial_common::types::{Difficulty, Language, SubmissionId, SubmissionState, ANONYMOUS_SESSION};
use codetrial_engine::{metrics, NewSubmission, ServiceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

/// Seconds a client should wait after a 429
const RETRY_AFTER_SECS: u64 = 5;

/// Error surfaced to HTTP clients as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    BadRequest(String),
    NotFound(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => error_body(StatusCode::NOT_FOUND, message),
            ApiError::Service(err) => match err {
                ServiceError::SchedulerCapacityExceeded { .. } => {
                    let mut response = error_body(StatusCode::TOO_MANY_REQUESTS, err.to_string());
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, RETRY_AFTER_SECS.into());
                    response
                }
                ServiceError::UnsupportedLanguage(_) | ServiceError::EmptyTestSet(_) => {
                    error_body(StatusCode::BAD_REQUEST, err.to_string())
                }
                ServiceError::NotFound(_) => error_body(StatusCode::NOT_FOUND, err.to_string()),
                ServiceError::AlreadyFinished { .. } => error_body(StatusCode::CONFLICT, err.to_string()),
                ServiceError::InvalidTransition(_) => {
                    error!(error = %err, "Internal error while handling request");
                    error_body(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                }
            },
        }
    }
}

fn parse_submission_id(raw: &str) -> Result<SubmissionId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid submission ID format".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub source_code: String,
    pub language: String,
    pub test_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub submission_id: SubmissionId,
    pub state: SubmissionState,
}

/// Body session id, then the session header, then the anonymous session
fn resolve_session(body: Option<String>, headers: &HeaderMap) -> String {
    body.filter(|s| !s.trim().is_empty())
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|s| !s.trim().is_empty())
        })
        .unwrap_or_else(|| ANONYMOUS_SESSION.to_string())
}

/// POST /submissions - Queue a submission against a catalog test
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let language: Language = payload
        .language
        .parse()
        .map_err(|_| ServiceError::UnsupportedLanguage(payload.language.clone()))?;

    let (test_cases, duration_minutes) = {
        let catalog = state.catalog.read();
        let test = catalog
            .get(&payload.test_id)
            .ok_or_else(|| ApiError::NotFound(format!("test '{}' not found", payload.test_id)))?;
        (test.test_cases.clone(), test.duration_minutes)
    };

    let session_id = resolve_session(payload.session_id, &headers);

    let handle = state.scheduler.submit(NewSubmission {
        session_id: session_id.clone(),
        language,
        source_code: payload.source_code,
        test_id: payload.test_id,
        test_cases,
        deadline: Some(Duration::from_secs(u64::from(duration_minutes) * 60)),
    })?;

    info!(
        submission_id = %handle.submission_id,
        session_id = %session_id,
        language = %language,
        "Submission accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            submission_id: handle.submission_id,
            state: handle.state,
        }),
    ))
}

/// GET /submissions/{id} - Final result, or progress while still in flight
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_submission_id(&id)?;
    let view = state
        .scheduler
        .status(id)
        .ok_or(ServiceError::NotFound(id))?;

    match view.result {
        Some(result) => Ok((StatusCode::OK, Json(result)).into_response()),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "submission_id": view.submission_id,
                "state": view.state,
                "completed_cases": view.completed_cases,
                "total_cases": view.total_cases,
            })),
        )
            .into_response()),
    }
}

/// DELETE /submissions/{id} - Cancel a queued or running submission
pub async fn cancel_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_submission_id(&id)?;
    let submission_state = state.scheduler.cancel(id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "submission_id": id,
            "state": submission_state,
        })),
    ))
}

/// DELETE /sessions/{session_id}/submissions - Client left; drop its work
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.scheduler.cancel_session(&session_id);
    (StatusCode::OK, Json(serde_json::json!({ "cancelled": cancelled })))
}

#[derive(Debug, Serialize)]
pub struct TestSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub function_name: String,
    pub duration_minutes: u32,
    pub difficulty: Difficulty,
    pub case_count: usize,
}

/// GET /tests - Catalog overview
pub async fn list_tests(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = state.catalog.read();
    let tests: Vec<TestSummary> = catalog
        .list()
        .map(|t| TestSummary {
            id: t.id.clone(),
            title: t.title.clone(),
            description: t.description.clone(),
            function_name: t.function_name.clone(),
            duration_minutes: t.duration_minutes,
            difficulty: t.difficulty,
            case_count: t.test_cases.len(),
        })
        .collect();

    Json(serde_json::json!({ "tests": tests }))
}

/// GET /tests/{id}
pub async fn get_test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.catalog.read();
    let test = catalog
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("test '{}' not found", id)))?;
    Ok(Json(test))
}

/// POST /tests - Create a test from the dashboard form
pub async fn create_test(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewTest>,
) -> Result<impl IntoResponse, ApiError> {
    let test = payload.validate().map_err(|e| {
        warn!(error = %e, "Rejected test definition");
        ApiError::BadRequest(e.to_string())
    })?;

    state
        .catalog
        .write()
        .insert(test.clone())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(test_id = %test.id, title = %test.title, cases = test.test_cases.len(), "Test created");
    Ok((StatusCode::CREATED, Json(test)))
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub name: Language,
    pub version: String,
    pub limits: LanguageLimits,
    pub template: String,
}

/// GET /languages - Enabled languages with starter templates
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<LanguageInfo> = state
        .registry
        .configs()
        .map(|c| LanguageInfo {
            name: c.name,
            version: c.version.clone(),
            limits: c.limits,
            template: c.template.clone(),
        })
        .collect();

    Json(serde_json::json!({ "languages": languages }))
}

/// GET /status - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "runner": state.scheduler.evaluator().runner_name(),
            "queued": state.scheduler.queued_count(),
            "active": state.scheduler.active_count(),
            "time": chrono::Utc::now(),
        })),
    )
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn export_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}
