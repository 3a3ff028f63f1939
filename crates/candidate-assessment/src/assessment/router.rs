use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::domain::{PersonalData, PostingId, Response, SessionId, UploadFile, UploadUrls};
use super::gateway::{AssessmentGateway, GatewayError, SuspiciousSignal};
use super::ledger::AssessmentLedger;

/// Router builder exposing the ledger endpoints over HTTP.
pub fn assessment_router(ledger: Arc<AssessmentLedger>) -> Router {
    Router::new()
        .route(
            "/api/v1/assessment/postings/:posting_id",
            get(posting_handler),
        )
        .route(
            "/api/v1/assessment/postings/:posting_id/sessions",
            post(create_session_handler),
        )
        .route(
            "/api/v1/assessment/sessions/:session_id",
            get(session_status_handler),
        )
        .route(
            "/api/v1/assessment/sessions/:session_id/responses",
            post(record_response_handler),
        )
        .route(
            "/api/v1/assessment/sessions/:session_id/flags",
            post(flag_handler),
        )
        .route(
            "/api/v1/assessment/sessions/:session_id/finalize",
            post(finalize_handler),
        )
        .route("/api/v1/assessment/uploads", post(upload_handler))
        .with_state(ledger)
}

fn error_response(error: GatewayError) -> HttpResponse {
    let status = match error {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Rejected(_) => StatusCode::CONFLICT,
        GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn posting_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(posting_id): Path<String>,
) -> HttpResponse {
    let id = PostingId(posting_id);
    match ledger.fetch_posting(&id) {
        Ok(posting) if posting.is_active() => (StatusCode::OK, axum::Json(posting)).into_response(),
        Ok(posting) => {
            let payload = json!({
                "error": format!("posting {} is not accepting candidates", id.0),
                "status": posting.status.label(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_session_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(posting_id): Path<String>,
    axum::Json(personal_data): axum::Json<PersonalData>,
) -> HttpResponse {
    match ledger.create_session(&PostingId(posting_id), &personal_data) {
        Ok(ticket) => (StatusCode::CREATED, axum::Json(ticket)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn record_response_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(session_id): Path<String>,
    axum::Json(response): axum::Json<Response>,
) -> HttpResponse {
    match ledger.record_response(&SessionId(session_id), &response) {
        Ok(()) => {
            let payload = json!({
                "status": "recorded",
                "question_index": response.question_index,
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn flag_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(session_id): Path<String>,
    axum::Json(signal): axum::Json<SuspiciousSignal>,
) -> HttpResponse {
    match ledger.flag_suspicious(&SessionId(session_id), &signal) {
        Ok(()) => {
            let payload = json!({
                "status": "flagged",
                "reason": signal.reason.label(),
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn finalize_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(session_id): Path<String>,
    axum::Json(upload_urls): axum::Json<UploadUrls>,
) -> HttpResponse {
    match ledger.finalize(&SessionId(session_id), &upload_urls) {
        Ok(ack) => (StatusCode::OK, axum::Json(ack)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn upload_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    axum::Json(file): axum::Json<UploadFile>,
) -> HttpResponse {
    match ledger.upload(&file) {
        Ok(url) => (StatusCode::CREATED, axum::Json(json!({ "url": url }))).into_response(),
        Err(GatewayError::Rejected(reason)) => {
            let payload = json!({
                "error": reason,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn session_status_handler(
    State(ledger): State<Arc<AssessmentLedger>>,
    Path(session_id): Path<String>,
) -> HttpResponse {
    match ledger.session_status(&SessionId(session_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}
