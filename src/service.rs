//! HTTP ingress for the job log.
//!
//! This module contains the `AppState` shared by all handlers, the axum router,
//! and the mapping from domain errors to HTTP responses. Handlers validate inbound
//! events at this boundary and hand them to the writer task; queries go straight
//! to the read index.
//!
//! # Endpoints
//!
//! - `POST /log` - Record one event (JSON object with `job_id` and `time`)
//! - `GET /get_job_ids` - List known job identifiers
//! - `GET /get_data/{job_id}` - Records of one job, in arrival order
//! - `GET /jobs` - Per-job record counts
//! - `GET /ping` - Liveness, returns the server time
//! - `GET /health` - Returns 200 if the server is running

use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use serde_json::{Map, Value, json};

use crate::error::Error;
use crate::reader::ReadIndex;
use crate::types::{EventRecord, JOB_ID_FIELD, TIME_FIELD};
use crate::writer::WriterHandle;

const MSG_INVALID_BODY: &str = "No data received or invalid data, please check!";
const MSG_MISSING_JOB_ID: &str = "No job_id received, please check!";
const MSG_MISSING_TIME: &str = "No timestamp received, please check!";
const MSG_RECEIVED: &str = "Data received!";

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Handle for submitting events to the writer task.
    pub writer: WriterHandle,
    /// Shared read-only view of the in-memory job log.
    pub read_index: ReadIndex,
}

impl AppState {
    /// Create a new `AppState` from the writer handle and read index.
    pub fn new(writer: WriterHandle, read_index: ReadIndex) -> Self {
        Self { writer, read_index }
    }
}

/// Builds the axum router with all ingress endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/log", post(log_handler))
        .route("/get_job_ids", get(job_ids_handler))
        .route("/get_data/{job_id}", get(job_data_handler))
        .route("/jobs", get(jobs_handler))
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `POST /log`: validate the body and record it.
///
/// The success response is only sent once the event is durable and indexed.
async fn log_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(rejection) => return rejection,
    };

    match state.writer.record(event).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": MSG_RECEIVED }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Decode a request body into an [`EventRecord`], or the 400 response to send.
///
/// Keeps the specific messages workers rely on for an empty/invalid body, a
/// missing `job_id` and a missing `time`.
#[allow(clippy::result_large_err)]
fn parse_event(body: &[u8]) -> Result<EventRecord, Response> {
    let map = match serde_json::from_slice::<Map<String, Value>>(body) {
        Ok(map) if !map.is_empty() => map,
        _ => return Err(reject("invalid_body", MSG_INVALID_BODY.to_string())),
    };

    if map.get(JOB_ID_FIELD).is_none_or(Value::is_null) {
        return Err(reject("missing_job_id", MSG_MISSING_JOB_ID.to_string()));
    }
    if map.get(TIME_FIELD).is_none_or(Value::is_null) {
        return Err(reject("missing_time", MSG_MISSING_TIME.to_string()));
    }

    EventRecord::try_from(map).map_err(|e| reject("invalid_record", e.to_string()))
}

fn reject(reason: &'static str, message: String) -> Response {
    counter!("jataka_events_rejected_total", "reason" => reason).increment(1);
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

/// `GET /get_job_ids`
async fn job_ids_handler(State(state): State<AppState>) -> Json<Value> {
    counter!("jataka_reads_total", "route" => "get_job_ids").increment(1);
    Json(json!({ "job_ids": state.read_index.job_ids() }))
}

/// `GET /get_data/{job_id}`: an unknown job yields an empty `data` array.
async fn job_data_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<Value> {
    counter!("jataka_reads_total", "route" => "get_data").increment(1);
    Json(json!({ "data": state.read_index.records_for(&job_id) }))
}

/// `GET /jobs`
async fn jobs_handler(State(state): State<AppState>) -> Json<Value> {
    counter!("jataka_reads_total", "route" => "jobs").increment(1);
    Json(json!({ "jobs": state.read_index.list_jobs() }))
}

/// `GET /ping`: server time as Unix epoch milliseconds.
async fn ping_handler() -> Json<Value> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Json(json!({ "time": now_ms }))
}

/// `GET /health`
async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Map a domain error to an HTTP status code.
pub fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        Error::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
        Error::Io(_)
        | Error::Serialization(_)
        | Error::CorruptRecord { .. }
        | Error::StoreFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = error_status(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "record failed");
    }
    (status, Json(json!({ "message": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_invalid_record() {
        let err = Error::InvalidRecord("missing time".into());
        assert_eq!(error_status(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_status_store_closed() {
        assert_eq!(
            error_status(&Error::StoreClosed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn error_status_io_and_store_failed() {
        let io = Error::Io(std::io::Error::other("disk gone"));
        assert_eq!(error_status(&io), StatusCode::INTERNAL_SERVER_ERROR);
        let failed = Error::StoreFailed("disk gone".into());
        assert_eq!(error_status(&failed), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn parse_event_accepts_valid_body() {
        let event = parse_event(br#"{"job_id":"J1","time":"t0","acc":0.9}"#)
            .unwrap_or_else(|_| panic!("valid body rejected"));
        assert_eq!(event.job_id(), "J1");
        assert_eq!(event.field("acc"), Some(&json!(0.9)));
    }

    #[test]
    fn parse_event_rejects_empty_object_and_garbage() {
        for body in [&b"{}"[..], b"", b"not json", b"[1,2]"] {
            let response = parse_event(body).expect_err("body should be rejected");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn parse_event_rejects_missing_fields() {
        let response = parse_event(br#"{"time":"t0"}"#).expect_err("missing job_id");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = parse_event(br#"{"job_id":"J1","time":null}"#).expect_err("null time");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = parse_event(br#"{"job_id":"","time":"t0"}"#).expect_err("empty job_id");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
