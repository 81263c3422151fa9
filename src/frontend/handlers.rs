use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::correlation::{CountReply, CountRequest};
use crate::frontend::AppState;
use crate::frontend::upload::{Upload, is_plain_file_name};

#[derive(Debug, Deserialize)]
pub struct CountParams {
    pub length: Option<String>,
    pub file_name: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Message shown for a worker error code.
pub fn worker_error_message(code: u16) -> &'static str {
    match code {
        400 => "File format is not supported",
        // the upload was removed before the worker fetched it
        404 => "Error processing file",
        _ => "Unknown error",
    }
}

/// `POST /count?length=<n>&file_name=<name>` with the artifact as the body.
pub async fn count(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "File is too large");
        }
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };

    let Some(length) = params
        .length
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Length is not provided or not a number");
    };
    if length < 1 {
        return error_response(StatusCode::BAD_REQUEST, "Length must be greater than 0");
    }
    let Ok(length) = u32::try_from(length) else {
        return error_response(StatusCode::BAD_REQUEST, "Length is not provided or not a number");
    };
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "File is not provided");
    }

    let original_name = params.file_name.unwrap_or_default();
    let upload = match Upload::save(&state.upload_dir, &original_name, &body).await {
        Ok(upload) => upload,
        Err(e) => {
            error!(error = %e, "Failed to store upload");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store file");
        }
    };

    let request = CountRequest {
        length,
        file_name: upload.file_name().to_string(),
    };
    let task_id = match state.communicator.send(&request).await {
        Ok(task_id) => task_id,
        Err(e) => {
            error!(error = %e, "Failed to dispatch count request");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Worker queue is unavailable");
        }
    };
    info!(task_id = %task_id, length, file = %upload.file_name(), "Dispatched count request");

    let reply = state.communicator.recv(&task_id, state.request_timeout).await;
    upload.remove().await;

    let Some(reply) = reply else {
        return error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "Timeout waiting for response from worker",
        );
    };
    match serde_json::from_value::<CountReply>(reply) {
        Ok(CountReply::Count(result)) => {
            (StatusCode::OK, Json(json!({ "count": result.count, "length": length })))
                .into_response()
        }
        Ok(CountReply::Error(reply)) => {
            warn!(task_id = %task_id, code = reply.error.code, message = %reply.error.message, "Worker reported an error");
            error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                worker_error_message(reply.error.code),
            )
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Unreadable worker reply");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, worker_error_message(0))
        }
    }
}

/// `GET /file/{file_name}`: the artifact download used by the workers.
pub async fn get_file(State(state): State<AppState>, Path(file_name): Path<String>) -> Response {
    if !is_plain_file_name(&file_name) {
        warn!(file = %file_name, "Rejected artifact name");
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(state.upload_dir.join(&file_name)).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
