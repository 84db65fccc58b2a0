use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use scanbay_store::{NewResult, ResultRecord};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, extract_identity, json_error, store_error_response};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct SaveResultRequest {
    user_id: i64,
    prediction: String,
    confidence: f64,
    timestamp: i64,
    #[serde(default)]
    original: Option<String>,
    #[serde(default)]
    binary: Option<String>,
    #[serde(default)]
    contours: Option<String>,
    #[serde(default)]
    overlay: Option<String>,
    #[serde(default)]
    is_normal: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct SaveResultResponse {
    success: bool,
    message: &'static str,
    result_id: i64,
}

pub(super) async fn save_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<SaveResultRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SaveResultResponse>), ApiError> {
    scanbay_auth::validate_api_key(&headers, &state.config.results_api_key)
        .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.code, err.message))?;

    let Json(req) = req.map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            "missing or malformed result fields",
        )
    })?;

    if !(0.0..=1.0).contains(&req.confidence) {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_CONFIDENCE",
            format!("confidence must be within [0, 1], got {}", req.confidence),
        ));
    }

    let result_id = state
        .store
        .create_result(&NewResult {
            user_id: req.user_id,
            prediction: &req.prediction,
            confidence: req.confidence,
            timestamp: req.timestamp,
            original: req.original.as_deref(),
            binary: req.binary.as_deref(),
            contours: req.contours.as_deref(),
            overlay: req.overlay.as_deref(),
            is_normal: req.is_normal,
        })
        .await
        .map_err(store_error_response)?;

    crate::metrics::inc_result_saved();
    tracing::info!(result_id, user_id = req.user_id, "result saved");

    Ok((
        StatusCode::CREATED,
        Json(SaveResultResponse {
            success: true,
            message: "Result saved successfully",
            result_id,
        }),
    ))
}

pub(super) async fn list_results(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ResultRecord>>, ApiError> {
    let identity = extract_identity(&state, &headers)?;

    let results = state
        .store
        .results_for_user(identity.user_id)
        .await
        .map_err(store_error_response)?;

    Ok(Json(results))
}

pub(super) async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ResultRecord>, ApiError> {
    let identity = extract_identity(&state, &headers)?;
    let id = parse_result_id(&id)?;

    let record = state
        .store
        .result_by_id(id)
        .await
        .map_err(store_error_response)?
        .ok_or_else(|| {
            json_error(
                StatusCode::NOT_FOUND,
                "ERR_RESULT_NOT_FOUND",
                "Result not found",
            )
        })?;

    // Ownership check: a mismatch is reported without confirming anything
    // about the row beyond "not yours".
    if record.user_id != identity.user_id {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "ERR_NOT_AUTHORIZED",
            "Not authorized to access this result",
        ));
    }

    Ok(Json(record))
}

#[derive(Debug, Serialize)]
pub(super) struct DeleteResultResponse {
    success: bool,
    message: &'static str,
}

pub(super) async fn delete_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteResultResponse>, ApiError> {
    let identity = extract_identity(&state, &headers)?;
    let id = parse_result_id(&id)?;

    let removed = state
        .store
        .delete_result(id, identity.user_id)
        .await
        .map_err(store_error_response)?;

    // Zero rows removed covers both "absent" and "owned by someone else";
    // the caller cannot tell which.
    if !removed {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "ERR_RESULT_NOT_FOUND",
            "Result not found or not authorized to delete",
        ));
    }

    tracing::info!(result_id = id, user = %identity.username, "result deleted");

    Ok(Json(DeleteResultResponse {
        success: true,
        message: "Result deleted successfully",
    }))
}

fn parse_result_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>().map_err(|_| {
        json_error(
            StatusCode::NOT_FOUND,
            "ERR_RESULT_NOT_FOUND",
            "Result not found",
        )
    })
}
