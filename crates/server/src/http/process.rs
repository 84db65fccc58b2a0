use std::time::Instant;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use scanbay_pipeline::PipelineError;
use serde::Serialize;
use tracing::Instrument;

use super::{ApiError, AppState, extract_request_id, json_error, json_error_with_details};

#[derive(Debug, Serialize)]
pub(super) struct ProcessImageResponse {
    #[serde(rename = "processedImageUrl")]
    processed_image_url: String,
    timestamp: u64,
}

pub(super) async fn process_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ProcessImageResponse>, ApiError> {
    let request_id = extract_request_id(&headers);

    let mut image: Option<(String, axum::body::Bytes)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.bin").to_string();
        let bytes = field.bytes().await.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                "could not read image field",
            )
        })?;
        image = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = image else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ERR_NO_IMAGE",
            "No image file uploaded",
        ));
    };

    let staged = state
        .staging
        .stage(&file_name, &bytes)
        .await
        .map_err(|err| pipeline_error_response(&err))?;

    let span = tracing::info_span!(
        "image.process",
        request_id = %request_id,
        original = %staged.original_filename,
        payload_bytes = bytes.len(),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let outcome = async {
        let result = state.analyzer.analyze(&staged.path).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);
        match &result {
            Ok(entry) => {
                tracing::Span::current().record("outcome", "ok");
                tracing::info!(artifact = %entry.file_name, "image processed");
            }
            Err(err) => {
                tracing::Span::current().record("outcome", outcome_label(err));
                tracing::error!(error = %err, "image processing failed");
            }
        }
        result
    }
    .instrument(span)
    .await;

    crate::metrics::observe_analysis(
        outcome.as_ref().map_or_else(outcome_label, |_| "ok"),
        started.elapsed(),
    );

    let entry = outcome.map_err(|err| pipeline_error_response(&err))?;

    Ok(Json(ProcessImageResponse {
        processed_image_url: format!("/artifacts/{}", entry.file_name),
        timestamp: entry.timestamp_ms,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct ProcessedImage {
    url: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct ProcessedImagesResponse {
    images: Vec<ProcessedImage>,
}

pub(super) async fn get_processed_images(
    State(state): State<AppState>,
) -> Result<Json<ProcessedImagesResponse>, ApiError> {
    let entries = state.analyzer.artifacts().list().await.map_err(|err| {
        tracing::error!(error = %err, "artifact listing failed");
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            "failed to list processed images",
        )
    })?;

    Ok(Json(ProcessedImagesResponse {
        images: entries
            .into_iter()
            .map(|entry| ProcessedImage {
                url: format!("/artifacts/{}", entry.file_name),
                timestamp: entry.timestamp_ms,
            })
            .collect(),
    }))
}

pub(super) async fn get_artifact(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || {
        json_error(
            StatusCode::NOT_FOUND,
            "ERR_ARTIFACT_NOT_FOUND",
            "artifact not found",
        )
    };

    // Only names matching the artifact convention resolve; everything else
    // stays inside the store root.
    let path = state
        .analyzer
        .artifacts()
        .path_of(&file_name)
        .ok_or_else(not_found)?;

    let bytes = tokio::fs::read(&path).await.map_err(|_| not_found())?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

fn outcome_label(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::Validation(_) => "validation_error",
        PipelineError::Configuration(_) => "configuration_error",
        PipelineError::Processing { .. } => "processing_error",
        PipelineError::Timeout { .. } => "timeout",
        PipelineError::Io(_) => "io_error",
    }
}

fn pipeline_error_response(err: &PipelineError) -> ApiError {
    match err {
        PipelineError::Validation(reason) => {
            json_error(StatusCode::BAD_REQUEST, "ERR_NO_IMAGE", reason.clone())
        }
        PipelineError::Configuration(reason) => {
            // Operator-fixable; loud in the logs, generic to the caller.
            tracing::error!(reason = %reason, "analyzer configuration error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_ANALYZER_UNAVAILABLE",
                "analyzer is not available",
            )
        }
        PipelineError::Processing { message, detail } => json_error_with_details(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_ANALYSIS_FAILED",
            "Failed to process image",
            match detail {
                Some(detail) if !detail.trim().is_empty() => {
                    format!("{}: {}", message, detail.trim())
                }
                _ => message.clone(),
            },
        ),
        PipelineError::Timeout { elapsed } => json_error_with_details(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_ANALYSIS_TIMEOUT",
            "Image analysis timed out",
            format!("analysis exceeded {}ms", elapsed.as_millis()),
        ),
        PipelineError::Io(err) => {
            tracing::error!(error = %err, "pipeline i/o error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "internal server error",
            )
        }
    }
}
