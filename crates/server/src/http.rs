use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use scanbay_auth::{Identity, TokenAuthenticator};
use scanbay_pipeline::{Analyzer, ArtifactStore, StagingArea, SystemRunner};
use scanbay_store::{ResultStore, StoreError};
use serde::Serialize;
use ulid::Ulid;

use crate::config::{ServerConfig, StartupError};

mod process;
mod results;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: ResultStore,
    staging: StagingArea,
    analyzer: Arc<Analyzer>,
    gate: TokenAuthenticator,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<(Router, AppState), StartupError> {
    let gate = TokenAuthenticator::new(&config.jwt_secret).map_err(|err| StartupError {
        code: err.code,
        message: err.message,
    })?;

    let store = ResultStore::connect_and_migrate(
        &config.db_path,
        Duration::from_millis(config.store_write_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize result store: {}", err),
    })?;

    let staging = StagingArea::new(&config.upload_dir);
    let analyzer = Arc::new(Analyzer::new(
        config.python_bin.as_str(),
        &config.analyzer_script,
        ArtifactStore::new(&config.artifact_dir),
        Arc::new(SystemRunner),
        Duration::from_millis(config.analysis_timeout_ms),
    ));

    let max_upload_bytes = config.max_upload_bytes;
    let state = AppState {
        config,
        store,
        staging,
        analyzer,
        gate,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/process-image", post(process::process_image))
        .route("/get-processed-images", get(process::get_processed_images))
        .route("/artifacts/{file_name}", get(process::get_artifact))
        .route("/results/save", post(results::save_result))
        .route("/results", get(results::list_results))
        .route(
            "/results/{id}",
            get(results::get_result).delete(results::delete_result),
        )
        .layer(axum::middleware::from_fn(track_http))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state.clone());

    Ok((app, state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    checks.insert("store", state.store.ping().await.is_ok());
    checks.insert(
        "staging",
        tokio::fs::create_dir_all(state.staging.root()).await.is_ok(),
    );
    checks.insert(
        "artifacts",
        tokio::fs::create_dir_all(state.analyzer.artifacts().root())
            .await
            .is_ok(),
    );

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn track_http(req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(req).await;

    crate::metrics::observe_http_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn json_error(status: StatusCode, code: &'static str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code,
            details: None,
        }),
    )
}

fn json_error_with_details(
    status: StatusCode,
    code: &'static str,
    error: impl Into<String>,
    details: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code,
            details: Some(details.into()),
        }),
    )
}

fn extract_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    state
        .gate
        .authenticate(headers)
        .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.code, err.message))
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn store_error_response(err: StoreError) -> ApiError {
    match err {
        StoreError::InvalidResult(reason) => {
            json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", reason)
        }
        StoreError::UnknownUser => json_error(
            StatusCode::BAD_REQUEST,
            "ERR_UNKNOWN_USER",
            "user_id does not reference a known user",
        ),
        StoreError::Timeout => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_STORE_UNAVAILABLE",
            "result store timed out",
        ),
        StoreError::Sqlx(err) => {
            tracing::error!(error = %err, "result store query failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "internal server error",
            )
        }
        StoreError::Migrate(err) => {
            tracing::error!(error = %err, "result store migration failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "internal server error",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_absent_details() {
        let (_, Json(body)) = json_error(StatusCode::BAD_REQUEST, "ERR_NO_IMAGE", "no file");
        let encoded = serde_json::to_value(&body).expect("body should serialize");
        assert_eq!(
            encoded,
            serde_json::json!({"error": "no file", "code": "ERR_NO_IMAGE"})
        );
    }

    #[test]
    fn error_body_includes_details_when_present() {
        let (_, Json(body)) = json_error_with_details(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_ANALYSIS_FAILED",
            "Failed to process image",
            "analyzer exited with status 2",
        );
        let encoded = serde_json::to_value(&body).expect("body should serialize");
        assert_eq!(encoded["details"], "analyzer exited with status 2");
    }

    #[test]
    fn request_id_falls_back_to_generated_ulid() {
        let headers = HeaderMap::new();
        let generated = extract_request_id(&headers);
        assert!(!generated.is_empty());

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-123"));
        assert_eq!(extract_request_id(&headers), "req-123");
    }
}
