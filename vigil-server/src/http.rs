//! HTTP API: `/health`, `/debug`, `/detect` and the demo page

use crate::config::ServerConfig;
use crate::diagnostics::DebugReport;
use crate::metrics::{record_detect, record_detections, DetectOutcome};
use crate::static_files::serve_index;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vigil_eye::{
    DetectError, DetectionOutcome, DetectionService, ImagePayload, Prediction, ServiceState,
};

// API state
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<DetectionService>,
    pub config: Arc<ServerConfig>,
}

impl ApiState {
    pub fn new(service: DetectionService, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}

// Response types
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub model_loaded: bool,
    pub model_type: String,
    pub model_classes: Option<BTreeMap<usize, String>>,
    pub class_count: Option<usize>,
    pub load_error: Option<String>,
    pub model_path_exists: bool,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub predictions: Vec<Prediction>,
    pub total_detections: usize,
    pub timestamp: String,
    pub model_type: String,
}

/// JSON form of a detect request. Thresholds may be numbers or numeric strings.
#[derive(Debug, Deserialize)]
pub struct DetectJsonRequest {
    pub image_base64: Option<String>,
    #[serde(default)]
    pub conf_threshold: Option<serde_json::Value>,
    #[serde(default)]
    pub nms_threshold: Option<serde_json::Value>,
}

/// Errors returned by the HTTP layer.
#[derive(Debug)]
pub enum ApiError {
    Detect(DetectError),
    BadRequest(String),
    /// Body extraction failed; carries the extractor's status (413 for
    /// oversize uploads)
    Rejected(StatusCode, String),
    Timeout(Duration),
    Internal(String),
}

impl ApiError {
    fn outcome(&self) -> DetectOutcome {
        match self {
            ApiError::Detect(DetectError::ServiceUnavailable { .. }) => DetectOutcome::Unavailable,
            ApiError::Detect(_) | ApiError::BadRequest(_) | ApiError::Rejected(..) => {
                DetectOutcome::ClientError
            }
            ApiError::Timeout(_) => DetectOutcome::Timeout,
            ApiError::Internal(_) => DetectOutcome::InternalError,
        }
    }
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        ApiError::Detect(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Detect(err) => {
                let status = if err.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, err.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Rejected(status, message) => (status, message),
            ApiError::Timeout(limit) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Detection did not complete within {}s", limit.as_secs()),
            ),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/debug", get(debug_handler))
        .route("/detect", post(detect_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler(State(state): State<ApiState>) -> impl IntoResponse {
    serve_index(&state.config.static_dir).await
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let health = state.service.health();
    let status = if health.state == ServiceState::Ready {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        status: status.to_string(),
        timestamp: timestamp(),
        model_loaded: health.model_loaded,
        model_type: health.model_type,
        model_classes: health.class_names.map(|names| names.into_iter().collect()),
        class_count: health.class_count,
        load_error: health.load_error,
        model_path_exists: state.service.model().path().exists(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn debug_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let service = state.service.clone();
    let config = state.config.clone();
    match tokio::task::spawn_blocking(move || DebugReport::collect(&service, &config)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Debug report task failed: {}", e);
            ApiError::Internal("Failed to collect debug information".to_string()).into_response()
        }
    }
}

async fn detect_handler(State(state): State<ApiState>, request: Request) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("detect", request_id = %request_id);

    async move {
        let start = Instant::now();
        let result = run_detect(&state, request).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(outcome) => {
                record_detect(DetectOutcome::Success, elapsed_ms);
                record_detections(outcome.total_detections);
                info!(
                    "Returned {} detections in {:.1}ms (inference at {}x{})",
                    outcome.total_detections,
                    elapsed_ms,
                    outcome.inference_dimensions.0,
                    outcome.inference_dimensions.1
                );
                let response = DetectResponse {
                    success: true,
                    total_detections: outcome.total_detections,
                    predictions: outcome.predictions,
                    timestamp: timestamp(),
                    model_type: state.service.model().model_type().to_string(),
                };
                (StatusCode::OK, Json(response)).into_response()
            }
            Err(err) => {
                record_detect(err.outcome(), elapsed_ms);
                match &err {
                    ApiError::Detect(DetectError::ServiceUnavailable { .. })
                    | ApiError::Internal(_) => error!("Detect request failed: {:?}", err),
                    _ => warn!("Detect request rejected: {:?}", err),
                }
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_detect(state: &ApiState, request: Request) -> Result<DetectionOutcome, ApiError> {
    // Degraded services answer before the body is read.
    state.service.ensure_ready()?;

    let input = read_detect_input(state, request).await?;

    let service = state.service.clone();
    let span = tracing::Span::current();
    let task = tokio::task::spawn_blocking(move || {
        span.in_scope(|| service.process(input.payload, input.conf_threshold, input.nms_threshold))
    });

    // On timeout the blocking task keeps running and holds the model lock
    // until the detector returns.
    let joined = match state.config.request_timeout() {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| ApiError::Timeout(limit))?,
        None => task.await,
    };

    let outcome =
        joined.map_err(|e| ApiError::Internal(format!("Detection worker failed: {}", e)))??;
    Ok(outcome)
}

/// Request fields relevant to detection, before decoding.
#[derive(Debug, Default)]
pub struct DetectInput {
    pub payload: Option<ImagePayload>,
    pub conf_threshold: Option<f32>,
    pub nms_threshold: Option<f32>,
}

async fn read_detect_input(state: &ApiState, request: Request) -> Result<DetectInput, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?;
        read_multipart(multipart).await
    } else {
        let body = Bytes::from_request(request, state)
            .await
            .map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?;
        read_json(&body)
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<DetectInput, ApiError> {
    let mut input = DetectInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?;
                // An empty file field means nothing was selected.
                if !bytes.is_empty() {
                    input.payload = Some(ImagePayload::Encoded(bytes.to_vec()));
                }
            }
            "conf_threshold" | "nms_threshold" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Unable to read {} field: {}", name, e))
                })?;
                if name == "conf_threshold" {
                    input.conf_threshold = parse_threshold_text("conf_threshold", &text)?;
                } else {
                    input.nms_threshold = parse_threshold_text("nms_threshold", &text)?;
                }
            }
            _ => {}
        }
    }

    Ok(input)
}

fn read_json(body: &[u8]) -> Result<DetectInput, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DetectInput::default());
    }

    let request: DetectJsonRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    Ok(DetectInput {
        payload: request.image_base64.map(ImagePayload::Base64),
        conf_threshold: parse_threshold_json("conf_threshold", request.conf_threshold)?,
        nms_threshold: parse_threshold_json("nms_threshold", request.nms_threshold)?,
    })
}

/// Blank text means "use the default".
pub fn parse_threshold_text(name: &'static str, text: &str) -> Result<Option<f32>, DetectError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f32>()
        .map(Some)
        .map_err(|_| DetectError::InvalidParameter {
            name,
            message: format!("'{}' is not a number", trimmed),
        })
}

pub fn parse_threshold_json(
    name: &'static str,
    value: Option<serde_json::Value>,
) -> Result<Option<f32>, DetectError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| Some(v as f32)).ok_or_else(|| {
            DetectError::InvalidParameter {
                name,
                message: format!("{} is not representable", n),
            }
        }),
        Some(serde_json::Value::String(s)) => parse_threshold_text(name, &s),
        Some(other) => Err(DetectError::InvalidParameter {
            name,
            message: format!("expected a number, got {}", other),
        }),
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
