//! HTTP request handlers for the pictor image API.
//!
//! # Endpoints
//!
//! - `GET /image?uri=...` - Load, transform and serve an image as PNG
//! - `GET /cache/stats` - Cache and worker pool counters
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::decode::RotateTransformation;
use crate::error::LoadError;
use crate::pipeline::{EngineStats, ImageEngine};
use crate::request::{ColorConfig, ImageRequest, Precision, Resize, Scale};

/// Largest width or height accepted from a query string.
pub const MAX_DIMENSION: u32 = 8192;

// =============================================================================
// Application State
// =============================================================================

/// URI schemes the server loads unless configured otherwise.
pub const DEFAULT_ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "asset", "data"];

/// Shared application state containing the image engine.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: ImageEngine,

    /// Cache-Control max-age in seconds for image responses
    pub cache_max_age: u32,

    /// Lower-case schemes clients may request
    pub allowed_schemes: Arc<[String]>,
}

impl AppState {
    pub fn new(engine: ImageEngine) -> Self {
        Self {
            engine,
            cache_max_age: 3600,
            allowed_schemes: DEFAULT_ALLOWED_SCHEMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_allowed_schemes(mut self, schemes: &[String]) -> Self {
        self.allowed_schemes = schemes.iter().map(|s| s.to_ascii_lowercase()).collect();
        self
    }

    /// Reject requests whose URI scheme is not allowed. Bare paths have no
    /// scheme and are always rejected.
    pub fn check_scheme(&self, request: &ImageRequest) -> Result<(), LoadError> {
        match request.scheme() {
            Some(scheme) if self.allowed_schemes.contains(&scheme) => Ok(()),
            Some(scheme) => Err(LoadError::InvalidRequest(format!(
                "scheme '{scheme}' is not allowed (allowed: {})",
                self.allowed_schemes.join(", ")
            ))),
            None => Err(LoadError::InvalidRequest(format!(
                "uri must have a scheme (allowed: {})",
                self.allowed_schemes.join(", ")
            ))),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for image requests.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQueryParams {
    /// Source URI (http(s)://, file://, asset://, content:// or data:)
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// exactly, same_aspect_ratio or less_pixels
    #[serde(default)]
    pub precision: Option<String>,

    /// start_crop, center_crop, end_crop or fill
    #[serde(default)]
    pub scale: Option<String>,

    /// default, rgba8, rgb8 or luma8
    #[serde(default)]
    pub color: Option<String>,

    /// Clockwise rotation in degrees, snapped to a quarter turn
    #[serde(default)]
    pub rotate: Option<i32>,

    /// Skip cache reads; fresh results are still stored
    #[serde(default)]
    pub refresh: bool,
}

impl ImageQueryParams {
    /// Build the engine request, rejecting malformed parameters.
    pub fn to_request(&self) -> Result<ImageRequest, LoadError> {
        let uri = self
            .uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| LoadError::InvalidRequest("missing 'uri' parameter".to_string()))?;

        let mut builder = ImageRequest::builder(uri);

        match (self.width, self.height) {
            (None, None) => {}
            (Some(width), Some(height)) => {
                if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
                    return Err(LoadError::InvalidRequest(format!(
                        "width and height must be between 1 and {MAX_DIMENSION}"
                    )));
                }
                let mut resize = Resize::new(width, height);
                if let Some(precision) = &self.precision {
                    resize = resize.with_precision(Precision::parse(precision).ok_or_else(|| {
                        LoadError::InvalidRequest(format!("unknown precision '{precision}'"))
                    })?);
                }
                if let Some(scale) = &self.scale {
                    resize = resize.with_scale(Scale::parse(scale).ok_or_else(|| {
                        LoadError::InvalidRequest(format!("unknown scale '{scale}'"))
                    })?);
                }
                builder = builder.resize(resize);
            }
            _ => {
                return Err(LoadError::InvalidRequest(
                    "width and height must be given together".to_string(),
                ))
            }
        }

        if let Some(color) = &self.color {
            let color = ColorConfig::parse(color)
                .ok_or_else(|| LoadError::InvalidRequest(format!("unknown color '{color}'")))?;
            builder = builder.color(color);
        }

        if let Some(degrees) = self.rotate {
            builder = builder.transformation(RotateTransformation::new(degrees));
        }

        if self.refresh {
            builder = builder.force_refresh();
        }

        Ok(builder.build())
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "source_not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// HTTP status for a load failure.
pub fn status_for(error: &LoadError) -> StatusCode {
    match error {
        LoadError::SourceNotFound { .. } => StatusCode::NOT_FOUND,
        LoadError::InvalidUri { .. } | LoadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LoadError::NoMatchingHandler { .. } | LoadError::DecodeUnsupported(_) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        LoadError::DecodeMalformed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LoadError::TransientNetwork { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LoadError::ServerError { .. } | LoadError::HttpStatus { .. } => StatusCode::BAD_GATEWAY,
        LoadError::DepthLimited { .. } => StatusCode::GATEWAY_TIMEOUT,
        LoadError::Internal(_) | LoadError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert LoadError to HTTP response.
///
/// - 5xx errors are logged at ERROR level
/// - 404s are logged at DEBUG level (common and expected)
/// - Other 4xx errors are logged at WARN level
impl IntoResponse for LoadError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let error_type = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /image?uri={uri}&width={w}&height={h}&precision=&scale=&color=&rotate=&refresh=`
///
/// # Response
///
/// - `200 OK`: PNG image with `Content-Type: image/png`
/// - `400 Bad Request`: Missing URI, disallowed scheme or invalid parameters
/// - `404 Not Found`: Source does not exist
/// - `415 Unsupported Media Type`: No fetcher or decoder for the source
/// - `422 Unprocessable Entity`: Source bytes could not be decoded
/// - `502 Bad Gateway` / `503 Service Unavailable`: Origin failure
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Image-Data-From`: tier the image came from
/// - `X-Image-Width` / `X-Image-Height`: decoded dimensions
pub async fn image_handler(
    State(state): State<AppState>,
    Query(query): Query<ImageQueryParams>,
) -> Result<Response, LoadError> {
    let request = query.to_request()?;
    state.check_scheme(&request)?;
    let result = state.engine.execute(request).await?;

    let bitmap = Arc::clone(result.bitmap());
    let png = tokio::task::spawn_blocking(move || bitmap.encode_png())
        .await
        .map_err(|e| LoadError::Internal(format!("encode task failed: {e}")))??;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        )
        .header("X-Image-Data-From", result.data_from().as_str())
        .header("X-Image-Width", result.bitmap().width().to_string())
        .header("X-Image-Height", result.bitmap().height().to_string())
        .body(Body::from(png))
        .map_err(|e| LoadError::Internal(format!("failed to build response: {e}")))
}

/// Handle cache statistics requests.
///
/// `GET /cache/stats` returns [`EngineStats`] as JSON.
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats())
}

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
