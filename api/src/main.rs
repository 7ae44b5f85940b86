use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use pixel_diff_common::config::{Attributes, Config};
use pixel_diff_common::frame::EncodedImage;
use pixel_diff_vision::camera::{cameras_from_config, Dependencies};
use pixel_diff_vision::engine::Detection;
use pixel_diff_vision::service::{Classification, DiffVision, ServiceError};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    service: DiffVision,
    deps: Dependencies,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DetectionsResponse {
    detections: Vec<Detection>,
}

#[derive(Debug, Serialize)]
struct ClassificationsResponse {
    classifications: Vec<Classification>,
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    count: Option<usize>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn status_for(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::InvalidConfiguration(_) | ServiceError::UnknownCamera(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        ServiceError::Camera(_) => StatusCode::BAD_GATEWAY,
        ServiceError::Evaluation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: ServiceError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, %status, "request failed");
    } else {
        warn!(error = %e, %status, "request rejected");
    }
    (status, e.to_string()).into_response()
}

/// Wrap a request body as an encoded image, using `Content-Type` as the format hint.
fn image_from_request(headers: &HeaderMap, body: Bytes) -> EncodedImage {
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    EncodedImage::new(body, mime_type)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /detections: body is the encoded image
async fn detections(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let image = image_from_request(&headers, body);
    match state.service.detections(&image).await {
        Ok(detections) => Json(DetectionsResponse { detections }).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /classifications?count=
async fn classifications(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CountQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let image = image_from_request(&headers, body);
    match state
        .service
        .classifications(&image, q.count.unwrap_or(1))
        .await
    {
        Ok(classifications) => Json(ClassificationsResponse { classifications }).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /cameras/:camera/detections
async fn camera_detections(
    State(state): State<Arc<AppState>>,
    AxumPath(camera): AxumPath<String>,
) -> Response {
    match state.service.detections_from_camera(&camera).await {
        Ok(detections) => Json(DetectionsResponse { detections }).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /cameras/:camera/classifications?count=
async fn camera_classifications(
    State(state): State<Arc<AppState>>,
    AxumPath(camera): AxumPath<String>,
    Query(q): Query<CountQuery>,
) -> Response {
    match state
        .service
        .classifications_from_camera(&camera, q.count.unwrap_or(1))
        .await
    {
        Ok(classifications) => Json(ClassificationsResponse { classifications }).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /cameras/:camera/point_clouds: always 501
async fn point_clouds(
    State(state): State<Arc<AppState>>,
    AxumPath(camera): AxumPath<String>,
) -> Response {
    match state.service.object_point_clouds(&camera).await {
        Ok(never) => match never {},
        Err(e) => error_response(e),
    }
}

/// GET /geometries: always 501
async fn geometries(State(state): State<Arc<AppState>>) -> Response {
    match state.service.geometries().await {
        Ok(never) => match never {},
        Err(e) => error_response(e),
    }
}

/// GET /properties
async fn properties(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.properties())
}

/// POST /do_command: unknown commands still answer 200 with an error status
async fn do_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Attributes>,
) -> impl IntoResponse {
    Json(state.service.do_command(&command).await)
}

/// PUT /config: replace the service attributes, resetting memory
async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(attributes): Json<Attributes>,
) -> Response {
    match state.service.reconfigure(&attributes, &state.deps).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/detections", post(detections))
        .route("/classifications", post(classifications))
        .route("/cameras/:camera/detections", get(camera_detections))
        .route("/cameras/:camera/classifications", get(camera_classifications))
        .route("/cameras/:camera/point_clouds", get(point_clouds))
        .route("/geometries", get(geometries))
        .route("/properties", get(properties))
        .route("/do_command", post(do_command))
        .route("/config", put(put_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let deps = match cameras_from_config(&config.cameras) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to set up cameras");
            std::process::exit(1);
        }
    };

    let service =
        match DiffVision::from_config(&config.service.name, &config.service.attributes, &deps)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to configure vision service");
                std::process::exit(1);
            }
        };

    let app = router(Arc::new(AppState { service, deps }));

    let addr = format!("{}:{}", config.api.bind, config.api.port);
    info!(addr, service = config.service.name, "pixel-diff API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server stopped");
        std::process::exit(1);
    }
}
