// Main entry point for the image localization service

use image_localizer::{
    core::{errors::AdmissionError, types::*, Config},
    orchestration::ContentPipeline,
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const CLIENT_ID_HEADER: &str = "x-client-id";
const ANONYMOUS: &str = "anonymous";
const INIT_FAILED: &str = "pipeline initialization failed";

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    /// `None` when start-up wiring failed; the server still answers
    pipeline: Option<Arc<ContentPipeline>>,
    metrics: Metrics,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "image_localizer={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== IMAGE LOCALIZER ===");
    info!(
        "Config: OCR={} threshold={} translation={:?} rate_limit={}/{}s concurrency={}",
        config.ocr.command,
        config.confidence_threshold(),
        config.translation.backend,
        config.rate_limit.max_requests,
        config.rate_limit.window_seconds,
        config.pipeline.max_concurrent_requests
    );

    // Initialize metrics
    let metrics = Metrics::new();

    info!("Initializing content pipeline...");
    let pipeline = match ContentPipeline::from_config(&config, metrics.clone()) {
        Ok(pipeline) => Some(Arc::new(pipeline)),
        Err(e) => {
            error!("Pipeline initialization failed: {:#}", e);
            None
        }
    };
    let state = AppState { pipeline, metrics };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/process", post(process_image))
        .route("/translate", post(translate_image))
        .route("/regenerate", post(regenerate_image))
        .route("/quote", post(quote_image))
        .route("/schedule", post(schedule_posts))
        .route("/images/{id}", get(image_details))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /health       - Health check");
    info!("  GET  /metrics      - Prometheus metrics");
    info!("  GET  /stats        - Detailed statistics");
    info!("  POST /process      - OCR, erase, translate and composite an image");
    info!("  POST /translate    - Re-run one language of a processed image");
    info!("  POST /regenerate   - Composite translations over a regenerated background");
    info!("  POST /quote        - Draw a translated quote over a prompted image");
    info!("  POST /schedule     - Plan posts per platform and language");
    info!("  GET  /images/{{id}}  - Stored results for an image");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn client_identity(headers: &HeaderMap) -> &str {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS)
}

fn rejected(pipeline: &ContentPipeline, e: AdmissionError) -> ApiError {
    let AdmissionError::RateLimited {
        identity,
        retry_after,
        ..
    } = &e;
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": e.to_string(),
            "retry_after_seconds": retry_after.as_secs(),
            "remaining": pipeline.remaining_budget(identity),
        })),
    )
}

fn unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": INIT_FAILED })),
    )
}

async fn root() -> &'static str {
    "Image Localizer - OCR, inpainting, translation and post scheduling"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let Some(pipeline) = &state.pipeline else {
        return Json(serde_json::json!({
            "status": "degraded",
            "error": INIT_FAILED,
            "version": env!("CARGO_PKG_VERSION"),
        }));
    };
    let store = pipeline.store();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "stored": {
            "images": store.image_count(),
            "translations": store.translation_count(),
            "schedules": store.schedule_count(),
        },
        "tracked_clients": pipeline.tracked_clients(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    let mut stats = serde_json::to_value(snapshot).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })?;
    if let (Some(pipeline), Some(obj)) = (&state.pipeline, stats.as_object_mut()) {
        obj.insert(
            "circuit_breakers".to_string(),
            serde_json::json!(pipeline.breaker_stats()),
        );
    }
    Ok(Json(stats))
}

/// Process one image into every requested language
async fn process_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProcessImageRequest>,
) -> Result<Json<ProcessImageResponse>, ApiError> {
    state.metrics.record_endpoint_request("/process");
    let Some(pipeline) = &state.pipeline else {
        warn!("Process request while the pipeline is unavailable");
        return Ok(Json(ProcessImageResponse::failed(
            &request.image_path,
            request.source_language,
            INIT_FAILED,
        )));
    };

    let identity = client_identity(&headers);
    info!(
        "Process request from '{}': {} -> {:?}",
        identity, request.image_path, request.target_languages
    );
    pipeline
        .handle_process(identity, &request)
        .await
        .map(Json)
        .map_err(|e| rejected(pipeline, e))
}

/// Re-run translate and composite for one stored image and language
async fn translate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TranslateImageRequest>,
) -> Result<Json<TranslatedContent>, ApiError> {
    state.metrics.record_endpoint_request("/translate");
    let pipeline = state.pipeline.as_ref().ok_or_else(unavailable)?;

    pipeline
        .handle_translate(client_identity(&headers), &request)
        .await
        .map_err(|e| rejected(pipeline, e))?
        .map(Json)
        .map_err(|e| {
            let status = match &e {
                image_localizer::PipelineError::UnknownImage { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() })))
        })
}

/// Translate over a freshly generated background
async fn regenerate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegenerateImageRequest>,
) -> Result<Json<RegenerateImageResponse>, ApiError> {
    state.metrics.record_endpoint_request("/regenerate");
    let Some(pipeline) = &state.pipeline else {
        let failed = ProcessImageResponse::failed(&request.image_path, request.source_language, INIT_FAILED);
        return Ok(Json(RegenerateImageResponse {
            image_id: failed.image_id,
            original_content: failed.original_content,
            background_description: String::new(),
            translated_contents: Vec::new(),
            failures: Vec::new(),
            fallbacks: Vec::new(),
            error: failed.error,
        }));
    };

    pipeline
        .handle_regenerate(client_identity(&headers), &request)
        .await
        .map(Json)
        .map_err(|e| rejected(pipeline, e))
}

/// Translate a quote and draw it over an image generated from a prompt
async fn quote_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QuoteImageRequest>,
) -> Result<Json<QuoteImageResponse>, ApiError> {
    state.metrics.record_endpoint_request("/quote");
    let Some(pipeline) = &state.pipeline else {
        return Ok(Json(QuoteImageResponse {
            target_language: request.target_language,
            translated_text: String::new(),
            image_path: String::new(),
            fallbacks: Vec::new(),
            error: Some(INIT_FAILED.to_string()),
        }));
    };

    pipeline
        .handle_quote(client_identity(&headers), &request)
        .await
        .map(Json)
        .map_err(|e| rejected(pipeline, e))
}

/// Plan one post per (platform, language)
async fn schedule_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SchedulePostRequest>,
) -> Result<Json<SchedulePostResponse>, ApiError> {
    state.metrics.record_endpoint_request("/schedule");
    let Some(pipeline) = &state.pipeline else {
        return Ok(Json(SchedulePostResponse {
            schedules: Vec::new(),
            error: Some(INIT_FAILED.to_string()),
        }));
    };

    pipeline
        .handle_schedule(client_identity(&headers), &request)
        .map(Json)
        .map_err(|e| rejected(pipeline, e))
}

/// Everything stored for one image
async fn image_details(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_endpoint_request("/images");
    let pipeline = state.pipeline.as_ref().ok_or_else(unavailable)?;

    let image = pipeline.image(&image_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown image {}", image_id) })),
        )
    })?;

    Ok(Json(serde_json::json!({
        "image": image,
        "translations": pipeline.translations(&image_id),
        "schedules": pipeline.schedules(&image_id),
    })))
}
