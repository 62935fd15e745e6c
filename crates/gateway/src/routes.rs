use crate::{
    multipart::{self, ParseError},
    response::{ApiError, DetectionResponse},
    state::AppState,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{
        HeaderMap,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Html,
    routing::get,
};
use inference::DetectorBackend;
use serde::Serialize;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const UPLOAD_FORM: &str = r#"<html>
<body>
<h1>Varroa Mite Detector API</h1>
<form method="POST" enctype="multipart/form-data">
    <input type="file" name="file" accept="image/*" />
    <input type="submit" value="Upload and Detect" />
</form>
</body>
</html>
"#;

/// Build the service. `max_in_flight_requests` caps requests being handled at
/// once across every route; further connections wait for a slot.
pub fn router<B: DetectorBackend + 'static>(
    state: AppState<B>,
    max_body_bytes: usize,
    max_in_flight_requests: usize,
) -> Router {
    Router::new()
        .route("/", get(upload_form).post(detect_upload::<B>))
        .route("/health", get(health::<B>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(max_in_flight_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    model_loaded: bool,
}

async fn health<B: DetectorBackend + 'static>(State(state): State<AppState<B>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        model_loaded: state.orchestrator.is_loaded(),
    })
}

#[tracing::instrument(skip_all, fields(body_bytes = body.len()))]
async fn detect_upload<B: DetectorBackend + 'static>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DetectionResponse>, ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !multipart::is_multipart_form(content_type) {
        tracing::debug!(content_type, "Rejecting non-multipart upload");
        return Err(ApiError::UnsupportedContentType);
    }

    let boundary =
        multipart::boundary_from_content_type(content_type).ok_or(ApiError::MissingBoundary)?;

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if content_length == 0 || body.is_empty() {
        return Err(ApiError::EmptyBody);
    }

    // Scanning a large body is CPU-bound, keep it off the async workers.
    let boundary = boundary.to_owned();
    let span = tracing::Span::current();
    let (filename, image) =
        tokio::task::spawn_blocking(move || span.in_scope(|| extract_file(&body, &boundary)))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Multipart parsing task did not complete");
                ApiError::DetectionFailed
            })??;

    if filename.as_deref() == Some("") {
        return Err(ApiError::NoFileSelected);
    }

    tracing::debug!(
        filename = filename.as_deref().unwrap_or("<none>"),
        file_bytes = image.len(),
        "Parsed upload"
    );

    let permit = tokio::time::timeout(
        state.queue_timeout,
        state.inference_permits.clone().acquire_owned(),
    )
    .await
    .map_err(|_| {
        tracing::warn!(
            timeout_ms = state.queue_timeout.as_millis() as u64,
            "No inference slot became free in time"
        );
        ApiError::Busy
    })?
    .map_err(|_| ApiError::Busy)?;

    let orchestrator = state.orchestrator.clone();
    let params = state.params.clone();
    let span = tracing::Span::current();

    // Keeps running if the client goes away; the permit is released when it ends.
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        span.in_scope(|| orchestrator.detect(&image, &params))
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Detection task did not complete");
        ApiError::DetectionFailed
    })?;

    let detections = result.map_err(|e| {
        tracing::error!(error = %e, "Detection failed");
        ApiError::from(e)
    })?;

    Ok(Json(DetectionResponse::from_detections(detections)))
}

/// The `file` part's filename and bytes. The bytes share `body`'s buffer.
fn extract_file(body: &Bytes, boundary: &str) -> Result<(Option<String>, Bytes), ParseError> {
    let part = multipart::parse(body, boundary)?;
    let bytes = body.slice_ref(part.bytes);
    Ok((part.filename, bytes))
}
