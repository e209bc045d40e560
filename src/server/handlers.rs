use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{sse::Event as SseEvent, Html, IntoResponse, Json, Response, Sse},
};
use rust_embed::RustEmbed;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::geo::LatLng;
use crate::map_surface::{MarkerId, MarkerView};
use crate::screen::ScreenStatus;
use crate::settings::Settings;

use super::events::{map_event_stream, ClientConfig, LifecycleRequest, LocationReport};
use super::state::AppState;

#[derive(RustEmbed)]
#[folder = "frontend/"]
struct Asset;

fn embedded(path: &str, content_type: &'static str) -> Response {
    match Asset::get(path) {
        Some(file) => ([(header::CONTENT_TYPE, content_type)], file.data.into_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn index_html() -> Response {
    match Asset::get("index.html") {
        Some(file) => Html(file.data.into_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn style_css() -> Response {
    embedded("style.css", "text/css")
}

pub async fn script_js() -> Response {
    embedded("script.js", "application/javascript")
}

pub async fn get_config(State(state): State<AppState>) -> Json<ClientConfig> {
    let image_sources = state
        .settings
        .lock()
        .map(|s| s.image_urls.len())
        .unwrap_or_default();

    Json(ClientConfig {
        camera: state.board.camera(),
        fetch_count: state.refresh.fetch_count,
        jitter_span: state.refresh.jitter.span(),
        image_sources,
    })
}

pub async fn get_markers(State(state): State<AppState>) -> Json<Vec<MarkerView>> {
    Json(state.board.snapshot())
}

pub async fn get_marker_icon(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Result<Response, StatusCode> {
    let icon = state.board.icon(MarkerId(id)).ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        icon.png().to_vec(),
    )
        .into_response())
}

pub async fn post_location(
    State(state): State<AppState>,
    Json(report): Json<LocationReport>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let fix = LatLng::new(report.lat, report.lng).map_err(|e| {
        warn!(error = %e, "rejected location report");
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        )
    })?;

    debug!(%fix, accuracy = ?report.accuracy, "location reported");
    state.engine.report(fix);

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn post_lifecycle(
    State(state): State<AppState>,
    Json(request): Json<LifecycleRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.screen.lifecycle(request.event).map_err(|e| {
        warn!(error = %e, "lifecycle event dropped");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(serde_json::json!({ "status": "ok", "event": request.event })))
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<ScreenStatus>, StatusCode> {
    state
        .screen
        .status()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, StatusCode> {
    let settings = state
        .settings
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(settings.clone()))
}

pub async fn map_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = map_event_stream(state.board.subscribe());

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive-message"),
    )
}
