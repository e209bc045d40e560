use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

pub mod events;
pub mod handlers;
pub mod state;

pub use self::state::AppState;
use handlers::{
    get_config, get_marker_icon, get_markers, get_settings, get_status, index_html,
    map_events_stream, post_lifecycle, post_location, script_js, style_css,
};

// Create the main application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_html))
        .route("/style.css", get(style_css))
        .route("/script.js", get(script_js))
        .route("/api/config", get(get_config))
        .route("/api/markers", get(get_markers))
        .route("/api/marker-icon/:id", get(get_marker_icon))
        .route("/api/location", post(post_location))
        .route("/api/lifecycle", post(post_lifecycle))
        .route("/api/status", get(get_status))
        .route("/api/settings", get(get_settings))
        .route("/api/events", get(map_events_stream))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub async fn start_server<S>(state: AppState, port: u16, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("   ✅ HTTP server started successfully at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
