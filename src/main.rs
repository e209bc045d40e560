use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pinmap::image_fetcher::HttpImageFetcher;
use pinmap::location::PushLocationEngine;
use pinmap::map_surface::MarkerBoard;
use pinmap::refresher::MarkerRefresher;
use pinmap::screen::MapScreen;
use pinmap::server::{start_server, AppState};
use pinmap::settings::Settings;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pinmap=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    if let Err(e) = std::process::Command::new(opener).arg(url).spawn() {
        warn!(error = %e, "could not open browser");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("🗺️  PinMap v{} starting...", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load().context("Failed to load settings")?;
    let config_path = Settings::config_path();
    if !config_path.exists() {
        match settings.save() {
            Ok(()) => info!("📝 Wrote default config to {}", config_path.display()),
            Err(e) => warn!(error = %e, "could not write default config"),
        }
    }
    info!(
        "⚙️  {} image source(s), {} fetches per fix, jitter span {:.6}°",
        settings.image_urls.len(),
        settings.fetch_count,
        settings.jitter_span
    );

    let refresh = settings.refresh_config()?;
    let sources = settings.image_sources()?;
    let fetcher = HttpImageFetcher::new(settings.fetch_timeout())
        .context("Failed to build HTTP client")?;

    let engine = PushLocationEngine::new();
    let board = MarkerBoard::new(settings.camera());

    let (refresher, completions) = MarkerRefresher::new(
        engine.clone(),
        Arc::new(fetcher),
        sources,
        refresh,
        StdRng::from_entropy(),
    );
    let (screen, handle) = MapScreen::new(refresher, completions);
    let screen_task = screen.spawn();

    // The board is the map surface; it is ready as soon as the server can serve it.
    handle.map_ready(board.clone())?;

    let port = settings.port;
    let auto_open = settings.auto_open_browser;
    let state = AppState {
        board,
        engine,
        screen: handle.clone(),
        refresh,
        settings: Arc::new(Mutex::new(settings)),
    };

    if auto_open {
        open_browser(&format!("http://127.0.0.1:{}", port));
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown requested");
    };
    start_server(state, port, shutdown).await?;

    let _ = handle.shutdown();
    let _ = screen_task.await;
    info!("✅ PinMap stopped");
    Ok(())
}
