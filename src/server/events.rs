use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event as SseEvent;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::constants::SSE_HEARTBEAT_SECS;
use crate::map_surface::{CameraOptions, MapEvent};
use crate::screen::Lifecycle;

/// A fix reported by the page's geolocation watcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LifecycleRequest {
    pub event: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub camera: CameraOptions,
    pub fetch_count: usize,
    pub jitter_span: f64,
    pub image_sources: usize,
}

fn to_sse(event: &MapEvent) -> SseEvent {
    SseEvent::default()
        .json_data(event)
        .unwrap_or_else(|_| SseEvent::default().data("Error serializing event"))
}

/// Forwards board events to one SSE client until it disconnects.
pub fn map_event_stream(
    mut events: broadcast::Receiver<MapEvent>,
) -> ReceiverStream<Result<SseEvent, Infallible>> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let sse_event = match event {
                        Ok(map_event) => to_sse(&map_event),
                        // Page refetches /api/markers when it sees this
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE client lagged, asking it to resync");
                            SseEvent::default().event("resync").data(skipped.to_string())
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    if tx.send(Ok(sse_event)).await.is_err() {
                        break; // Client disconnected
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(SSE_HEARTBEAT_SECS)) => {
                    let heartbeat = MapEvent::Heartbeat { at: Utc::now() };
                    if tx.send(Ok(to_sse(&heartbeat))).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx)
}
