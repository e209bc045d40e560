use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::constants::{DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, MAP_EVENT_CAPACITY};
use crate::geo::LatLng;
use crate::image_fetcher::MarkerIcon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub u64);

/// Which refresh cycle produced a marker, and from which image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerOrigin {
    pub generation: u64,
    pub source_url: String,
}

/// Renders markers for the screen.
pub trait MapSurface: Send {
    fn clear_markers(&mut self);
    fn add_marker(&mut self, position: LatLng, icon: MarkerIcon, origin: MarkerOrigin) -> MarkerId;

    fn on_low_memory(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    None,
    Follow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraOptions {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub tracking: TrackingMode,
    pub dismiss_tracking_on_gesture: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            tracking: TrackingMode::Follow,
            dismiss_tracking_on_gesture: false,
        }
    }
}

/// A marker as the browser sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerView {
    pub id: MarkerId,
    pub lat: f64,
    pub lng: f64,
    pub icon_url: String,
    pub icon_width: u32,
    pub icon_height: u32,
    pub generation: u64,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum MapEvent {
    Cleared { removed: usize },
    MarkerAdded(MarkerView),
    Heartbeat { at: DateTime<Utc> },
}

struct PlacedMarker {
    view: MarkerView,
    icon: MarkerIcon,
}

#[derive(Default)]
struct BoardState {
    markers: Vec<PlacedMarker>,
    // Icons stay fetchable for a while after a clear so in-flight browser requests resolve.
    retired_icons: HashMap<MarkerId, MarkerIcon>,
    next_id: u64,
}

/// In-process marker set mirrored to browsers through [`MapEvent`]s.
///
/// Only the screen task mutates it; HTTP handlers read snapshots.
#[derive(Clone)]
pub struct MarkerBoard {
    state: Arc<RwLock<BoardState>>,
    events: broadcast::Sender<MapEvent>,
    camera: CameraOptions,
}

impl MarkerBoard {
    pub fn new(camera: CameraOptions) -> Self {
        let (events, _) = broadcast::channel(MAP_EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(BoardState::default())),
            events,
            camera,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BoardState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BoardState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn camera(&self) -> CameraOptions {
        self.camera
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Vec<MarkerView> {
        self.read().markers.iter().map(|m| m.view.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn icon(&self, id: MarkerId) -> Option<MarkerIcon> {
        let state = self.read();
        state
            .markers
            .iter()
            .find(|m| m.view.id == id)
            .map(|m| m.icon.clone())
            .or_else(|| state.retired_icons.get(&id).cloned())
    }

    fn publish(&self, event: MapEvent) {
        // No subscribers is fine: the page reloads the snapshot when it connects.
        let _ = self.events.send(event);
    }
}

impl MapSurface for MarkerBoard {
    fn clear_markers(&mut self) {
        let removed = {
            let mut state = self.write();
            let drained: Vec<PlacedMarker> = state.markers.drain(..).collect();
            let removed = drained.len();
            state.retired_icons = drained.into_iter().map(|m| (m.view.id, m.icon)).collect();
            removed
        };
        debug!(removed, "markers cleared");
        self.publish(MapEvent::Cleared { removed });
    }

    fn add_marker(&mut self, position: LatLng, icon: MarkerIcon, origin: MarkerOrigin) -> MarkerId {
        let view = {
            let mut state = self.write();
            let id = MarkerId(state.next_id);
            state.next_id += 1;

            let view = MarkerView {
                id,
                lat: position.lat,
                lng: position.lng,
                icon_url: format!("/api/marker-icon/{}", id.0),
                icon_width: icon.width(),
                icon_height: icon.height(),
                generation: origin.generation,
                source_url: origin.source_url,
                created_at: Utc::now(),
            };
            state.markers.push(PlacedMarker {
                view: view.clone(),
                icon,
            });
            view
        };

        debug!(id = view.id.0, lat = view.lat, lng = view.lng, "📍 Adding marker");
        let id = view.id;
        self.publish(MapEvent::MarkerAdded(view));
        id
    }

    fn on_low_memory(&mut self) {
        let mut state = self.write();
        let dropped = state.retired_icons.len();
        state.retired_icons.clear();
        state.retired_icons.shrink_to_fit();
        info!(dropped, "🧹 Low memory: released retired marker icons");
    }
}
