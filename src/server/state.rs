use std::sync::{Arc, Mutex};

use crate::location::PushLocationEngine;
use crate::map_surface::MarkerBoard;
use crate::refresher::RefreshConfig;
use crate::screen::ScreenHandle;
use crate::settings::Settings;

// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub board: MarkerBoard,
    pub engine: PushLocationEngine,
    pub screen: ScreenHandle<MarkerBoard>,
    pub refresh: RefreshConfig,
    pub settings: Arc<Mutex<Settings>>,
}
