//! PinMap: drops image markers around the device's position on every new location fix.
//!
//! The browser page renders the map and reports geolocation; this crate owns
//! the refresh cycle, the marker set and the image fetching.

pub mod constants;
pub mod geo;
pub mod image_fetcher;
pub mod location;
pub mod map_surface;
pub mod refresher;
pub mod screen;
pub mod server;
pub mod settings;
