use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_JITTER_SPAN;

#[derive(Error, Debug, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("jitter span must be a finite, non-negative number of degrees (got {0})")]
    InvalidJitterSpan(f64),
}

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Random positional offset applied so markers from one cycle don't stack exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    span: f64,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            span: DEFAULT_JITTER_SPAN,
        }
    }
}

impl Jitter {
    pub fn new(span: f64) -> Result<Self, GeoError> {
        if !span.is_finite() || span < 0.0 {
            return Err(GeoError::InvalidJitterSpan(span));
        }
        Ok(Self { span })
    }

    pub fn span(&self) -> f64 {
        self.span
    }

    /// Largest distance (per axis) a jittered point can be from its origin.
    pub fn half_span(&self) -> f64 {
        self.span / 2.0
    }

    pub fn offset<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen::<f64>() * self.span - self.half_span()
    }

    pub fn apply<R: Rng + ?Sized>(&self, origin: LatLng, rng: &mut R) -> LatLng {
        LatLng {
            lat: origin.lat + self.offset(rng),
            lng: origin.lng + self.offset(rng),
        }
    }

    pub fn contains(&self, origin: LatLng, point: LatLng) -> bool {
        let bound = self.half_span() + 1e-9;
        (point.lat - origin.lat).abs() <= bound && (point.lng - origin.lng).abs() <= bound
    }
}
