// Geographic primitives: coordinates and great-circle distance
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

/// A WGS84 position, always stored as latitude then longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting values outside [-90,90] / [-180,180].
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let coordinate = Self { lat, lng };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(GeoError::OutOfRange { lat, lng })
        }
    }

    /// Build from a `[lng, lat]` pair as used by GeoJSON geometries.
    pub fn from_lng_lat(pair: [f64; 2]) -> Result<Self, GeoError> {
        Self::new(pair[1], pair[0])
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_meters(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}
