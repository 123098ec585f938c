// Position samples produced by the position watch
use super::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One device position update. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    pub position: Coordinate,
    /// Ground speed in m/s.
    pub speed: Option<f64>,
    /// Course over ground in degrees from true north.
    pub heading: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(position: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            speed: None,
            heading: None,
            accuracy: None,
            timestamp,
        }
    }

    pub fn with_motion(mut self, speed: Option<f64>, heading: Option<f64>) -> Self {
        self.speed = speed;
        self.heading = heading;
        self
    }

    pub fn with_accuracy(mut self, accuracy: Option<f64>) -> Self {
        self.accuracy = accuracy;
        self
    }
}
