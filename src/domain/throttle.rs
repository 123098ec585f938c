// Telemetry throttle policy
use super::geo::{haversine_meters, Coordinate};
use super::sample::LocationSample;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Position and time of the last sample accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentMark {
    pub position: Coordinate,
    pub sent_at: DateTime<Utc>,
}

/// Decides whether a sample is forwarded for upload.
///
/// A sample passes when at least `min_interval` elapsed since the last
/// accepted one, or, when a distance gate is configured, when it moved at
/// least `min_distance_meters` away from it. With `min_distance_meters`
/// unset the policy is a pure time gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    pub min_interval: Duration,
    pub min_distance_meters: Option<f64>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5000),
            min_distance_meters: Some(20.0),
        }
    }
}

impl ThrottlePolicy {
    pub fn time_only(min_interval: Duration) -> Self {
        Self {
            min_interval,
            min_distance_meters: None,
        }
    }

    pub fn should_send(
        &self,
        sample: &LocationSample,
        last: Option<&SentMark>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last) = last else {
            return true;
        };

        // A clock step backwards counts as zero elapsed time.
        let elapsed = (now - last.sent_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.min_interval {
            return true;
        }

        match self.min_distance_meters {
            Some(min_distance) => haversine_meters(sample.position, last.position) >= min_distance,
            None => false,
        }
    }
}
