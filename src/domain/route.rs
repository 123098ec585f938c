// Route domain models: stops, lifecycle status and computed plans
use super::geo::Coordinate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier of a stop as assigned by the fleet backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StopId(pub String);

impl fmt::Display for StopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StopId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// The backend sends numeric ids for some routes and strings for others.
impl<'de> Deserialize<'de> for StopId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => StopId(s),
            RawId::Number(n) => StopId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Pending,
    Visited,
}

/// A single collection point with a fixed position in the visiting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub seq: i64,
    pub name: String,
    #[serde(flatten)]
    pub position: Coordinate,
    pub status: StopStatus,
}

impl Stop {
    pub fn is_pending(&self) -> bool {
        self.status == StopStatus::Pending
    }
}

/// Overall route lifecycle, set explicitly by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Authoritative route snapshot as returned by the route-details endpoint.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDetails {
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub route_status: RouteStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStep {
    pub instruction: String,
    pub maneuver_type: String,
    pub road_name: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// A drivable path to the current destination. Recomputed, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub polyline: Vec<Coordinate>,
    pub distance_meters: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub steps: Vec<RouteStep>,
}

impl RoutePlan {
    /// Fallback plan used when no provider could route: a straight segment
    /// with unknown distance and duration.
    pub fn straight_line(origin: Coordinate, destination: Coordinate) -> Self {
        Self {
            polyline: vec![origin, destination],
            distance_meters: None,
            duration_seconds: None,
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_details_parsing() {
        let body = r#"{
            "stops": [
                {"id": 17, "seq": 2, "name": "Purok 3", "lat": 14.61, "lng": 121.02, "status": "pending"},
                {"id": "a-9", "seq": 1, "name": "Market", "lat": 14.60, "lng": 121.01, "status": "visited"}
            ],
            "routeStatus": "in_progress"
        }"#;
        let details: RouteDetails = serde_json::from_str(body).unwrap();

        assert_eq!(details.route_status, RouteStatus::InProgress);
        assert_eq!(details.stops[0].id, StopId::from("17"));
        assert_eq!(details.stops[0].position, Coordinate { lat: 14.61, lng: 121.02 });
        assert_eq!(details.stops[1].id, StopId::from("a-9"));
        assert_eq!(details.stops[1].status, StopStatus::Visited);
    }

    #[test]
    fn test_route_details_defaults() {
        let details: RouteDetails = serde_json::from_str("{}").unwrap();
        assert!(details.stops.is_empty());
        assert_eq!(details.route_status, RouteStatus::Pending);
    }

    #[test]
    fn test_straight_line_plan() {
        let a = Coordinate { lat: 1.0, lng: 2.0 };
        let b = Coordinate { lat: 3.0, lng: 4.0 };
        let plan = RoutePlan::straight_line(a, b);
        assert_eq!(plan.polyline, vec![a, b]);
        assert_eq!(plan.distance_meters, None);
        assert_eq!(plan.duration_seconds, None);
        assert!(plan.steps.is_empty());
    }
}
