// Wire format shared by the OSRM-compatible directions APIs
//
// Both providers answer `route` requests with the same JSON envelope; this
// module decodes it and normalises it into a `RoutePlan`. Geometry arrives
// as GeoJSON `[lng, lat]` pairs and leaves as `Coordinate { lat, lng }`.
use crate::application::route_guidance::DirectionsError;
use crate::domain::geo::Coordinate;
use crate::domain::route::{RoutePlan, RouteStep};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DirectionsResponse {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRoute {
    pub geometry: ApiGeometry,
    pub distance: f64,
    pub duration: f64,
    #[serde(default)]
    pub legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGeometry {
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLeg {
    #[serde(default)]
    pub steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStep {
    pub distance: f64,
    pub duration: f64,
    #[serde(default)]
    pub name: String,
    pub maneuver: ApiManeuver,
}

#[derive(Debug, Deserialize)]
pub struct ApiManeuver {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub modifier: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
}

/// How step instructions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionSource {
    /// Use the provider's prose, synthesising only when it is missing.
    Provider,
    /// Always synthesise from maneuver type, modifier and road name.
    Synthesized,
}

impl DirectionsResponse {
    /// Normalise the first route into a plan.
    pub fn into_plan(self, instructions: InstructionSource) -> Result<RoutePlan, DirectionsError> {
        if !self.code.eq_ignore_ascii_case("ok") {
            return Err(DirectionsError::NoRoute(match self.message {
                Some(message) => format!("{}: {}", self.code, message),
                None => self.code,
            }));
        }

        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| DirectionsError::NoRoute("empty route list".to_string()))?;

        let polyline = route
            .geometry
            .coordinates
            .into_iter()
            .map(Coordinate::from_lng_lat)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DirectionsError::Decode(e.to_string()))?;

        let steps = route
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|step| {
                let instruction = match (instructions, step.maneuver.instruction) {
                    (InstructionSource::Provider, Some(text)) if !text.trim().is_empty() => text,
                    _ => synthesize_instruction(
                        &step.maneuver.kind,
                        step.maneuver.modifier.as_deref(),
                        &step.name,
                    ),
                };
                RouteStep {
                    instruction,
                    maneuver_type: step.maneuver.kind,
                    road_name: step.name,
                    distance_meters: step.distance,
                    duration_seconds: step.duration,
                }
            })
            .collect();

        Ok(RoutePlan {
            polyline,
            distance_meters: Some(route.distance),
            duration_seconds: Some(route.duration),
            steps,
        })
    }
}

/// Build a readable instruction, e.g. "Turn left onto Rizal Avenue".
pub fn synthesize_instruction(maneuver_type: &str, modifier: Option<&str>, road_name: &str) -> String {
    let road = road_name.trim();

    if maneuver_type == "arrive" {
        return match modifier {
            Some(side @ ("left" | "right")) => format!("Arrive at destination on the {}", side),
            _ => "Arrive at destination".to_string(),
        };
    }
    if modifier == Some("uturn") {
        return with_road("Make a U-turn", "onto", road);
    }

    let phrase = match maneuver_type {
        "depart" => return with_road("Depart", "on", road),
        "turn" | "end of road" => format!("Turn {}", modifier.unwrap_or("ahead")),
        "continue" | "new name" | "notification" => match modifier {
            Some(m) if m != "straight" => format!("Continue {}", m),
            _ => "Continue straight".to_string(),
        },
        "merge" => match modifier {
            Some(m) => format!("Merge {}", m),
            None => "Merge".to_string(),
        },
        "fork" => format!("Keep {}", modifier.unwrap_or("straight")),
        "on ramp" => match modifier {
            Some(m) => format!("Take the ramp on the {}", m),
            None => "Take the ramp".to_string(),
        },
        "off ramp" => match modifier {
            Some(m) => format!("Take the exit on the {}", m),
            None => "Take the exit".to_string(),
        },
        "roundabout" | "rotary" | "roundabout turn" | "exit roundabout" | "exit rotary" => {
            "Enter the roundabout".to_string()
        }
        _ => match modifier {
            Some(m) => format!("Go {}", m),
            None => "Continue".to_string(),
        },
    };

    with_road(&phrase, "onto", road)
}

fn with_road(phrase: &str, preposition: &str, road: &str) -> String {
    if road.is_empty() {
        phrase.to_string()
    } else {
        format!("{} {} {}", phrase, preposition, road)
    }
}
