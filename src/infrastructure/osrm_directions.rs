// OSRM route service adapter (keyless public fallback provider)
use crate::application::route_guidance::{DirectionsError, DirectionsProvider};
use crate::domain::geo::Coordinate;
use crate::domain::route::RoutePlan;
use crate::infrastructure::directions_response::{DirectionsResponse, InstructionSource};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmDirections {
    config: OsrmConfig,
    client: reqwest::Client,
}

impl OsrmDirections {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn route_url(&self, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson&steps=true",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            origin.lng,
            origin.lat,
            destination.lng,
            destination.lat
        )
    }
}

#[async_trait]
impl DirectionsProvider for OsrmDirections {
    fn name(&self) -> &str {
        "osrm"
    }

    async fn directions(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RoutePlan, DirectionsError> {
        let response = self.client.get(self.route_url(origin, destination)).send().await?;

        // OSRM reports NoRoute/InvalidQuery with a 400 and a JSON body.
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<DirectionsResponse>(&body) {
            Ok(parsed) => parsed.into_plan(InstructionSource::Synthesized),
            Err(_) if !status.is_success() => Err(DirectionsError::Status {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(DirectionsError::Decode(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url_uses_lng_lat_order() {
        let osrm = OsrmDirections::new(OsrmConfig {
            base_url: "http://localhost:5000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = osrm.route_url(
            Coordinate { lat: 14.6, lng: 121.0 },
            Coordinate { lat: 14.7, lng: 121.1 },
        );

        assert_eq!(
            url,
            "http://localhost:5000/route/v1/driving/121.000000,14.600000;121.100000,14.700000?overview=full&geometries=geojson&steps=true"
        );
    }
}
