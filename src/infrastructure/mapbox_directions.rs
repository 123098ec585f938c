// Mapbox Directions adapter (token-gated primary provider)
use crate::application::route_guidance::{DirectionsError, DirectionsProvider};
use crate::domain::geo::Coordinate;
use crate::domain::route::RoutePlan;
use crate::infrastructure::directions_response::{DirectionsResponse, InstructionSource};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MapboxConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub profile: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MapboxDirections {
    config: MapboxConfig,
    client: reqwest::Client,
}

impl MapboxDirections {
    pub fn new(config: MapboxConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn route_url(&self, token: &str, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/directions/v5/mapbox/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson&steps=true&access_token={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            origin.lng,
            origin.lat,
            destination.lng,
            destination.lat,
            urlencoding::encode(token)
        )
    }
}

#[async_trait]
impl DirectionsProvider for MapboxDirections {
    fn name(&self) -> &str {
        "mapbox"
    }

    async fn directions(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RoutePlan, DirectionsError> {
        let token = self
            .config
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DirectionsError::NotConfigured("mapbox access token missing".to_string()))?;

        let response = self
            .client
            .get(self.route_url(token, origin, destination))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectionsError::Status { status, body });
        }

        let parsed = response.json::<DirectionsResponse>().await?;
        parsed.into_plan(InstructionSource::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> MapboxConfig {
        MapboxConfig {
            base_url: "https://api.mapbox.com".to_string(),
            access_token: token.map(str::to_string),
            profile: "driving".to_string(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn test_route_url_encodes_token() {
        let mapbox = MapboxDirections::new(config(Some("pk.a/b"))).unwrap();
        let url = mapbox.route_url(
            "pk.a/b",
            Coordinate { lat: 14.6, lng: 121.0 },
            Coordinate { lat: 14.7, lng: 121.1 },
        );

        assert!(url.starts_with(
            "https://api.mapbox.com/directions/v5/mapbox/driving/121.000000,14.600000;121.100000,14.700000?"
        ));
        assert!(url.ends_with("access_token=pk.a%2Fb"));
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_request() {
        let mapbox = MapboxDirections::new(config(None)).unwrap();
        let result = mapbox
            .directions(Coordinate { lat: 14.6, lng: 121.0 }, Coordinate { lat: 14.7, lng: 121.1 })
            .await;

        assert!(matches!(result, Err(DirectionsError::NotConfigured(_))));
    }
}
