// HTTP implementation of the fleet backend
use crate::application::fleet_api::{EventLog, FleetApi, LocationReport, RouteStatusUpdate};
use crate::domain::route::{RouteDetails, StopId, StopStatus};
use crate::infrastructure::config::{expand_template, ApiSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpFleetApi {
    settings: ApiSettings,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopStatusBody<'a> {
    stop_id: &'a StopId,
    status: StopStatus,
}

impl HttpFleetApi {
    pub fn new(settings: ApiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build fleet API client")?;

        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .authorize(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {} failed with status {}: {}", url, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("POST {} failed with status {}: {}", url, status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl FleetApi for HttpFleetApi {
    async fn route_details(&self, route_id: &str) -> Result<RouteDetails> {
        let mut vars = HashMap::new();
        vars.insert("routeId", route_id);
        let path = expand_template(&self.settings.paths.route_details, &vars);

        self.get_json(&path).await
    }

    async fn update_stop_status(&self, stop_id: &StopId, status: StopStatus) -> Result<()> {
        let body = StopStatusBody { stop_id, status };
        self.post_json(&self.settings.paths.stop_status, &body).await
    }

    async fn update_route_status(&self, update: &RouteStatusUpdate) -> Result<()> {
        self.post_json(&self.settings.paths.route_status, update).await
    }

    async fn post_location(&self, report: &LocationReport) -> Result<()> {
        self.post_json(&self.settings.paths.location_ingest, report).await
    }

    async fn log_event(&self, event: &EventLog) -> Result<()> {
        self.post_json(&self.settings.paths.event_log, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::route::RouteStatus;
    use crate::infrastructure::config::ApiPaths;

    fn api(base_url: &str) -> HttpFleetApi {
        HttpFleetApi::new(ApiSettings {
            base_url: base_url.to_string(),
            token: None,
            timeout_secs: 1,
            paths: ApiPaths::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(api("https://fleet.example.org/api/").url("/events"), "https://fleet.example.org/api/events");
        assert_eq!(api("https://fleet.example.org").url("/locations"), "https://fleet.example.org/locations");
    }

    #[test]
    fn test_request_bodies_are_camel_case() {
        let stop_id = StopId::from("s-4");
        let body = serde_json::to_value(StopStatusBody {
            stop_id: &stop_id,
            status: StopStatus::Visited,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"stopId": "s-4", "status": "visited"}));

        let update = serde_json::to_value(RouteStatusUpdate {
            route_id: "R-1".to_string(),
            status: RouteStatus::InProgress,
            truck_full: true,
            note: None,
            user_id: Some("u-1".to_string()),
        })
        .unwrap();
        assert_eq!(
            update,
            serde_json::json!({
                "routeId": "R-1",
                "status": "in_progress",
                "truckFull": true,
                "note": null,
                "userId": "u-1"
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let api = api("http://127.0.0.1:9");
        assert!(api.route_details("R-1").await.is_err());
        assert!(api.log_event(&EventLog {
            event_type: "vehicle_emptied".to_string(),
            context: serde_json::Value::Null,
        })
        .await
        .is_err());
    }
}
