
use crate::domain::geo::Coordinate;
use crate::domain::throttle::ThrottlePolicy;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub api: ApiSettings,
    pub run: RunConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub gps: GpsSettings,
    #[serde(default)]
    pub directions: DirectionsSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub paths: ApiPaths,
}

/// Endpoint paths relative to `base_url`. `${routeId}` is substituted.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiPaths {
    pub route_details: String,
    pub stop_status: String,
    pub route_status: String,
    pub location_ingest: String,
    pub event_log: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            route_details: "/routes/${routeId}".to_string(),
            stop_status: "/stops/status".to_string(),
            route_status: "/routes/status".to_string(),
            location_ingest: "/locations".to_string(),
            event_log: "/events".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub route_id: String,
    pub depot: Coordinate,
    #[serde(default = "default_undo_display_secs")]
    pub undo_display_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionSettings {
    pub driver_id: Option<String>,
    pub user_id: Option<String>,
    pub profile_json: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleGate {
    #[default]
    TimeOrDistance,
    TimeOnly,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThrottleSettings {
    pub gate: ThrottleGate,
    pub min_interval_ms: u64,
    pub min_distance_meters: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            gate: ThrottleGate::TimeOrDistance,
            min_interval_ms: 5000,
            min_distance_meters: 20.0,
        }
    }
}

impl ThrottleSettings {
    pub fn policy(&self) -> ThrottlePolicy {
        let min_interval = Duration::from_millis(self.min_interval_ms);
        match self.gate {
            ThrottleGate::TimeOnly => ThrottlePolicy::time_only(min_interval),
            ThrottleGate::TimeOrDistance => ThrottlePolicy {
                min_interval,
                min_distance_meters: Some(self.min_distance_meters),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpsSettings {
    pub gpsd_addr: String,
    pub fix_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for GpsSettings {
    fn default() -> Self {
        Self {
            gpsd_addr: "127.0.0.1:2947".to_string(),
            fix_timeout_secs: 30,
            initial_backoff_ms: 1000,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DirectionsSettings {
    pub mapbox_token: Option<String>,
    pub mapbox_base_url: String,
    pub osrm_base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for DirectionsSettings {
    fn default() -> Self {
        Self {
            mapbox_token: None,
            mapbox_base_url: "https://api.mapbox.com".to_string(),
            osrm_base_url: "https://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_undo_display_secs() -> u64 {
    6
}

/// Load `config/tracker.toml`, overlaid by `TRACKER__SECTION__KEY` variables.
pub fn load_tracker_config() -> anyhow::Result<TrackerConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/tracker").required(false))
        .add_source(
            config::Environment::with_prefix("TRACKER")
                .prefix_separator("__")
                .separator("__"),
        );

    build_config(builder)
}

fn build_config(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<TrackerConfig> {
    let settings: TrackerConfig = builder.build()?.try_deserialize()?;

    if Coordinate::new(settings.run.depot.lat, settings.run.depot.lng).is_err() {
        anyhow::bail!(
            "invalid depot coordinate: lat={}, lng={}",
            settings.run.depot.lat,
            settings.run.depot.lng
        );
    }
    if settings.run.route_id.trim().is_empty() {
        anyhow::bail!("run.route_id must not be empty");
    }

    Ok(settings)
}

/// Replace `${name}` placeholders in an endpoint template
pub fn expand_template(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}
