// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod directions_response;
pub mod gpsd_watch;
pub mod http_fleet_api;
pub mod mapbox_directions;
pub mod osrm_directions;
