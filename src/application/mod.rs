// Application layer - Use cases and the collaborator traits they depend on
pub mod active_run;
pub mod diversion;
pub mod fleet_api;
pub mod geo_sampler;
pub mod route_guidance;
pub mod stop_tracker;
pub mod telemetry_uploader;
