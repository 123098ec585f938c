// Domain layer - Pure types and policies for an active collection run
pub mod geo;
pub mod route;
pub mod sample;
pub mod throttle;
