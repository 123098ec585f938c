// Route guidance - directions with provider fallback and latest-wins publication
use crate::domain::geo::Coordinate;
use crate::domain::route::RoutePlan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectionsError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no route found: {0}")]
    NoRoute(String),
}

impl From<reqwest::Error> for DirectionsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DirectionsError::Decode(e.to_string())
        } else {
            DirectionsError::Http(e.to_string())
        }
    }
}

/// An external service computing a drivable path between two points.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn directions(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RoutePlan, DirectionsError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOutcome {
    pub plan: RoutePlan,
    /// Provider that produced the plan, `None` for the straight-line fallback.
    pub provider: Option<String>,
    pub routing_failed: bool,
}

/// Ordered chain of directions providers. The first provider that returns
/// a non-empty route wins; when all fail the caller gets a straight line.
#[derive(Clone)]
pub struct RouteGuidance {
    providers: Vec<Arc<dyn DirectionsProvider>>,
}

impl RouteGuidance {
    pub fn new(providers: Vec<Arc<dyn DirectionsProvider>>) -> Self {
        Self { providers }
    }

    pub async fn compute_route(&self, origin: Coordinate, destination: Coordinate) -> RouteOutcome {
        for provider in &self.providers {
            match provider.directions(origin, destination).await {
                Ok(plan) if plan.polyline.len() >= 2 => {
                    tracing::debug!(
                        provider = provider.name(),
                        distance_m = plan.distance_meters,
                        steps = plan.steps.len(),
                        "Route computed"
                    );
                    return RouteOutcome {
                        plan,
                        provider: Some(provider.name().to_string()),
                        routing_failed: false,
                    };
                }
                Ok(_) => {
                    tracing::warn!(provider = provider.name(), "Provider returned an empty geometry");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Directions provider failed");
                }
            }
        }

        tracing::warn!("All directions providers failed, falling back to straight line");
        RouteOutcome {
            plan: RoutePlan::straight_line(origin, destination),
            provider: None,
            routing_failed: true,
        }
    }
}

/// Sequence number handed out for each route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn seq(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedPlan {
    pub seq: u64,
    pub destination: Coordinate,
    pub outcome: RouteOutcome,
    pub computed_at: DateTime<Utc>,
}

/// Holds the plan currently shown to the operator.
///
/// Requests may resolve in any order; only a response carrying the most
/// recently issued ticket is accepted, so a slow stale response can never
/// overwrite a fresher plan.
#[derive(Debug, Default)]
pub struct PlanBoard {
    issued: AtomicU64,
    current: RwLock<Option<PublishedPlan>>,
}

impl PlanBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestTicket {
        RequestTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn latest_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Store the outcome if `ticket` is still the latest issued.
    /// Returns whether the outcome was accepted.
    pub fn publish(&self, ticket: RequestTicket, destination: Coordinate, outcome: RouteOutcome) -> bool {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());

        let latest = self.latest_issued();
        if ticket.seq() != latest {
            tracing::debug!(seq = ticket.seq(), latest, "Discarding stale route response");
            return false;
        }

        *current = Some(PublishedPlan {
            seq: ticket.seq(),
            destination,
            outcome,
            computed_at: Utc::now(),
        });
        true
    }

    /// Drop the current plan and invalidate every in-flight request.
    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        self.issued.fetch_add(1, Ordering::SeqCst);
        *current = None;
    }

    pub fn current(&self) -> Option<PublishedPlan> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
pub mod fake {
    //! Directions providers with canned behaviour.
    use super::*;
    use crate::domain::route::RouteStep;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    pub struct FakeProvider {
        pub name: String,
        pub fail: bool,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn ok(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail: false,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name)
            }
        }
    }

    #[async_trait]
    impl DirectionsProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn directions(
            &self,
            origin: Coordinate,
            destination: Coordinate,
        ) -> Result<RoutePlan, DirectionsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(DirectionsError::Http("connection refused".to_string()));
            }

            Ok(RoutePlan {
                polyline: vec![origin, destination],
                distance_meters: Some(1200.0),
                duration_seconds: Some(180.0),
                steps: vec![RouteStep {
                    instruction: "Head north".to_string(),
                    maneuver_type: "depart".to_string(),
                    road_name: String::new(),
                    distance_meters: 1200.0,
                    duration_seconds: 180.0,
                }],
            })
        }
    }
}
