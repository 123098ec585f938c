// Geo sampler - continuous position observation with permission state
//
// Wraps a `PositionWatch` in a spawned poll loop and forwards every fix (or
// error) to the caller over an mpsc channel. The tracking status is
// published on a watch channel so the operator surface can show it.
use crate::domain::sample::LocationSample;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WatchError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position source unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a position fix")]
    Timeout,
}

/// A continuous position-watch primitive.
#[async_trait]
pub trait PositionWatch: Send {
    /// Wait for the next position fix.
    async fn next_fix(&mut self) -> Result<LocationSample, WatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    #[default]
    Idle,
    Requesting,
    Tracking,
    /// Terminal for the session: no further fixes are requested.
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SamplerEvent {
    Sample(LocationSample),
    Error(WatchError),
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

pub struct GeoSampler {
    config: SamplerConfig,
    status_tx: watch::Sender<TrackingStatus>,
    task: Option<JoinHandle<()>>,
}

impl GeoSampler {
    pub fn new(config: SamplerConfig) -> Self {
        let (status_tx, _) = watch::channel(TrackingStatus::Idle);
        Self {
            config,
            status_tx,
            task: None,
        }
    }

    pub fn status(&self) -> TrackingStatus {
        *self.status_tx.borrow()
    }

    /// Begin observing positions. Any previous observation is stopped first,
    /// which is also how a denied session is retried.
    pub fn start(&mut self, watch: Box<dyn PositionWatch>) -> mpsc::Receiver<SamplerEvent> {
        self.stop();

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.status_tx.send_replace(TrackingStatus::Requesting);

        let status_tx = self.status_tx.clone();
        let config = self.config.clone();
        self.task = Some(tokio::spawn(async move {
            run_watch(watch, tx, status_tx, config).await;
        }));

        rx
    }

    /// Release the position watch. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!("Position watch stopped");
        }

        self.status_tx.send_if_modified(|status| match status {
            TrackingStatus::Idle | TrackingStatus::Denied => false,
            _ => {
                *status = TrackingStatus::Idle;
                true
            }
        });
    }
}

impl Drop for GeoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_watch(
    mut watch: Box<dyn PositionWatch>,
    tx: mpsc::Sender<SamplerEvent>,
    status_tx: watch::Sender<TrackingStatus>,
    config: SamplerConfig,
) {
    tracing::info!("Position watch started");
    let mut consecutive_errors: u32 = 0;

    loop {
        match watch.next_fix().await {
            Ok(sample) => {
                consecutive_errors = 0;
                status_tx.send_if_modified(|status| {
                    let changed = *status != TrackingStatus::Tracking;
                    *status = TrackingStatus::Tracking;
                    changed
                });

                if tx.send(SamplerEvent::Sample(sample)).await.is_err() {
                    tracing::debug!("Sample channel closed, stopping position watch");
                    break;
                }
            }
            Err(WatchError::PermissionDenied) => {
                tracing::warn!("Location permission denied, tracking disabled for this session");
                status_tx.send_replace(TrackingStatus::Denied);
                let _ = tx.send(SamplerEvent::Error(WatchError::PermissionDenied)).await;
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(error = %e, consecutive_errors, "Position fix failed");

                if tx.send(SamplerEvent::Error(e)).await.is_err() {
                    break;
                }

                tokio::time::sleep(calculate_backoff(&config, consecutive_errors)).await;
            }
        }
    }
}

/// Exponential backoff: initial * 2^(n-1), capped at the configured maximum.
fn calculate_backoff(config: &SamplerConfig, consecutive_errors: u32) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_errors.saturating_sub(1).min(16));
    config
        .initial_backoff
        .saturating_mul(factor)
        .min(config.max_backoff)
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedWatch;
    use super::*;
    use crate::domain::geo::Coordinate;
    use chrono::Utc;

    fn fast_config() -> SamplerConfig {
        SamplerConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            channel_capacity: 8,
        }
    }

    fn sample(lat: f64) -> LocationSample {
        LocationSample::new(Coordinate { lat, lng: 121.0 }, Utc::now())
    }

    #[tokio::test]
    async fn test_requesting_then_tracking() {
        let mut sampler = GeoSampler::new(fast_config());
        assert_eq!(sampler.status(), TrackingStatus::Idle);

        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![Ok(sample(14.0))])));
        assert_eq!(sampler.status(), TrackingStatus::Requesting);

        match rx.recv().await {
            Some(SamplerEvent::Sample(s)) => assert_eq!(s.position, Coordinate { lat: 14.0, lng: 121.0 }),
            other => panic!("expected sample, got {:?}", other),
        }
        assert_eq!(sampler.status(), TrackingStatus::Tracking);
    }

    #[tokio::test]
    async fn test_denied_is_terminal() {
        let mut sampler = GeoSampler::new(fast_config());
        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![
            Err(WatchError::PermissionDenied),
            Ok(sample(14.0)),
        ])));

        assert_eq!(
            rx.recv().await,
            Some(SamplerEvent::Error(WatchError::PermissionDenied))
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(sampler.status(), TrackingStatus::Denied);

        sampler.stop();
        assert_eq!(sampler.status(), TrackingStatus::Denied);
    }

    #[tokio::test]
    async fn test_restart_after_denied() {
        let mut sampler = GeoSampler::new(fast_config());
        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![Err(
            WatchError::PermissionDenied,
        )])));
        let _ = rx.recv().await;
        assert_eq!(sampler.status(), TrackingStatus::Denied);

        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![Ok(sample(14.5))])));
        assert!(matches!(rx.recv().await, Some(SamplerEvent::Sample(_))));
        assert_eq!(sampler.status(), TrackingStatus::Tracking);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mut sampler = GeoSampler::new(fast_config());
        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![
            Err(WatchError::Timeout),
            Err(WatchError::Unavailable("no fix".to_string())),
            Ok(sample(14.2)),
        ])));

        assert_eq!(rx.recv().await, Some(SamplerEvent::Error(WatchError::Timeout)));
        assert!(matches!(
            rx.recv().await,
            Some(SamplerEvent::Error(WatchError::Unavailable(_)))
        ));
        match rx.recv().await {
            Some(SamplerEvent::Sample(s)) => assert_eq!(s.position.lat, 14.2),
            other => panic!("expected sample, got {:?}", other),
        }
        assert_eq!(sampler.status(), TrackingStatus::Tracking);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut sampler = GeoSampler::new(fast_config());
        let mut rx = sampler.start(Box::new(ScriptedWatch::new(vec![Ok(sample(14.0))])));
        let _ = rx.recv().await;

        sampler.stop();
        sampler.stop();
        assert_eq!(sampler.status(), TrackingStatus::Idle);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_calculate_backoff() {
        let config = SamplerConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            channel_capacity: 1,
        };
        assert_eq!(calculate_backoff(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_backoff(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_backoff(&config, 4), Duration::from_secs(8));
        assert_eq!(calculate_backoff(&config, 10), Duration::from_secs(30));
    }
}
