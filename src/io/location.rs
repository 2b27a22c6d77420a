//! Device location sources
//!
//! `LocationProvider` mirrors a platform's "last known location" query: it
//! may return nothing, and it may take a while to answer.

use crate::domain::types::{LatLng, LocationFix};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Last known position, or None if the platform has no fix yet
    async fn last_location(&self) -> Option<LocationFix>;
}

/// Walks a fixed route on the clock, spending `step` at each waypoint
///
/// The position depends only on elapsed time, so any number of consumers can
/// query it without moving the device.
pub struct ScriptedLocationProvider {
    waypoints: Vec<LatLng>,
    step: Duration,
    started: Instant,
    latency: Duration,
}

impl ScriptedLocationProvider {
    pub fn new(waypoints: Vec<LatLng>, step: Duration) -> Self {
        Self { waypoints, step, started: Instant::now(), latency: Duration::ZERO }
    }

    /// Delay every answer, as a real fused-location query would
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Waypoint the route is at right now
    pub fn position(&self) -> Option<LatLng> {
        if self.waypoints.is_empty() {
            return None;
        }
        let step_ms = self.step.as_millis().max(1);
        let index = (self.started.elapsed().as_millis() / step_ms) % self.waypoints.len() as u128;
        Some(self.waypoints[index as usize])
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocationProvider {
    async fn last_location(&self) -> Option<LocationFix> {
        // Sampled when asked; the answer arrives after the latency
        let position = self.position()?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Some(LocationFix::now(position))
    }
}

/// Position set directly by the caller
#[derive(Default)]
pub struct ManualLocationProvider {
    position: Mutex<Option<LatLng>>,
}

impl ManualLocationProvider {
    pub fn new(position: Option<LatLng>) -> Self {
        Self { position: Mutex::new(position) }
    }

    pub fn set(&self, position: Option<LatLng>) {
        *self.position.lock() = position;
    }
}

#[async_trait]
impl LocationProvider for ManualLocationProvider {
    async fn last_location(&self) -> Option<LocationFix> {
        let position = *self.position.lock();
        position.map(LocationFix::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const A: LatLng = LatLng::new(1.0, 2.0);
    const B: LatLng = LatLng::new(3.0, 4.0);

    #[tokio::test(start_paused = true)]
    async fn test_scripted_follows_clock() {
        let provider = ScriptedLocationProvider::new(vec![A, B], Duration::from_secs(1));

        assert_eq!(provider.last_location().await.unwrap().position, A);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(provider.last_location().await.unwrap().position, B);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.last_location().await.unwrap().position, A);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_queries_do_not_advance_route() {
        let provider = ScriptedLocationProvider::new(vec![A, B], Duration::from_secs(1));

        for _ in 0..5 {
            assert_eq!(provider.last_location().await.unwrap().position, A);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_concurrent_consumers_agree() {
        let provider = Arc::new(
            ScriptedLocationProvider::new(vec![A, B, LatLng::new(5.0, 6.0)], Duration::from_secs(1))
                .with_latency(Duration::from_millis(200)),
        );
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let emulator = provider.clone();
        let poller = provider.clone();
        let (first, second) = tokio::join!(
            tokio::spawn(async move { emulator.last_location().await }),
            tokio::spawn(async move { poller.last_location().await })
        );

        assert_eq!(first.unwrap().unwrap().position, B);
        assert_eq!(second.unwrap().unwrap().position, B);
    }

    #[tokio::test]
    async fn test_scripted_empty_has_no_fix() {
        let provider = ScriptedLocationProvider::new(Vec::new(), Duration::from_secs(1));
        assert!(provider.last_location().await.is_none());
    }

    #[tokio::test]
    async fn test_manual() {
        let provider = ManualLocationProvider::new(None);
        assert!(provider.last_location().await.is_none());

        provider.set(Some(LatLng::new(10.0, 20.0)));
        assert_eq!(provider.last_location().await.unwrap().position, LatLng::new(10.0, 20.0));
    }
}
