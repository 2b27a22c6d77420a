//! Host geofencing service interface
//!
//! The registrar submits `GeofencingBatch`es to a `GeofencingService`, which
//! later delivers `TransitionDelivery` payloads to the process-wide
//! `TransitionBus` it was bound to at registration time.
//!
//! `EmulatedGeofencing` evaluates registered regions against position fixes
//! itself, for hosts without a native geofencing subsystem.

use crate::domain::types::{
    epoch_ms, LatLng, TransitionDelivery, TransitionMask, TransitionType,
};
use crate::io::location::LocationProvider;
use crate::services::transition_bus::TransitionBus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Native monitoring request for one circular region; never expires
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRequest {
    pub region_id: String,
    pub center: LatLng,
    pub radius_m: f64,
    pub transitions: TransitionMask,
    pub dwell_delay_ms: u64,
    /// Returned verbatim with every delivery for this region
    pub description: String,
}

/// Batch submitted in a single registration call
#[derive(Debug, Clone, PartialEq)]
pub struct GeofencingBatch {
    pub requests: Vec<GeofenceRequest>,
    /// Transitions to fire if the device is already inside at registration
    pub initial_trigger: TransitionMask,
}

/// Host OS geofencing subsystem
#[async_trait]
pub trait GeofencingService: Send + Sync {
    /// Register every request in `batch`; deliveries go to `target`
    async fn add_geofences(&self, batch: GeofencingBatch, target: TransitionBus) -> Result<(), String>;
}

struct Monitored {
    request: GeofenceRequest,
    initial_trigger: TransitionMask,
    target: TransitionBus,
    /// None until the first fix after registration
    inside: Option<bool>,
    entered_at_ms: Option<u64>,
    dwell_fired: bool,
}

impl Monitored {
    /// Advance the region's crossing state for one fix
    fn step(&mut self, position: &LatLng, now_ms: u64) -> Vec<TransitionType> {
        let mask = self.request.transitions;
        let inside_now = self.request.center.distance_m(position) <= self.request.radius_m;
        let mut fired = Vec::new();

        match (self.inside, inside_now) {
            (None, true) => {
                self.entered_at_ms = Some(now_ms);
                if self.initial_trigger.contains(TransitionType::Enter)
                    && mask.contains(TransitionType::Enter)
                {
                    fired.push(TransitionType::Enter);
                }
            }
            (Some(false), true) => {
                self.entered_at_ms = Some(now_ms);
                self.dwell_fired = false;
                if mask.contains(TransitionType::Enter) {
                    fired.push(TransitionType::Enter);
                }
            }
            (Some(true), false) => {
                self.entered_at_ms = None;
                self.dwell_fired = false;
                if mask.contains(TransitionType::Exit) {
                    fired.push(TransitionType::Exit);
                }
            }
            _ => {}
        }
        self.inside = Some(inside_now);

        if let Some(entered_at) = self.entered_at_ms {
            if inside_now
                && !self.dwell_fired
                && mask.contains(TransitionType::Dwell)
                && now_ms.saturating_sub(entered_at) >= self.request.dwell_delay_ms
            {
                self.dwell_fired = true;
                fired.push(TransitionType::Dwell);
            }
        }

        fired
    }
}

/// Software geofencing driven by periodic location fixes
pub struct EmulatedGeofencing {
    monitored: Mutex<Vec<Monitored>>,
    max_geofences: usize,
    unavailable: AtomicBool,
}

impl EmulatedGeofencing {
    pub fn new(max_geofences: usize) -> Self {
        Self { monitored: Mutex::new(Vec::new()), max_geofences, unavailable: AtomicBool::new(false) }
    }

    /// Make registrations fail, as when the host service is disabled
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn monitored_ids(&self) -> Vec<String> {
        self.monitored.lock().iter().map(|m| m.request.region_id.clone()).collect()
    }

    /// Evaluate every monitored region against `position`
    ///
    /// Returns the number of deliveries handed to transition targets.
    pub fn observe(&self, position: LatLng, now_ms: u64) -> usize {
        let mut deliveries = Vec::new();
        {
            let mut monitored = self.monitored.lock();
            for region in monitored.iter_mut() {
                for transition in region.step(&position, now_ms) {
                    let delivery = TransitionDelivery {
                        region_id: region.request.region_id.clone(),
                        transition_code: transition.code(),
                        error_code: None,
                        description: region.request.description.clone(),
                        timestamp_ms: now_ms,
                    };
                    deliveries.push((region.target.clone(), delivery));
                }
            }
        }

        let count = deliveries.len();
        for (target, delivery) in deliveries {
            debug!(
                region_id = %delivery.region_id,
                transition = %delivery.transition_code,
                "geofence_transition_emitted"
            );
            target.deliver(delivery);
        }
        count
    }

    /// Sample `provider` every `period` and evaluate regions until shutdown
    pub async fn run(
        self: Arc<Self>,
        provider: Arc<dyn LocationProvider>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = %period.as_millis(), "geofence_emulator_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("geofence_emulator_stopped");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(fix) = provider.last_location().await {
                        self.observe(fix.position, epoch_ms());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl GeofencingService for EmulatedGeofencing {
    async fn add_geofences(&self, batch: GeofencingBatch, target: TransitionBus) -> Result<(), String> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err("geofencing service not available".to_string());
        }

        let mut monitored = self.monitored.lock();
        let replaced = batch
            .requests
            .iter()
            .filter(|r| monitored.iter().any(|m| m.request.region_id == r.region_id))
            .count();
        let total = monitored.len() - replaced + batch.requests.len();
        if total > self.max_geofences {
            warn!(requested = %total, limit = %self.max_geofences, "geofence_limit_exceeded");
            return Err(format!("too many geofences: {total} > {}", self.max_geofences));
        }

        for request in batch.requests {
            monitored.retain(|m| m.request.region_id != request.region_id);
            monitored.push(Monitored {
                request,
                initial_trigger: batch.initial_trigger,
                target: target.clone(),
                inside: None,
                entered_at_ms: None,
                dwell_fired: false,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;

    const CENTER: LatLng = LatLng::new(12.9716, 77.5946);
    const FAR: LatLng = LatLng::new(12.9816, 77.5946);

    fn request(id: &str, dwell_delay_ms: u64) -> GeofenceRequest {
        GeofenceRequest {
            region_id: id.to_string(),
            center: CENTER,
            radius_m: 100.0,
            transitions: TransitionMask::ALL,
            dwell_delay_ms,
            description: format!("{id} description"),
        }
    }

    fn batch(requests: Vec<GeofenceRequest>) -> GeofencingBatch {
        GeofencingBatch { requests, initial_trigger: TransitionMask::ENTER }
    }

    fn codes(bus_rx: &mut crate::services::transition_bus::TransitionSubscription) -> Vec<i32> {
        let mut out = Vec::new();
        while let Some(d) = bus_rx.try_next() {
            out.push(d.transition_code);
        }
        out
    }

    #[tokio::test]
    async fn test_enter_dwell_exit() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let mut rx = bus.attach();
        let service = EmulatedGeofencing::new(100);
        service.add_geofences(batch(vec![request("Library", 1000)]), bus.clone()).await.unwrap();

        service.observe(FAR, 0);
        service.observe(CENTER, 100);
        service.observe(CENTER, 600);
        service.observe(CENTER, 1200);
        service.observe(CENTER, 5000);
        service.observe(FAR, 6000);

        assert_eq!(codes(&mut rx), vec![1, 4, 2]);
    }

    #[tokio::test]
    async fn test_initial_trigger_enter() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let mut rx = bus.attach();
        let service = EmulatedGeofencing::new(100);
        service.add_geofences(batch(vec![request("Library", 60_000)]), bus.clone()).await.unwrap();

        service.observe(CENTER, 0);
        assert_eq!(codes(&mut rx), vec![1]);
    }

    #[tokio::test]
    async fn test_no_initial_trigger() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let mut rx = bus.attach();
        let service = EmulatedGeofencing::new(100);
        let mut b = batch(vec![request("Library", 60_000)]);
        b.initial_trigger = TransitionMask::NONE;
        service.add_geofences(b, bus.clone()).await.unwrap();

        service.observe(CENTER, 0);
        assert!(codes(&mut rx).is_empty());

        service.observe(FAR, 10);
        assert_eq!(codes(&mut rx), vec![2]);
    }

    #[tokio::test]
    async fn test_mask_filters_transitions() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let mut rx = bus.attach();
        let service = EmulatedGeofencing::new(100);
        let mut req = request("Gym", 0);
        req.transitions = TransitionMask::EXIT;
        service.add_geofences(batch(vec![req]), bus.clone()).await.unwrap();

        service.observe(FAR, 0);
        service.observe(CENTER, 10);
        service.observe(FAR, 20);
        assert_eq!(codes(&mut rx), vec![2]);
    }

    #[tokio::test]
    async fn test_delivery_carries_description() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let mut rx = bus.attach();
        let service = EmulatedGeofencing::new(100);
        service.add_geofences(batch(vec![request("Library", 60_000)]), bus.clone()).await.unwrap();

        service.observe(CENTER, 0);
        let delivery = rx.try_next().unwrap();
        assert_eq!(delivery.region_id, "Library");
        assert_eq!(delivery.description, "Library description");
        assert_eq!(delivery.error_code, None);
    }

    #[tokio::test]
    async fn test_limit_exceeded() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let service = EmulatedGeofencing::new(2);
        let requests = vec![request("a", 0), request("b", 0), request("c", 0)];

        assert!(service.add_geofences(batch(requests), bus).await.is_err());
        assert!(service.monitored_ids().is_empty());
    }

    #[tokio::test]
    async fn test_same_id_replaces() {
        let bus = TransitionBus::new(16, Arc::new(Metrics::new()));
        let service = EmulatedGeofencing::new(1);
        service.add_geofences(batch(vec![request("a", 0)]), bus.clone()).await.unwrap();
        service.add_geofences(batch(vec![request("a", 0)]), bus.clone()).await.unwrap();
        assert_eq!(service.monitored_ids(), vec!["a".to_string()]);
    }
}
