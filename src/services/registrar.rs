//! Geofence registrar
//!
//! Turns loaded regions into one native monitoring request each and submits
//! them as a single batch, bound to the process-wide `TransitionBus`. The
//! outcome is only logged: nothing waits on it and nothing retries.

use crate::domain::error::CoreError;
use crate::domain::types::{GeofenceRegion, TransitionMask};
use crate::infra::metrics::Metrics;
use crate::io::geofencing::{GeofenceRequest, GeofencingBatch, GeofencingService};
use crate::io::platform::PermissionGate;
use crate::services::transition_bus::TransitionBus;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationResult {
    pub registered: usize,
}

pub struct GeofenceRegistrar {
    service: Arc<dyn GeofencingService>,
    permissions: Arc<dyn PermissionGate>,
    bus: TransitionBus,
    initial_trigger: TransitionMask,
    metrics: Arc<Metrics>,
}

impl GeofenceRegistrar {
    pub fn new(
        service: Arc<dyn GeofencingService>,
        permissions: Arc<dyn PermissionGate>,
        bus: TransitionBus,
        initial_trigger: TransitionMask,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { service, permissions, bus, initial_trigger, metrics }
    }

    /// One request per region; requests carry no expiry
    pub fn build_requests(regions: &[GeofenceRegion]) -> Vec<GeofenceRequest> {
        regions
            .iter()
            .map(|region| GeofenceRequest {
                region_id: region.id.clone(),
                center: region.center,
                radius_m: region.radius_m,
                transitions: region.transitions,
                dwell_delay_ms: region.dwell_delay_ms,
                description: region.description.clone(),
            })
            .collect()
    }

    /// Submit every region in one batch
    pub async fn register(&self, regions: &[GeofenceRegion]) -> Result<RegistrationResult, CoreError> {
        if !self.permissions.fine_location() {
            self.metrics.record_permission_missing();
            warn!(regions = %regions.len(), "geofence_registration_skipped_no_permission");
            return Err(CoreError::PermissionMissing);
        }
        if !self.permissions.background_location() {
            warn!("background_location_not_granted_transitions_may_not_arrive");
        }
        if regions.is_empty() {
            info!("geofence_registration_skipped_no_regions");
            return Ok(RegistrationResult { registered: 0 });
        }

        let batch = GeofencingBatch {
            requests: Self::build_requests(regions),
            initial_trigger: self.initial_trigger,
        };
        let count = batch.requests.len();

        match self.service.add_geofences(batch, self.bus.clone()).await {
            Ok(()) => {
                self.metrics.record_regions_registered(count);
                info!(count = %count, "geofences_registered");
                Ok(RegistrationResult { registered: count })
            }
            Err(reason) => {
                self.metrics.record_registration_failure();
                warn!(count = %count, error = %reason, "geofence_registration_failed");
                Err(CoreError::RegistrationFailure(reason))
            }
        }
    }

    /// Register in the background; the caller may be gone by completion
    pub fn register_detached(self: Arc<Self>, regions: Vec<GeofenceRegion>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Outcome is logged inside register
            let _ = self.register(&regions).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LatLng;
    use crate::io::geofencing::EmulatedGeofencing;
    use crate::io::platform::StaticPermissions;

    fn regions(n: usize) -> Vec<GeofenceRegion> {
        (0..n)
            .map(|i| {
                GeofenceRegion::new(
                    format!("region-{i}"),
                    LatLng::new(10.0 + i as f64, 20.0),
                    100.0,
                    format!("region {i} description"),
                    TransitionMask::ALL,
                    30_000,
                )
                .unwrap()
            })
            .collect()
    }

    fn registrar(
        service: Arc<EmulatedGeofencing>,
        permissions: StaticPermissions,
        metrics: Arc<Metrics>,
    ) -> GeofenceRegistrar {
        let bus = TransitionBus::new(16, metrics.clone());
        GeofenceRegistrar::new(service, Arc::new(permissions), bus, TransitionMask::ENTER, metrics)
    }

    #[test]
    fn test_one_request_per_region() {
        let regions = regions(5);
        let requests = GeofenceRegistrar::build_requests(&regions);

        assert_eq!(requests.len(), 5);
        for (region, request) in regions.iter().zip(&requests) {
            assert_eq!(request.region_id, region.id);
            assert_eq!(request.description, region.description);
            assert_eq!(request.radius_m, region.radius_m);
            assert_eq!(request.dwell_delay_ms, region.dwell_delay_ms);
        }
    }

    #[tokio::test]
    async fn test_register() {
        let service = Arc::new(EmulatedGeofencing::new(100));
        let metrics = Arc::new(Metrics::new());
        let registrar = registrar(service.clone(), StaticPermissions::granted(), metrics.clone());

        let result = registrar.register(&regions(3)).await.unwrap();
        assert_eq!(result.registered, 3);
        assert_eq!(service.monitored_ids().len(), 3);
        assert_eq!(metrics.report().regions_registered, 3);
    }

    #[tokio::test]
    async fn test_permission_missing_fails_fast() {
        let service = Arc::new(EmulatedGeofencing::new(100));
        let registrar = registrar(service.clone(), StaticPermissions::denied(), Arc::new(Metrics::new()));

        assert!(matches!(registrar.register(&regions(2)).await, Err(CoreError::PermissionMissing)));
        assert!(service.monitored_ids().is_empty());
    }

    #[tokio::test]
    async fn test_service_rejection() {
        let service = Arc::new(EmulatedGeofencing::new(100));
        service.set_unavailable(true);
        let metrics = Arc::new(Metrics::new());
        let registrar = registrar(service, StaticPermissions::granted(), metrics.clone());

        assert!(matches!(
            registrar.register(&regions(1)).await,
            Err(CoreError::RegistrationFailure(_))
        ));
        assert_eq!(metrics.report().registration_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_region_list() {
        let service = Arc::new(EmulatedGeofencing::new(100));
        let registrar = registrar(service, StaticPermissions::granted(), Arc::new(Metrics::new()));
        assert_eq!(registrar.register(&[]).await.unwrap().registered, 0);
    }

    #[tokio::test]
    async fn test_detached_registration_outlives_caller() {
        let service = Arc::new(EmulatedGeofencing::new(100));
        let registrar =
            Arc::new(registrar(service.clone(), StaticPermissions::granted(), Arc::new(Metrics::new())));

        let task = registrar.register_detached(regions(2));
        task.await.unwrap();
        assert_eq!(service.monitored_ids().len(), 2);
    }
}
