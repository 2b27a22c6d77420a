//! Geofence definitions from the shared store
//!
//! One read of `geofences/*` per load; no retry, no cache. Entries look like
//! `{ Latitude, Longitude, Description }` with optional `Radius` and
//! `DwellDelayMs` overrides.

use crate::domain::error::CoreError;
use crate::domain::types::{GeofenceRegion, LatLng, TransitionMask};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::store::{SharedStore, GEOFENCES};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Applied to every region unless the entry overrides them
#[derive(Debug, Clone, Copy)]
pub struct RegionDefaults {
    pub radius_m: f64,
    pub dwell_delay_ms: u64,
    pub transitions: TransitionMask,
}

impl RegionDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            radius_m: config.default_radius_m(),
            dwell_delay_ms: config.dwell_delay_ms(),
            transitions: config.transition_mask(),
        }
    }
}

pub struct RegionConfigLoader {
    store: Arc<dyn SharedStore>,
    defaults: RegionDefaults,
    metrics: Arc<Metrics>,
}

impl RegionConfigLoader {
    pub fn new(store: Arc<dyn SharedStore>, defaults: RegionDefaults, metrics: Arc<Metrics>) -> Self {
        Self { store, defaults, metrics }
    }

    /// Read every geofence definition
    ///
    /// A store failure yields `ConfigUnavailable`; callers continue with no
    /// regions.
    pub async fn load(&self) -> Result<Vec<GeofenceRegion>, CoreError> {
        let snapshot = match self.store.read_collection(GEOFENCES).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_config_unavailable();
                warn!(error = %e, "geofence_config_unavailable");
                return Err(CoreError::ConfigUnavailable(e.to_string()));
            }
        };

        let mut regions = Vec::with_capacity(snapshot.len());
        for (id, entry) in &snapshot {
            match self.region_from_entry(id, entry) {
                Ok(region) => {
                    info!(
                        region_id = %region.id,
                        center = %region.center,
                        radius_m = %region.radius_m,
                        "geofence_loaded"
                    );
                    regions.push(region);
                }
                Err(e) => warn!(region_id = %id, error = %e, "geofence_skipped"),
            }
        }

        self.metrics.set_regions_loaded(regions.len());
        info!(count = %regions.len(), "geofence_config_loaded");
        Ok(regions)
    }

    fn region_from_entry(&self, id: &str, entry: &Value) -> Result<GeofenceRegion, CoreError> {
        let latitude = coordinate_or_zero(id, entry, "Latitude");
        let longitude = coordinate_or_zero(id, entry, "Longitude");
        let description = entry.get("Description").and_then(Value::as_str).unwrap_or_default();
        let radius_m = entry.get("Radius").and_then(Value::as_f64).unwrap_or(self.defaults.radius_m);
        let dwell_delay_ms = entry
            .get("DwellDelayMs")
            .and_then(Value::as_u64)
            .unwrap_or(self.defaults.dwell_delay_ms);

        GeofenceRegion::new(
            id,
            LatLng::new(latitude, longitude),
            radius_m,
            description,
            self.defaults.transitions,
            dwell_delay_ms,
        )
    }
}

/// Missing or non-numeric coordinates default to 0.0
fn coordinate_or_zero(id: &str, entry: &Value, field: &'static str) -> f64 {
    match entry.get(field).and_then(Value::as_f64) {
        Some(v) => v,
        None => {
            warn!(region_id = %id, field = %field, "geofence_coordinate_defaulted");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use serde_json::json;

    fn defaults() -> RegionDefaults {
        RegionDefaults { radius_m: 100.0, dwell_delay_ms: 30_000, transitions: TransitionMask::ALL }
    }

    fn loader(store: Arc<MemoryStore>, metrics: Arc<Metrics>) -> RegionConfigLoader {
        RegionConfigLoader::new(store, defaults(), metrics)
    }

    #[tokio::test]
    async fn test_load_regions() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(
                GEOFENCES,
                "Library",
                json!({"Latitude": 12.97, "Longitude": 77.59, "Description": "Library description"}),
            )
            .await
            .unwrap();
        store
            .write(GEOFENCES, "Gym", json!({"Latitude": 1.0, "Longitude": 2.0, "Radius": 250.0}))
            .await
            .unwrap();
        let metrics = Arc::new(Metrics::new());

        let regions = loader(store, metrics.clone()).load().await.unwrap();
        assert_eq!(regions.len(), 2);

        let gym = regions.iter().find(|r| r.id == "Gym").unwrap();
        assert_eq!(gym.radius_m, 250.0);
        assert_eq!(gym.description, "");

        let library = regions.iter().find(|r| r.id == "Library").unwrap();
        assert_eq!(library.center, LatLng::new(12.97, 77.59));
        assert_eq!(library.radius_m, 100.0);
        assert_eq!(library.dwell_delay_ms, 30_000);
        assert_eq!(library.description, "Library description");
        assert_eq!(metrics.report().regions_loaded, 2);
    }

    #[tokio::test]
    async fn test_missing_coordinates_default_to_zero() {
        let store = Arc::new(MemoryStore::new());
        store.write(GEOFENCES, "Nowhere", json!({"Description": "d"})).await.unwrap();

        let regions = loader(store, Arc::new(Metrics::new())).load().await.unwrap();
        assert_eq!(regions[0].center, LatLng::new(0.0, 0.0));
    }

    #[tokio::test]
    async fn test_invalid_radius_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.write(GEOFENCES, "Bad", json!({"Latitude": 1.0, "Longitude": 1.0, "Radius": -1.0})).await.unwrap();
        store.write(GEOFENCES, "Good", json!({"Latitude": 1.0, "Longitude": 1.0})).await.unwrap();

        let regions = loader(store, Arc::new(Metrics::new())).load().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id, "Good");
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let metrics = Arc::new(Metrics::new());

        let result = loader(store, metrics.clone()).load().await;
        assert!(matches!(result, Err(CoreError::ConfigUnavailable(_))));
        assert_eq!(metrics.report().config_unavailable, 1);
    }
}
