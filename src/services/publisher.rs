//! Location publisher
//!
//! Writes the local sample under `locations/{deviceId}`, replacing whatever
//! was there. Failures are logged and counted, never retried.

use crate::domain::error::CoreError;
use crate::domain::types::LocationSample;
use crate::infra::metrics::Metrics;
use crate::io::store::{store_path, SharedStore, LOCATIONS};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LocationPublisher {
    store: Arc<dyn SharedStore>,
    metrics: Arc<Metrics>,
}

impl LocationPublisher {
    pub fn new(store: Arc<dyn SharedStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Write one sample; the previous value for this device is overwritten
    pub async fn publish(&self, sample: &LocationSample) -> Result<(), CoreError> {
        let value = json!({
            "latitude": sample.position.lat,
            "longitude": sample.position.lng,
            "updated_at": sample.captured_at_ms,
        });

        match self.store.write(LOCATIONS, &sample.device_id, value).await {
            Ok(()) => {
                self.metrics.record_publish_ok();
                debug!(device_id = %sample.device_id, position = %sample.position, "location_published");
                Ok(())
            }
            Err(source) => {
                self.metrics.record_publish_failure();
                let path = store_path(LOCATIONS, &sample.device_id);
                warn!(path = %path, error = %source, "location_publish_failed");
                Err(CoreError::PublishFailure { path, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LatLng;
    use crate::io::store::MemoryStore;

    fn sample(id: &str, lat: f64, lng: f64) -> LocationSample {
        LocationSample { device_id: id.to_string(), position: LatLng::new(lat, lng), captured_at_ms: 42 }
    }

    #[tokio::test]
    async fn test_publish_writes_entry() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new());
        let publisher = LocationPublisher::new(store.clone(), metrics.clone());

        publisher.publish(&sample("dev-1", 12.9716, 77.5946)).await.unwrap();

        let value = store.read(LOCATIONS, "dev-1").await.unwrap().unwrap();
        assert_eq!(value["latitude"].as_f64().unwrap(), 12.9716);
        assert_eq!(value["longitude"].as_f64().unwrap(), 77.5946);
        assert_eq!(value["updated_at"].as_u64().unwrap(), 42);
        assert_eq!(metrics.publishes_ok(), 1);
    }

    #[tokio::test]
    async fn test_publish_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let publisher = LocationPublisher::new(store.clone(), Arc::new(Metrics::new()));

        publisher.publish(&sample("dev-1", 1.0, 2.0)).await.unwrap();
        publisher.publish(&sample("dev-1", 3.0, 4.0)).await.unwrap();

        let all = store.read_collection(LOCATIONS).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["dev-1"]["latitude"].as_f64().unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let metrics = Arc::new(Metrics::new());
        let publisher = LocationPublisher::new(store, metrics.clone());

        let err = publisher.publish(&sample("dev-1", 1.0, 2.0)).await.unwrap_err();
        assert!(matches!(err, CoreError::PublishFailure { ref path, .. } if path == "locations/dev-1"));
        assert_eq!(metrics.publish_failures(), 1);
    }
}
