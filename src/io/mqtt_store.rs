//! Shared store backed by retained MQTT topics
//!
//! Each key lives on its own retained topic `{prefix}/{collection}/{key}` with
//! a JSON payload. An empty retained payload deletes the key. A background
//! event loop mirrors every retained message into per-collection snapshots,
//! so reads are served locally and subscriptions see the full collection.

use crate::infra::config::Config;
use crate::io::store::{Mirror, SharedStore, Snapshot, StoreError, StoreSubscription};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Split `{prefix}/{collection}/{key}` into `(collection, key)`
pub fn split_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (collection, key) = rest.split_once('/')?;
    if collection.is_empty() || key.is_empty() || key.contains('/') {
        return None;
    }
    Some((collection, key))
}

/// MQTT-backed shared store client
pub struct MqttStore {
    client: AsyncClient,
    prefix: String,
    mirror: Arc<Mirror>,
    connected: Arc<AtomicBool>,
    synced: watch::Receiver<bool>,
    sync_timeout: Duration,
}

impl MqttStore {
    /// Create the client and spawn its event loop
    ///
    /// Returns immediately; the connection is established in the background.
    /// The event loop runs until `shutdown` flips to true.
    pub fn connect(config: &Config, mut shutdown: watch::Receiver<bool>) -> Self {
        let client_id = format!("{}-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.store_host(), config.store_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.store_username(), config.store_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let prefix = config.store_prefix().trim_end_matches('/').to_string();
        let mirror = Arc::new(Mirror::default());
        let connected = Arc::new(AtomicBool::new(false));
        let (synced_tx, synced_rx) = watch::channel(false);
        let synced_tx = Arc::new(synced_tx);
        let sync_timeout = Duration::from_millis(config.store_sync_timeout_ms());

        let loop_client = client.clone();
        let loop_prefix = prefix.clone();
        let loop_mirror = mirror.clone();
        let loop_connected = connected.clone();
        tokio::spawn(async move {
            let filter = format!("{loop_prefix}/#");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("store_shutdown");
                            let _ = loop_client.try_disconnect();
                            return;
                        }
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                loop_connected.store(true, Ordering::Relaxed);
                                info!(filter = %filter, "store_connected");
                                // Clean session: subscriptions must be renewed on every connect
                                if let Err(e) = loop_client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                                    warn!(error = %e, "store_subscribe_failed");
                                }
                                let synced_tx = synced_tx.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(sync_timeout).await;
                                    synced_tx.send_replace(true);
                                });
                            }
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                apply_publish(&loop_mirror, &loop_prefix, &publish.topic, &publish.payload);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                if loop_connected.swap(false, Ordering::Relaxed) {
                                    warn!(error = %e, "store_disconnected");
                                } else {
                                    debug!(error = %e, "store_connect_retry");
                                }
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        });

        Self { client, prefix, mirror, connected, synced: synced_rx, sync_timeout }
    }

    fn topic(&self, collection: &str, key: &str) -> String {
        format!("{}/{}/{}", self.prefix, collection, key)
    }

    /// Wait until the first retained sync window after connecting has passed
    async fn wait_synced(&self) -> Result<(), StoreError> {
        // Allow for connection setup on top of the sync window itself
        let limit = self.sync_timeout * 2 + Duration::from_secs(5);
        wait_for_sync(&self.synced, limit).await
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }
}

/// Wait for `synced` to turn true, or fail after `limit`
async fn wait_for_sync(synced: &watch::Receiver<bool>, limit: Duration) -> Result<(), StoreError> {
    let mut synced = synced.clone();
    // Release the watch guard before `synced` goes out of scope
    let outcome = tokio::time::timeout(limit, synced.wait_for(|s| *s)).await.map(|r| r.map(|_| ()));
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(StoreError::Disconnected),
        Err(_) => Err(StoreError::Unavailable(format!(
            "no store connection within {}ms",
            limit.as_millis()
        ))),
    }
}

/// Fold one retained publish into the local mirror
fn apply_publish(mirror: &Mirror, prefix: &str, topic: &str, payload: &[u8]) {
    let Some((collection, key)) = split_topic(prefix, topic) else {
        debug!(topic = %topic, "store_topic_ignored");
        return;
    };

    if payload.is_empty() {
        mirror.delete(collection, key);
        return;
    }

    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => mirror.put(collection, key, value),
        Err(e) => warn!(topic = %topic, error = %e, "store_payload_invalid"),
    }
}

#[async_trait]
impl SharedStore for MqttStore {
    async fn read_collection(&self, collection: &str) -> Result<Snapshot, StoreError> {
        self.wait_synced().await?;
        Ok(self.mirror.snapshot(collection))
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.wait_synced().await?;
        Ok(self.mirror.get(collection, key))
    }

    async fn write(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let payload = serde_json::to_vec(&value)?;
        self.client
            .publish(self.topic(collection, key), QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        // Read-your-writes; the broker echo re-applies the same value
        self.mirror.put(collection, key, value);
        Ok(())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.client
            .publish(self.topic(collection, key), QoS::AtLeastOnce, true, Vec::new())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.mirror.delete(collection, key);
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<StoreSubscription, StoreError> {
        Ok(self.mirror.subscribe(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_topic() {
        assert_eq!(split_topic("geolive", "geolive/locations/abc"), Some(("locations", "abc")));
        assert_eq!(split_topic("geolive", "geolive/geofences/Library"), Some(("geofences", "Library")));
        assert_eq!(split_topic("geolive", "other/locations/abc"), None);
        assert_eq!(split_topic("geolive", "geolive/locations"), None);
        assert_eq!(split_topic("geolive", "geolive/locations/"), None);
        assert_eq!(split_topic("geolive", "geolive/locations/a/b"), None);
        assert_eq!(split_topic("geolive", "geolivex/locations/a"), None);
    }

    #[test]
    fn test_apply_publish_put_and_delete() {
        let mirror = Mirror::default();
        let payload = serde_json::to_vec(&json!({"latitude": 1.5, "longitude": 2.5})).unwrap();

        apply_publish(&mirror, "geolive", "geolive/locations/dev", &payload);
        assert_eq!(mirror.get("locations", "dev"), Some(json!({"latitude": 1.5, "longitude": 2.5})));

        apply_publish(&mirror, "geolive", "geolive/locations/dev", &[]);
        assert_eq!(mirror.get("locations", "dev"), None);
    }

    #[test]
    fn test_apply_publish_ignores_invalid_json() {
        let mirror = Mirror::default();
        apply_publish(&mirror, "geolive", "geolive/locations/dev", b"{not json");
        assert!(mirror.snapshot("locations").is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_sync_ready() {
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        assert!(wait_for_sync(&rx, Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sync_becomes_ready() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send_replace(true);
            // Keep the sender alive past the flip
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        assert!(wait_for_sync(&rx, Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sync_times_out() {
        let (_tx, rx) = watch::channel(false);
        let result = wait_for_sync(&rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_wait_for_sync_sender_gone() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let result = wait_for_sync(&rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(StoreError::Disconnected)));
    }
}
