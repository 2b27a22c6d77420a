//! Embedded MQTT broker using rumqttd
//!
//! Lets a single host serve as the shared store for every device on the
//! network. Retained messages hold the current value of each key, so the
//! broker is the only state the store needs.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Largest accepted store value; location and geofence documents are tiny
const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// How long startup waits for the listener to accept connections
const BIND_WAIT: Duration = Duration::from_secs(2);

/// Broker settings for one plain MQTT v4 listener
pub fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: 1024,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let listener = ServerSettings {
        name: "store-v4".to_string(),
        listen,
        tls: None,
        next_connection_delay_ms: 1,
        connections: ConnectionSettings {
            connection_timeout_ms: 5000,
            max_payload_size: MAX_PAYLOAD_BYTES,
            max_inflight_count: 100,
            auth: None,
            dynamic_filters: false,
            external_auth: None,
        },
    };

    Config {
        id: 0,
        router,
        v4: Some(HashMap::from([("store-v4".to_string(), listener)])),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the broker on its own thread if `[broker] enabled = true`
///
/// Returns once the listener accepts connections, or after a short grace
/// period with a warning.
pub fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<()> {
    if !app_config.broker_enabled() {
        return Ok(());
    }

    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr =
        addr.parse().with_context(|| format!("invalid broker bind address {addr}"))?;
    let config = broker_config(listen);

    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            // start() blocks for the lifetime of the broker
            if let Err(e) = Broker::new(config).start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("failed to spawn broker thread")?;

    if wait_until_listening(listen, BIND_WAIT) {
        info!(listen = %listen, "broker_started");
    } else {
        warn!(listen = %listen, wait_ms = %BIND_WAIT.as_millis(), "broker_not_listening_yet");
    }
    Ok(())
}

/// Poll `addr` until a TCP connection succeeds or `limit` elapses
fn wait_until_listening(addr: SocketAddr, limit: Duration) -> bool {
    // Wildcard listeners are reached through loopback
    let probe = if addr.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    } else {
        addr
    };

    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&probe, Duration::from_millis(100)).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_broker_config_single_v4_listener() {
        let listen: SocketAddr = "127.0.0.1:18830".parse().unwrap();
        let config = broker_config(listen);

        let v4 = config.v4.unwrap();
        assert_eq!(v4.len(), 1);
        assert_eq!(v4["store-v4"].listen, listen);
        assert!(config.v5.is_none());
    }

    #[test]
    fn test_disabled_broker_is_noop() {
        assert!(start_embedded_broker(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_wait_until_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(wait_until_listening(addr, Duration::from_millis(500)));
    }
}
