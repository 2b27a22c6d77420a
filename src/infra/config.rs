//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{LatLng, TransitionMask, TransitionType};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mqtt,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "geolive".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    /// Topic prefix under which collections live
    #[serde(default = "default_store_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Window for retained state to arrive after subscribing
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Mqtt
}

fn default_store_host() -> String {
    "localhost".to_string()
}

fn default_store_port() -> u16 {
    1883
}

fn default_store_prefix() -> String {
    "geolive".to_string()
}

fn default_sync_timeout_ms() -> u64 {
    1500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            host: default_store_host(),
            port: default_store_port(),
            prefix: default_store_prefix(),
            username: None,
            password: None,
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: default_broker_bind_address(), port: default_store_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_ms: default_poll_interval_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default = "default_radius_m")]
    pub default_radius_m: f64,
    #[serde(default = "default_dwell_delay_ms")]
    pub dwell_delay_ms: u64,
    #[serde(default = "default_transitions")]
    pub transitions: Vec<TransitionType>,
    #[serde(default = "default_true")]
    pub initial_trigger_enter: bool,
}

fn default_radius_m() -> f64 {
    100.0
}

fn default_dwell_delay_ms() -> u64 {
    30_000
}

fn default_transitions() -> Vec<TransitionType> {
    vec![TransitionType::Enter, TransitionType::Exit, TransitionType::Dwell]
}

fn default_true() -> bool {
    true
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            default_radius_m: default_radius_m(),
            dwell_delay_ms: default_dwell_delay_ms(),
            transitions: default_transitions(),
            initial_trigger_enter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_max_geofences")]
    pub max_geofences: usize,
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_max_geofences() -> usize {
    100
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: default_sample_interval_ms(),
            max_geofences: default_max_geofences(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Route as `[lat, lng]` pairs
    #[serde(default)]
    pub waypoints: Vec<[f64; 2]>,
    /// Time spent at each waypoint before moving to the next
    #[serde(default = "default_waypoint_step_ms")]
    pub step_ms: u64,
    #[serde(default)]
    pub fetch_latency_ms: u64,
}

fn default_waypoint_step_ms() -> u64 {
    10_000
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { waypoints: Vec::new(), step_ms: default_waypoint_step_ms(), fetch_latency_ms: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default = "default_platform_id_file")]
    pub platform_id_file: String,
}

fn default_platform_id_file() -> String {
    "install_id".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { platform_id: None, platform_id_file: default_platform_id_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_true")]
    pub fine_location: bool,
    #[serde(default = "default_true")]
    pub background_location: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self { fine_location: true, background_location: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_marker_circle_radius_m")]
    pub marker_circle_radius_m: f64,
    #[serde(default = "default_true")]
    pub follow_own_location: bool,
    #[serde(default = "default_camera_zoom")]
    pub camera_zoom: f32,
    /// 0 disables staleness filtering
    #[serde(default)]
    pub stale_entry_ttl_secs: u64,
}

fn default_marker_circle_radius_m() -> f64 {
    25.0
}

fn default_camera_zoom() -> f32 {
    14.0
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            marker_circle_radius_m: default_marker_circle_radius_m(),
            follow_own_location: true,
            camera_zoom: default_camera_zoom(),
            stale_entry_ttl_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

/// Geofence definition to seed into the shared store
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeofenceSeed {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub dwell_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub geofences: Vec<GeofenceSeed>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    store: StoreConfig,
    broker: BrokerConfig,
    poll_interval_ms: u64,
    geofence: GeofenceConfig,
    emulator: EmulatorConfig,
    waypoints: Vec<LatLng>,
    waypoint_step_ms: u64,
    fetch_latency_ms: u64,
    identity: IdentityConfig,
    permissions: PermissionsConfig,
    render: RenderConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    geofence_seeds: Vec<GeofenceSeed>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            store: toml_config.store,
            broker: toml_config.broker,
            poll_interval_ms: toml_config.poller.interval_ms,
            geofence: toml_config.geofence,
            emulator: toml_config.emulator,
            waypoints: toml_config
                .location
                .waypoints
                .iter()
                .map(|[lat, lng]| LatLng::new(*lat, *lng))
                .collect(),
            waypoint_step_ms: toml_config.location.step_ms,
            fetch_latency_ms: toml_config.location.fetch_latency_ms,
            identity: toml_config.identity,
            permissions: toml_config.permissions,
            render: toml_config.render,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            geofence_seeds: toml_config.geofences,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, path.display().to_string())
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, origin: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {origin}"))?;
        let config = Self::from_toml(toml_config, origin);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.poll_interval_ms > 0, "poller.interval_ms must be > 0");
        anyhow::ensure!(
            self.geofence.default_radius_m.is_finite() && self.geofence.default_radius_m > 0.0,
            "geofence.default_radius_m must be > 0"
        );
        anyhow::ensure!(self.emulator.sample_interval_ms > 0, "emulator.sample_interval_ms must be > 0");
        anyhow::ensure!(self.waypoint_step_ms > 0, "location.step_ms must be > 0");
        if let Some(bad) = self.waypoints.iter().find(|p| !p.is_valid()) {
            anyhow::bail!("location.waypoints contains invalid coordinate {bad}");
        }
        Ok(())
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store.backend
    }

    pub fn store_host(&self) -> &str {
        &self.store.host
    }

    pub fn store_port(&self) -> u16 {
        self.store.port
    }

    pub fn store_prefix(&self) -> &str {
        &self.store.prefix
    }

    pub fn store_username(&self) -> Option<&str> {
        self.store.username.as_deref()
    }

    pub fn store_password(&self) -> Option<&str> {
        self.store.password.as_deref()
    }

    pub fn store_sync_timeout_ms(&self) -> u64 {
        self.store.sync_timeout_ms
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker.bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker.port
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn default_radius_m(&self) -> f64 {
        self.geofence.default_radius_m
    }

    pub fn dwell_delay_ms(&self) -> u64 {
        self.geofence.dwell_delay_ms
    }

    pub fn transition_mask(&self) -> TransitionMask {
        TransitionMask::from_types(&self.geofence.transitions)
    }

    pub fn initial_trigger(&self) -> TransitionMask {
        if self.geofence.initial_trigger_enter {
            TransitionMask::ENTER
        } else {
            TransitionMask::NONE
        }
    }

    pub fn emulator_enabled(&self) -> bool {
        self.emulator.enabled
    }

    pub fn emulator_sample_interval_ms(&self) -> u64 {
        self.emulator.sample_interval_ms
    }

    pub fn max_geofences(&self) -> usize {
        self.emulator.max_geofences
    }

    pub fn waypoints(&self) -> &[LatLng] {
        &self.waypoints
    }

    pub fn waypoint_step_ms(&self) -> u64 {
        self.waypoint_step_ms
    }

    pub fn fetch_latency_ms(&self) -> u64 {
        self.fetch_latency_ms
    }

    pub fn platform_id(&self) -> Option<&str> {
        self.identity.platform_id.as_deref()
    }

    pub fn platform_id_file(&self) -> &str {
        &self.identity.platform_id_file
    }

    pub fn fine_location_granted(&self) -> bool {
        self.permissions.fine_location
    }

    pub fn background_location_granted(&self) -> bool {
        self.permissions.background_location
    }

    pub fn marker_circle_radius_m(&self) -> f64 {
        self.render.marker_circle_radius_m
    }

    /// Camera zoom when following the local device, None if following is off
    pub fn follow_zoom(&self) -> Option<f32> {
        self.render.follow_own_location.then_some(self.render.camera_zoom)
    }

    pub fn stale_entry_ttl_secs(&self) -> u64 {
        self.render.stale_entry_ttl_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn geofence_seeds(&self) -> &[GeofenceSeed] {
        &self.geofence_seeds
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to switch the store backend
    pub fn with_store_backend(mut self, backend: StoreBackend) -> Self {
        self.store.backend = backend;
        self
    }

    /// Builder method for tests to set the dwell delay
    pub fn with_dwell_delay_ms(mut self, ms: u64) -> Self {
        self.geofence.dwell_delay_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "geolive");
        assert_eq!(config.store_backend(), StoreBackend::Mqtt);
        assert_eq!(config.store_host(), "localhost");
        assert_eq!(config.store_port(), 1883);
        assert_eq!(config.poll_interval_ms(), 5000);
        assert_eq!(config.default_radius_m(), 100.0);
        assert_eq!(config.dwell_delay_ms(), 30_000);
        assert_eq!(config.transition_mask(), TransitionMask::ALL);
        assert_eq!(config.initial_trigger(), TransitionMask::ENTER);
        assert_eq!(config.marker_circle_radius_m(), 25.0);
        assert_eq!(config.follow_zoom(), Some(14.0));
        assert_eq!(config.prometheus_port(), 0);
        assert!(config.waypoints().is_empty());
        assert_eq!(config.waypoint_step_ms(), 10_000);
        assert!(config.geofence_seeds().is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
[poller]
interval_ms = 2000

[geofence]
transitions = ["enter", "exit"]
initial_trigger_enter = false
"#,
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms(), 2000);
        assert_eq!(config.dwell_delay_ms(), 30_000);
        assert!(!config.transition_mask().contains(TransitionType::Dwell));
        assert_eq!(config.initial_trigger(), TransitionMask::NONE);
        assert_eq!(config.store_prefix(), "geolive");
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = Config::from_toml_str("[poller]\ninterval_ms = 0\n", "inline".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_waypoint_step() {
        let result = Config::from_toml_str("[location]\nstep_ms = 0\n", "inline".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_invalid_waypoint() {
        let result =
            Config::from_toml_str("[location]\nwaypoints = [[91.0, 0.0]]\n", "inline".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["geofence-live".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "geofence-live".to_string(),
            "--config".to_string(),
            "config/campus.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/campus.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["geofence-live".to_string(), "--config=config/field.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/field.toml");
    }
}
