//! geofence-live - geofence transitions and live multi-device location sync
//!
//! Module structure:
//! - `domain/` - Core types (regions, transitions, samples) and errors
//! - `io/` - External interfaces (shared store, geofencing, location, view)
//! - `services/` - Business logic (registrar, handler, poller, renderer)
//! - `infra/` - Infrastructure (Config, Metrics, Broker, main context)

use clap::Parser;
use geofence_live::infra::{Config, MainContext, Metrics, StoreBackend};
use geofence_live::io::store::LOCATIONS;
use geofence_live::io::{
    EmulatedGeofencing, FilePlatformId, LocationProvider, LogView, MemoryStore, MqttStore,
    PermissionGate, PlatformIdSource, ScriptedLocationProvider, SharedStore, StaticPermissions,
    StaticPlatformId,
};
use geofence_live::services::{
    DeviceIdentityProvider, GeofenceRegistrar, LocationPoller, LocationPublisher, LocationRenderer,
    MapSession, RegionConfigLoader, RegionDefaults, TransitionBus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence transitions and live location sharing across devices
#[derive(Parser, Debug)]
#[command(name = "geofence-live", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

/// Transition deliveries buffered per attached session
const TRANSITION_BUS_CAPACITY: usize = 64;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-tick visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "geofence-live starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    geofence_live::infra::broker::start_embedded_broker(&config)?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        store_backend = ?config.store_backend(),
        store_host = %config.store_host(),
        store_port = %config.store_port(),
        poll_interval_ms = %config.poll_interval_ms(),
        dwell_delay_ms = %config.dwell_delay_ms(),
        emulator = %config.emulator_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let main_context = MainContext::current(metrics.clone());

    let store: Arc<dyn SharedStore> = match config.store_backend() {
        StoreBackend::Mqtt => Arc::new(MqttStore::connect(&config, shutdown_rx.clone())),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let permissions: Arc<dyn PermissionGate> = Arc::new(StaticPermissions {
        fine_location: config.fine_location_granted(),
        background_location: config.background_location_granted(),
    });

    let provider: Arc<dyn LocationProvider> = Arc::new(
        ScriptedLocationProvider::new(
            config.waypoints().to_vec(),
            Duration::from_millis(config.waypoint_step_ms()),
        )
        .with_latency(Duration::from_millis(config.fetch_latency_ms())),
    );

    let bus = TransitionBus::new(TRANSITION_BUS_CAPACITY, metrics.clone());

    // Software geofencing stands in for the host service
    let geofencing = Arc::new(EmulatedGeofencing::new(config.max_geofences()));
    if config.emulator_enabled() {
        let emulator = geofencing.clone();
        let emulator_provider = provider.clone();
        let period = Duration::from_millis(config.emulator_sample_interval_ms());
        let emulator_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            emulator.run(emulator_provider, period, emulator_shutdown).await;
        });
    }

    let renderer = LocationRenderer::new(
        config.marker_circle_radius_m(),
        Duration::from_secs(config.stale_entry_ttl_secs()),
        metrics.clone(),
    );
    let mut session =
        MapSession::new(LogView::new(), main_context, renderer, config.follow_zoom(), metrics.clone());

    // Geofence flow: load once, draw, register in the background
    let loader = RegionConfigLoader::new(store.clone(), RegionDefaults::from_config(&config), metrics.clone());
    let regions = match loader.load().await {
        Ok(regions) => regions,
        Err(e) => {
            warn!(error = %e, "running_without_geofences");
            Vec::new()
        }
    };
    session.show_regions(&regions);
    let registrar = Arc::new(GeofenceRegistrar::new(
        geofencing,
        permissions.clone(),
        bus.clone(),
        config.initial_trigger(),
        metrics.clone(),
    ));
    registrar.register_detached(regions);

    // Location flow: identity, then poll and publish
    let platform_id: Arc<dyn PlatformIdSource> = match config.platform_id() {
        Some(id) => Arc::new(StaticPlatformId(Some(id.to_string()))),
        None => Arc::new(FilePlatformId::new(config.platform_id_file())),
    };
    // A missing platform id is misconfiguration; derive() already logged it
    let identity = DeviceIdentityProvider::new(platform_id).derive()?;

    let publisher = LocationPublisher::new(store.clone(), metrics.clone());
    let poller = LocationPoller::new(
        provider,
        publisher,
        identity,
        permissions,
        Duration::from_millis(config.poll_interval_ms()),
        metrics.clone(),
    );
    let fixes = poller.fixes();
    let poller_handle = poller.start();

    let locations = store.subscribe(LOCATIONS).await?;
    let transitions = bus.attach();

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => return,
            }
        }
    });

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let site_id = config.site_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = geofence_live::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                site_id,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // The session owns the view and runs on the main context until shutdown
    let session = session.run(transitions, locations, fixes, shutdown_rx).await;
    poller_handle.stop().await;

    metrics.report().log();
    info!(
        markers = %session.view().state().markers().len(),
        "geofence-live shutdown complete"
    );
    Ok(())
}
