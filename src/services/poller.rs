//! Location poller
//!
//! Fires on a fixed period and, per tick, fetches the last known location,
//! publishes it under this device's identity and forwards it to the view as
//! the latest own fix.
//!
//! Ticks do not wait for each other: each fetch runs as its own task, so a
//! slow provider can have several fetches in flight. Whichever completes last
//! wins both in the store and on the fix channel.
//!
//! The timer lives exactly as long as its `PollerHandle`. Call `stop()` on
//! teardown; dropping the handle also stops the timer but logs a warning.

use crate::domain::types::{DeviceIdentity, LocationFix, LocationSample};
use crate::infra::metrics::Metrics;
use crate::io::location::LocationProvider;
use crate::io::platform::PermissionGate;
use crate::services::publisher::LocationPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Everything a single tick needs, shared by in-flight fetches
struct PollContext {
    provider: Arc<dyn LocationProvider>,
    publisher: LocationPublisher,
    identity: DeviceIdentity,
    permissions: Arc<dyn PermissionGate>,
    fixes: watch::Sender<Option<LocationFix>>,
    metrics: Arc<Metrics>,
}

impl PollContext {
    async fn poll_once(&self) {
        let Some(fix) = self.provider.last_location().await else {
            self.metrics.record_fix_missing();
            debug!("location_fix_missing");
            return;
        };

        self.fixes.send_replace(Some(fix));

        let sample = LocationSample::from_fix(self.identity.derived_id(), fix);
        // Failure is already logged and counted; the next tick publishes a fresher sample
        let _ = self.publisher.publish(&sample).await;
    }
}

pub struct LocationPoller {
    ctx: Arc<PollContext>,
    period: Duration,
}

impl LocationPoller {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        publisher: LocationPublisher,
        identity: DeviceIdentity,
        permissions: Arc<dyn PermissionGate>,
        period: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (fixes, _) = watch::channel(None);
        Self {
            ctx: Arc::new(PollContext { provider, publisher, identity, permissions, fixes, metrics }),
            period,
        }
    }

    /// Latest own fix, updated by every completed fetch
    pub fn fixes(&self) -> watch::Receiver<Option<LocationFix>> {
        self.ctx.fixes.subscribe()
    }

    /// Start the timer; the first tick fires immediately
    pub fn start(self) -> PollerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.ctx, self.period, stop_rx));
        PollerHandle { stop_tx: Some(stop_tx), task: Some(task) }
    }
}

async fn run(ctx: Arc<PollContext>, period: Duration, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();

    info!(
        device_id = %ctx.identity.derived_id(),
        period_ms = %period.as_millis(),
        "location_poller_started"
    );

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                ctx.metrics.record_poll_tick();
                if !ctx.permissions.fine_location() {
                    ctx.metrics.record_permission_missing();
                    debug!("location_poll_skipped_no_permission");
                    continue;
                }
                let ctx = ctx.clone();
                in_flight.spawn(async move { ctx.poll_once().await });
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    in_flight.abort_all();
    info!("location_poller_stopped");
}

/// Cancellation handle for a running poller
pub struct PollerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel the timer and wait for the poller task to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        // Dropping the sender also ends the loop
        if self.stop_tx.take().is_some() {
            warn!("location_poller_dropped_without_stop");
        }
    }
}
