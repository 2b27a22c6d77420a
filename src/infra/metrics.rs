//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every counter so the poller, the delivery path and the
//! main context can record without contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive control flow.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Poller ticks fired
    poll_ticks: AtomicU64,
    /// Ticks where no last-known location was available
    fixes_missing: AtomicU64,
    /// Ticks or registrations skipped for missing permission
    permission_missing: AtomicU64,
    /// Samples written to the store
    publishes_ok: AtomicU64,
    /// Samples lost to store write failures
    publish_failures: AtomicU64,
    /// Regions produced by the most recent config load
    regions_loaded: AtomicU64,
    /// Config loads that could not reach the store
    config_unavailable: AtomicU64,
    /// Regions accepted by the geofencing service
    regions_registered: AtomicU64,
    /// Registration batches rejected
    registration_failures: AtomicU64,
    /// Transitions applied to region state
    transitions_applied: AtomicU64,
    /// Deliveries with an unrecognised transition code
    invalid_transitions: AtomicU64,
    /// Deliveries carrying a host error code
    transition_faults: AtomicU64,
    /// Deliveries dropped because no consumer was attached
    transitions_dropped: AtomicU64,
    /// Full redraws performed
    renders: AtomicU64,
    /// Markers drawn by the most recent redraw (gauge)
    markers_rendered: AtomicU64,
    /// Entries skipped for unparseable coordinates
    malformed_locations: AtomicU64,
    /// Entries skipped as older than the staleness TTL
    stale_locations: AtomicU64,
    /// Main-context operations attempted from another thread
    confinement_violations: AtomicU64,
    /// Redraw latency histogram
    render_latency_buckets: [AtomicU64; NUM_BUCKETS],
    render_latency_sum_us: AtomicU64,
    render_latency_max_us: AtomicU64,
    started_at: Instant,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            poll_ticks: AtomicU64::new(0),
            fixes_missing: AtomicU64::new(0),
            permission_missing: AtomicU64::new(0),
            publishes_ok: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            regions_loaded: AtomicU64::new(0),
            config_unavailable: AtomicU64::new(0),
            regions_registered: AtomicU64::new(0),
            registration_failures: AtomicU64::new(0),
            transitions_applied: AtomicU64::new(0),
            invalid_transitions: AtomicU64::new(0),
            transition_faults: AtomicU64::new(0),
            transitions_dropped: AtomicU64::new(0),
            renders: AtomicU64::new(0),
            markers_rendered: AtomicU64::new(0),
            malformed_locations: AtomicU64::new(0),
            stale_locations: AtomicU64::new(0),
            confinement_violations: AtomicU64::new(0),
            render_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            render_latency_sum_us: AtomicU64::new(0),
            render_latency_max_us: AtomicU64::new(0),
            started_at: Instant::now(),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_poll_tick(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_missing(&self) {
        self.fixes_missing.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_permission_missing(&self) {
        self.permission_missing.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_ok(&self) {
        self.publishes_ok.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_regions_loaded(&self, count: usize) {
        self.regions_loaded.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_config_unavailable(&self) {
        self.config_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_regions_registered(&self, count: usize) {
        self.regions_registered.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_registration_failure(&self) {
        self.registration_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_applied(&self) {
        self.transitions_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_transition(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_fault(&self) {
        self.transition_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_dropped(&self) {
        self.transitions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed_location(&self) {
        self.malformed_locations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_location(&self) {
        self.stale_locations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_confinement_violation(&self) {
        self.confinement_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed redraw and how many markers it produced
    #[inline]
    pub fn record_render(&self, markers: usize, latency_us: u64) {
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.markers_rendered.store(markers as u64, Ordering::Relaxed);
        self.render_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.render_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.render_latency_max_us, latency_us);
    }

    pub fn transitions_applied(&self) -> u64 {
        self.transitions_applied.load(Ordering::Relaxed)
    }

    pub fn invalid_transitions(&self) -> u64 {
        self.invalid_transitions.load(Ordering::Relaxed)
    }

    pub fn transition_faults(&self) -> u64 {
        self.transition_faults.load(Ordering::Relaxed)
    }

    pub fn transitions_dropped(&self) -> u64 {
        self.transitions_dropped.load(Ordering::Relaxed)
    }

    pub fn publishes_ok(&self) -> u64 {
        self.publishes_ok.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    pub fn malformed_locations(&self) -> u64 {
        self.malformed_locations.load(Ordering::Relaxed)
    }

    pub fn markers_rendered(&self) -> u64 {
        self.markers_rendered.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters
    ///
    /// Counters are monotonic; only the report clock is reset.
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let since_last_report_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let renders = self.renders.load(Ordering::Relaxed);
        let render_buckets = load_buckets(&self.render_latency_buckets);
        let render_avg_us = if renders > 0 {
            self.render_latency_sum_us.load(Ordering::Relaxed) / renders
        } else {
            0
        };

        MetricsSummary {
            uptime_secs: now.duration_since(self.started_at).as_secs(),
            since_last_report_secs,
            poll_ticks: self.poll_ticks.load(Ordering::Relaxed),
            fixes_missing: self.fixes_missing.load(Ordering::Relaxed),
            permission_missing: self.permission_missing.load(Ordering::Relaxed),
            publishes_ok: self.publishes_ok.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            regions_loaded: self.regions_loaded.load(Ordering::Relaxed),
            config_unavailable: self.config_unavailable.load(Ordering::Relaxed),
            regions_registered: self.regions_registered.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            invalid_transitions: self.invalid_transitions.load(Ordering::Relaxed),
            transition_faults: self.transition_faults.load(Ordering::Relaxed),
            transitions_dropped: self.transitions_dropped.load(Ordering::Relaxed),
            renders,
            markers_rendered: self.markers_rendered.load(Ordering::Relaxed),
            malformed_locations: self.malformed_locations.load(Ordering::Relaxed),
            stale_locations: self.stale_locations.load(Ordering::Relaxed),
            confinement_violations: self.confinement_violations.load(Ordering::Relaxed),
            render_latency_buckets: render_buckets,
            render_latency_avg_us: render_avg_us,
            render_latency_max_us: self.render_latency_max_us.load(Ordering::Relaxed),
            render_latency_p99_us: percentile_from_buckets(&render_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for exposition)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub since_last_report_secs: f64,
    pub poll_ticks: u64,
    pub fixes_missing: u64,
    pub permission_missing: u64,
    pub publishes_ok: u64,
    pub publish_failures: u64,
    pub regions_loaded: u64,
    pub config_unavailable: u64,
    pub regions_registered: u64,
    pub registration_failures: u64,
    pub transitions_applied: u64,
    pub invalid_transitions: u64,
    pub transition_faults: u64,
    pub transitions_dropped: u64,
    pub renders: u64,
    pub markers_rendered: u64,
    pub malformed_locations: u64,
    pub stale_locations: u64,
    pub confinement_violations: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub render_latency_buckets: [u64; NUM_BUCKETS],
    pub render_latency_avg_us: u64,
    pub render_latency_max_us: u64,
    pub render_latency_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            poll_ticks = %self.poll_ticks,
            fixes_missing = %self.fixes_missing,
            publishes_ok = %self.publishes_ok,
            publish_failures = %self.publish_failures,
            regions_loaded = %self.regions_loaded,
            regions_registered = %self.regions_registered,
            transitions_applied = %self.transitions_applied,
            invalid_transitions = %self.invalid_transitions,
            transitions_dropped = %self.transitions_dropped,
            renders = %self.renders,
            markers = %self.markers_rendered,
            malformed_locations = %self.malformed_locations,
            render_p99_us = %self.render_latency_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let summary = metrics.report();
        assert_eq!(summary.poll_ticks, 0);
        assert_eq!(summary.renders, 0);
        assert_eq!(summary.render_latency_p99_us, 0);
    }

    #[test]
    fn test_record_render() {
        let metrics = Metrics::new();
        metrics.record_render(3, 150);
        metrics.record_render(2, 50);

        let summary = metrics.report();
        assert_eq!(summary.renders, 2);
        assert_eq!(summary.markers_rendered, 2);
        assert_eq!(summary.render_latency_avg_us, 100);
        assert_eq!(summary.render_latency_max_us, 150);
        assert_eq!(summary.render_latency_buckets[0], 1);
        assert_eq!(summary.render_latency_buckets[1], 1);
    }

    #[test]
    fn test_counters_are_monotonic_across_reports() {
        let metrics = Metrics::new();
        metrics.record_invalid_transition();
        assert_eq!(metrics.report().invalid_transitions, 1);
        metrics.record_invalid_transition();
        assert_eq!(metrics.report().invalid_transitions, 2);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 99;
        buckets[5] = 1;
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 100);
        assert_eq!(percentile_from_buckets(&buckets, 1.0), 3200);
    }
}
