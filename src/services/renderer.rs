//! Remote location renderer
//!
//! Every store notification carries the full `locations` collection. Each
//! one clears the device layer and redraws it from scratch: one marker
//! titled with the device id plus a small circle per entry.
//!
//! Coordinates arrive loosely typed (numbers, or numeric strings from older
//! writers). An entry that fails to parse is skipped with a warning; the rest
//! of the redraw continues.

use crate::domain::error::CoreError;
use crate::domain::types::{epoch_ms, LatLng, RemoteLocationEntry};
use crate::infra::metrics::Metrics;
use crate::io::store::Snapshot;
use crate::io::view::{Circle, MapView, Marker};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one redraw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub rendered: usize,
    pub skipped_malformed: usize,
    pub skipped_stale: usize,
}

/// Parse one coordinate from a number or a numeric string
pub fn parse_coordinate(value: Option<&Value>) -> Result<f64, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Err("missing".to_string()),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("unrepresentable number {n}"))?,
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| format!("not a number: {s:?}"))?,
        Some(other) => return Err(format!("unexpected type: {other}")),
    };
    if !parsed.is_finite() {
        return Err(format!("not finite: {parsed}"));
    }
    Ok(parsed)
}

/// Decode a `locations/{deviceId}` value
pub fn parse_entry(device_id: &str, value: &Value) -> Result<RemoteLocationEntry, CoreError> {
    let malformed = |field: &'static str, reason: String| CoreError::MalformedLocationValue {
        key: device_id.to_string(),
        field,
        reason,
    };

    let lat = parse_coordinate(value.get("latitude")).map_err(|r| malformed("latitude", r))?;
    let lng = parse_coordinate(value.get("longitude")).map_err(|r| malformed("longitude", r))?;
    let position = LatLng::new(lat, lng);
    if !position.is_valid() {
        return Err(malformed("position", format!("out of range: {position}")));
    }

    Ok(RemoteLocationEntry {
        device_id: device_id.to_string(),
        position,
        updated_at_ms: value.get("updated_at").and_then(Value::as_u64),
    })
}

pub struct LocationRenderer {
    circle_radius_m: f64,
    /// Zero disables the staleness filter
    stale_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl LocationRenderer {
    pub fn new(circle_radius_m: f64, stale_ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self { circle_radius_m, stale_ttl, metrics }
    }

    /// Replace the device layer with the contents of `snapshot`
    pub fn render<V: MapView>(&self, snapshot: &Snapshot, view: &mut V) -> RenderReport {
        self.render_at(snapshot, view, epoch_ms())
    }

    pub fn render_at<V: MapView>(&self, snapshot: &Snapshot, view: &mut V, now_ms: u64) -> RenderReport {
        let started = Instant::now();
        let mut report = RenderReport::default();

        view.clear_locations();
        for (device_id, value) in snapshot {
            let entry = match parse_entry(device_id, value) {
                Ok(entry) => entry,
                Err(e) => {
                    report.skipped_malformed += 1;
                    self.metrics.record_malformed_location();
                    warn!(device_id = %device_id, error = %e, "location_entry_skipped");
                    continue;
                }
            };

            if self.is_stale(&entry, now_ms) {
                report.skipped_stale += 1;
                self.metrics.record_stale_location();
                debug!(device_id = %device_id, "location_entry_stale");
                continue;
            }

            view.add_location_marker(Marker { title: entry.device_id, position: entry.position });
            view.add_location_circle(Circle::cornflower(entry.position, self.circle_radius_m));
            report.rendered += 1;
        }

        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_render(report.rendered, latency_us);
        debug!(
            rendered = %report.rendered,
            malformed = %report.skipped_malformed,
            stale = %report.skipped_stale,
            latency_us = %latency_us,
            "locations_rendered"
        );
        report
    }

    fn is_stale(&self, entry: &RemoteLocationEntry, now_ms: u64) -> bool {
        if self.stale_ttl.is_zero() {
            return false;
        }
        match entry.updated_at_ms {
            Some(at) => now_ms.saturating_sub(at) > self.stale_ttl.as_millis() as u64,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::view::MapState;
    use serde_json::json;

    fn renderer(stale_ttl: Duration) -> (LocationRenderer, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (LocationRenderer::new(25.0, stale_ttl, metrics.clone()), metrics)
    }

    fn snapshot(entries: &[(&str, Value)]) -> Snapshot {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate(Some(&json!(12.5))), Ok(12.5));
        assert_eq!(parse_coordinate(Some(&json!("12.5"))), Ok(12.5));
        assert_eq!(parse_coordinate(Some(&json!(" -3 "))), Ok(-3.0));
        assert!(parse_coordinate(Some(&json!("abc"))).is_err());
        assert!(parse_coordinate(Some(&json!(true))).is_err());
        assert!(parse_coordinate(Some(&Value::Null)).is_err());
        assert!(parse_coordinate(Some(&json!("NaN"))).is_err());
        assert!(parse_coordinate(None).is_err());
    }

    #[test]
    fn test_parse_entry_out_of_range() {
        let err = parse_entry("dev", &json!({"latitude": 95.0, "longitude": 10.0})).unwrap_err();
        assert!(matches!(err, CoreError::MalformedLocationValue { field: "position", .. }));
    }

    #[test]
    fn test_two_devices() {
        let (renderer, metrics) = renderer(Duration::ZERO);
        let mut view = MapState::new();
        let snap = snapshot(&[
            ("A", json!({"latitude": 10.0, "longitude": 20.0})),
            ("B", json!({"latitude": 30.0, "longitude": 40.0})),
        ]);

        let report = renderer.render(&snap, &mut view);
        assert_eq!(report.rendered, 2);
        assert_eq!(view.markers().len(), 2);
        assert_eq!(view.circles().len(), 2);
        assert_eq!(view.markers()[0], Marker { title: "A".to_string(), position: LatLng::new(10.0, 20.0) });
        assert_eq!(view.markers()[1].position, LatLng::new(30.0, 40.0));
        assert_eq!(view.circles()[0].radius_m, 25.0);
        assert_eq!(metrics.markers_rendered(), 2);
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let (renderer, metrics) = renderer(Duration::ZERO);
        let mut view = MapState::new();
        let snap = snapshot(&[
            ("bad", json!({"latitude": "abc", "longitude": 20.0})),
            ("good", json!({"latitude": "10.0", "longitude": "20.0"})),
        ]);

        let report = renderer.render(&snap, &mut view);
        assert_eq!(report.rendered, 1);
        assert_eq!(report.skipped_malformed, 1);
        assert_eq!(view.markers().len(), 1);
        assert_eq!(view.markers()[0].title, "good");
        assert_eq!(metrics.malformed_locations(), 1);
    }

    #[test]
    fn test_redraw_replaces_previous_markers() {
        let (renderer, _) = renderer(Duration::ZERO);
        let mut view = MapState::new();

        renderer.render(&snapshot(&[("A", json!({"latitude": 1.0, "longitude": 1.0}))]), &mut view);
        renderer.render(&snapshot(&[("B", json!({"latitude": 2.0, "longitude": 2.0}))]), &mut view);

        assert_eq!(view.markers().len(), 1);
        assert_eq!(view.markers()[0].title, "B");
    }

    #[test]
    fn test_stale_entries_skipped() {
        let (renderer, metrics) = renderer(Duration::from_secs(60));
        let mut view = MapState::new();
        let now = 1_000_000_000;
        let snap = snapshot(&[
            ("old", json!({"latitude": 1.0, "longitude": 1.0, "updated_at": now - 61_000})),
            ("fresh", json!({"latitude": 2.0, "longitude": 2.0, "updated_at": now - 1_000})),
            ("unstamped", json!({"latitude": 3.0, "longitude": 3.0})),
        ]);

        let report = renderer.render_at(&snap, &mut view, now);
        assert_eq!(report.rendered, 2);
        assert_eq!(report.skipped_stale, 1);
        assert_eq!(metrics.report().stale_locations, 1);
    }
}
