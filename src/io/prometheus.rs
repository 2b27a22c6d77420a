//! Prometheus metrics HTTP endpoint
//!
//! Exposes metrics in Prometheus text format at /metrics and a liveness
//! probe at /health.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_sync_metrics(&mut output, site_id, &summary);
    write_geofence_metrics(&mut output, site_id, &summary);
    write_render_metrics(&mut output, site_id, &summary);

    output
}

fn write_sync_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::Counter;
    write_metric(output, "geolive_poll_ticks_total", "Location poll ticks", Counter, site, s.poll_ticks);
    write_metric(
        output,
        "geolive_fixes_missing_total",
        "Ticks without a last known location",
        Counter,
        site,
        s.fixes_missing,
    );
    write_metric(
        output,
        "geolive_permission_missing_total",
        "Operations skipped for missing location permission",
        Counter,
        site,
        s.permission_missing,
    );
    write_metric(output, "geolive_publishes_total", "Samples written to the store", Counter, site, s.publishes_ok);
    write_metric(
        output,
        "geolive_publish_failures_total",
        "Samples lost to store write failures",
        Counter,
        site,
        s.publish_failures,
    );
}

fn write_geofence_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::{Counter, Gauge};
    write_metric(output, "geolive_regions_loaded", "Regions in the last config load", Gauge, site, s.regions_loaded);
    write_metric(
        output,
        "geolive_config_unavailable_total",
        "Config loads that could not reach the store",
        Counter,
        site,
        s.config_unavailable,
    );
    write_metric(
        output,
        "geolive_regions_registered_total",
        "Regions accepted by the geofencing service",
        Counter,
        site,
        s.regions_registered,
    );
    write_metric(
        output,
        "geolive_registration_failures_total",
        "Registration batches rejected",
        Counter,
        site,
        s.registration_failures,
    );
    write_metric(
        output,
        "geolive_transitions_applied_total",
        "Transitions applied to region state",
        Counter,
        site,
        s.transitions_applied,
    );
    write_metric(
        output,
        "geolive_invalid_transitions_total",
        "Deliveries with an unrecognised transition code",
        Counter,
        site,
        s.invalid_transitions,
    );
    write_metric(
        output,
        "geolive_transition_faults_total",
        "Deliveries carrying a host error code",
        Counter,
        site,
        s.transition_faults,
    );
    write_metric(
        output,
        "geolive_transitions_dropped_total",
        "Deliveries dropped with no attached session",
        Counter,
        site,
        s.transitions_dropped,
    );
}

fn write_render_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    use MetricType::{Counter, Gauge};
    write_metric(output, "geolive_renders_total", "Full location redraws", Counter, site, s.renders);
    write_metric(output, "geolive_markers", "Markers drawn by the last redraw", Gauge, site, s.markers_rendered);
    write_metric(
        output,
        "geolive_malformed_locations_total",
        "Entries skipped for unparseable coordinates",
        Counter,
        site,
        s.malformed_locations,
    );
    write_metric(
        output,
        "geolive_stale_locations_total",
        "Entries skipped as stale",
        Counter,
        site,
        s.stale_locations,
    );
    write_metric(
        output,
        "geolive_confinement_violations_total",
        "View operations attempted off the main context",
        Counter,
        site,
        s.confinement_violations,
    );
    write_histogram(
        output,
        "geolive_render_latency_us",
        "Redraw latency in microseconds",
        site,
        &s.render_latency_buckets,
        s.render_latency_avg_us,
    );
    write_metric(
        output,
        "geolive_render_latency_p99_us",
        "99th percentile redraw latency",
        Gauge,
        site,
        s.render_latency_p99_us,
    );
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Serve metrics until shutdown is signalled
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), site_id.clone())
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_render(2, 150);
        metrics.record_invalid_transition();
        metrics.set_regions_loaded(3);

        let output = format_prometheus_metrics(&metrics, "campus");

        assert!(output.contains("geolive_renders_total{site=\"campus\"} 1"));
        assert!(output.contains("geolive_markers{site=\"campus\"} 2"));
        assert!(output.contains("geolive_invalid_transitions_total{site=\"campus\"} 1"));
        assert!(output.contains("geolive_regions_loaded{site=\"campus\"} 3"));
        assert!(output.contains("geolive_render_latency_us_bucket{site=\"campus\",le=\"200\"} 1"));
        assert!(output.contains("geolive_render_latency_us_count{site=\"campus\"} 1"));
    }
}
