//! Prometheus text exposition for the demo metrics endpoint.

use std::fmt::Write;

use rand::Rng;

struct Metric {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
    value: String,
}

/// Renders the demo counters and gauges in the Prometheus text format.
/// Values are randomized per scrape; there is no real collector behind them.
pub fn render_prometheus() -> String {
    let mut rng = rand::rng();

    let metrics = [
        Metric {
            name: "analytics_requests_total",
            help: "Total number of analytics requests",
            kind: "counter",
            value: rng.random_range(1000..=5000).to_string(),
        },
        Metric {
            name: "analytics_processing_time_seconds",
            help: "Average processing time for analytics requests",
            kind: "gauge",
            value: format!("{:.3}", rng.random_range(0.1..=2.0)),
        },
        Metric {
            name: "analytics_errors_total",
            help: "Total number of analytics errors",
            kind: "counter",
            value: rng.random_range(0..=50).to_string(),
        },
        Metric {
            name: "analytics_revenue_total",
            help: "Total revenue from analytics",
            kind: "gauge",
            value: format!("{:.2}", rng.random_range(10_000.0..=50_000.0)),
        },
    ];

    let mut out = String::new();
    for metric in &metrics {
        let _ = writeln!(out, "# HELP {} {}", metric.name, metric.help);
        let _ = writeln!(out, "# TYPE {} {}", metric.name, metric.kind);
        let _ = writeln!(out, "{} {}", metric.name, metric.value);
        let _ = writeln!(out);
    }
    out
}
