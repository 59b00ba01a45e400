//! Fire-and-forget metrics.
//!
//! The guard and the runner report counters, durations and gauges through a
//! [`MetricsSink`]. Sink methods return nothing: a sink that cannot deliver a
//! sample drops it, and callers never branch on delivery.

use std::time::Duration;

/// Label pairs attached to a sample, e.g. `[("connector", "web.fetch")]`.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, delta: u64);

    fn observe_duration(&self, name: &str, labels: Labels<'_>, value: Duration);

    fn gauge(&self, name: &str, labels: Labels<'_>, value: f64);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str, _labels: Labels<'_>, _delta: u64) {}

    fn observe_duration(&self, _name: &str, _labels: Labels<'_>, _value: Duration) {}

    fn gauge(&self, _name: &str, _labels: Labels<'_>, _value: f64) {}
}

/// Emits each sample as a `tracing` event on target `scout::metrics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

fn render(labels: Labels<'_>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl MetricsSink for TracingMetrics {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, delta: u64) {
        tracing::debug!(target: "scout::metrics", metric = name, labels = %render(labels), delta, "counter");
    }

    fn observe_duration(&self, name: &str, labels: Labels<'_>, value: Duration) {
        let ms = value.as_secs_f64() * 1000.0;
        tracing::debug!(target: "scout::metrics", metric = name, labels = %render(labels), ms, "duration");
    }

    fn gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        tracing::debug!(target: "scout::metrics", metric = name, labels = %render(labels), value, "gauge");
    }
}
