// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Structured telemetry and metrics collection for TRAC components.
//!
//! Every component (metadata store, job orchestrator, gateway) records one
//! [`OperationMetrics`] per request through a shared [`MetricsCollector`];
//! [`MetricsCollector::summary`] aggregates those into the counters and
//! latency percentiles a component logs or exports at shutdown. No metrics
//! *exporter* is wired by default — [`TelemetryExporter`] exists for the
//! instrumentation points to hand off to one when a deployment needs it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// ---------------------------------------------------------------------------
// OperationMetrics
// ---------------------------------------------------------------------------

/// Metrics captured for a single component operation (e.g. `loadObject`,
/// `submitBatch`, a gateway-routed request).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationMetrics {
    /// Component that performed the operation (`metastore`, `orchestrator`, `gateway`).
    pub component: String,
    /// Operation name, matching the spec's method names where one exists.
    pub operation: String,
    /// Tenant the operation was scoped to, if any.
    pub tenant: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the operation returned successfully.
    pub succeeded: bool,
    /// Error code string (`ErrorCode::code()`), empty when `succeeded`.
    pub error_code: String,
}

// ---------------------------------------------------------------------------
// MetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across multiple recorded operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of operations recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Error rate (failed operations / total operations).
    pub error_rate: f64,
    /// Per-component operation counts (deterministic ordering).
    pub component_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            error_rate: 0.0,
            component_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe collector for operation metrics.
///
/// Wrap in an `Arc` to share across threads (the inner storage is already
/// behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<OperationMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a completed operation's metrics.
    pub fn record(&self, metrics: OperationMetrics) {
        let mut data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        data.push(metrics);
    }

    /// Return all recorded operation metrics.
    pub fn operations(&self) -> Vec<OperationMetrics> {
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        data.clone()
    }

    /// Number of operations recorded so far.
    pub fn len(&self) -> usize {
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        data.len()
    }

    /// Whether the collector has no recorded operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded operations.
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let failures: usize = data.iter().filter(|r| !r.succeeded).count();
        let error_rate = failures as f64 / count as f64;

        let mut component_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *component_counts.entry(r.component.clone()).or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            error_rate,
            component_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        let mut data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        data.clear();
    }
}

// ---------------------------------------------------------------------------
// TelemetrySpan
// ---------------------------------------------------------------------------

/// A structured span for tracing integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(
            span_name = %self.name,
            attributes = ?self.attributes,
            "telemetry_span"
        );
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting collected metrics.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON to a string.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn sample_metrics(component: &str, duration: u64, succeeded: bool) -> OperationMetrics {
        OperationMetrics {
            component: component.to_string(),
            operation: "load_object".to_string(),
            tenant: "acme".to_string(),
            duration_ms: duration,
            succeeded,
            error_code: if succeeded { String::new() } else { "not_found".to_string() },
        }
    }

    #[test]
    fn collector_new_is_empty() {
        let c = MetricsCollector::new();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn collector_record_and_len() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 100, true));
        assert_eq!(c.len(), 1);
        assert!(!c.is_empty());
    }

    #[test]
    fn collector_operations_returns_all() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 10, true));
        c.record(sample_metrics("gateway", 20, true));
        let ops = c.operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].component, "metastore");
        assert_eq!(ops[1].component, "gateway");
    }

    #[test]
    fn collector_clear() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("orchestrator", 50, true));
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn empty_collector_summary() {
        let c = MetricsCollector::new();
        let s = c.summary();
        assert_eq!(s.count, 0);
        assert_eq!(s.mean_duration_ms, 0.0);
        assert_eq!(s.p50_duration_ms, 0.0);
        assert_eq!(s.p99_duration_ms, 0.0);
        assert_eq!(s.error_rate, 0.0);
        assert!(s.component_counts.is_empty());
    }

    #[test]
    fn single_op_summary_matches() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 42, true));
        let s = c.summary();
        assert_eq!(s.count, 1);
        assert_eq!(s.mean_duration_ms, 42.0);
        assert_eq!(s.p50_duration_ms, 42.0);
        assert_eq!(s.p99_duration_ms, 42.0);
        assert_eq!(s.error_rate, 0.0);
        assert_eq!(s.component_counts["metastore"], 1);
    }

    #[test]
    fn summary_mean_duration() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 100, true));
        c.record(sample_metrics("metastore", 200, true));
        c.record(sample_metrics("metastore", 300, true));
        let s = c.summary();
        assert!((s.mean_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_p50_odd_count() {
        let c = MetricsCollector::new();
        for d in [10, 20, 30, 40, 50] {
            c.record(sample_metrics("metastore", d, true));
        }
        let s = c.summary();
        assert!((s.p50_duration_ms - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_p50_even_count() {
        let c = MetricsCollector::new();
        for d in [10, 20, 30, 40] {
            c.record(sample_metrics("metastore", d, true));
        }
        let s = c.summary();
        assert!((s.p50_duration_ms - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_p99() {
        let c = MetricsCollector::new();
        for d in 1..=100 {
            c.record(sample_metrics("metastore", d, true));
        }
        let s = c.summary();
        assert!(s.p99_duration_ms > 98.0);
        assert!(s.p99_duration_ms <= 100.0);
    }

    #[test]
    fn summary_error_rate() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 10, false));
        c.record(sample_metrics("metastore", 20, true));
        c.record(sample_metrics("metastore", 30, false));
        let s = c.summary();
        assert!((s.error_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn summary_component_counts() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("gateway", 10, true));
        c.record(sample_metrics("orchestrator", 20, true));
        c.record(sample_metrics("gateway", 30, true));
        let s = c.summary();
        assert_eq!(s.component_counts["gateway"], 2);
        assert_eq!(s.component_counts["orchestrator"], 1);
    }

    #[test]
    fn operation_metrics_serde_roundtrip() {
        let m = sample_metrics("serde_test", 999, false);
        let json = serde_json::to_string(&m).unwrap();
        let m2: OperationMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn operation_metrics_default_values() {
        let m = OperationMetrics::default();
        assert_eq!(m.component, "");
        assert_eq!(m.duration_ms, 0);
        assert!(!m.succeeded);
    }

    #[test]
    fn metrics_summary_serde_roundtrip() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 50, false));
        let s = c.summary();
        let json = serde_json::to_string(&s).unwrap();
        let s2: MetricsSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(s, s2);
    }

    #[test]
    fn concurrent_recording() {
        let c = MetricsCollector::new();
        let mut handles = vec![];
        for i in 0..10 {
            let cc = c.clone();
            handles.push(thread::spawn(move || {
                cc.record(sample_metrics("thread", i * 10, true));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 10);
    }

    #[test]
    fn concurrent_summary_while_recording() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("pre", 10, true));
        let mut handles = vec![];
        for _ in 0..5 {
            let cc = c.clone();
            handles.push(thread::spawn(move || {
                cc.record(sample_metrics("t", 20, true));
                let _ = cc.summary();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 6);
    }

    #[test]
    fn telemetry_span_attributes() {
        let span = TelemetrySpan::new("op")
            .with_attribute("key", "val")
            .with_attribute("another", "thing");
        assert_eq!(span.name, "op");
        assert_eq!(span.attributes.len(), 2);
        assert_eq!(span.attributes["key"], "val");
    }

    #[test]
    fn telemetry_span_serde_roundtrip() {
        let span = TelemetrySpan::new("submit_batch").with_attribute("tenant", "acme");
        let json = serde_json::to_string(&span).unwrap();
        let span2: TelemetrySpan = serde_json::from_str(&json).unwrap();
        assert_eq!(span2.name, "submit_batch");
        assert_eq!(span2.attributes["tenant"], "acme");
    }

    #[test]
    fn json_exporter_valid_output() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("metastore", 100, true));
        let s = c.summary();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["count"], 1);
    }

    #[test]
    fn json_exporter_empty_summary() {
        let s = MetricsSummary::default();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["count"], 0);
    }

    #[test]
    fn json_exporter_component_counts_deterministic() {
        let c = MetricsCollector::new();
        c.record(sample_metrics("zebra", 10, true));
        c.record(sample_metrics("alpha", 20, true));
        let s = c.summary();
        let exporter = JsonExporter;
        let json = exporter.export(&s).unwrap();
        let keys_start = json.find("\"alpha\"").unwrap();
        let keys_end = json.find("\"zebra\"").unwrap();
        assert!(keys_start < keys_end);
    }

    #[test]
    fn percentile_empty() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn percentile_single() {
        assert_eq!(percentile(&[42], 99.0), 42.0);
    }
}
