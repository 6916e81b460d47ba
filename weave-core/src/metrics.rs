//! Transfer metrics
//!
//! Counters, a gauge, and a latency histogram per worker, rendered in the
//! Prometheus text format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

const LATENCY_BOUNDS: [f64; 10] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Latency histogram with fixed bucket bounds, in seconds
pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BOUNDS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            buckets: Default::default(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe one duration
    pub fn observe(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let secs = elapsed.as_secs_f64();
        for (bound, count) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            if secs <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );
        for (bound, count) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, self.count()));

        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));
        output
    }
}

/// Per-worker upload metrics
pub struct TransferMetrics {
    pub parts_written: Counter,
    pub bytes_written: Counter,
    pub bytes_read: Counter,
    pub sessions_begun: Counter,
    pub sessions_finalized: Counter,
    pub open_sessions: Gauge,
    pub part_write_duration: Histogram,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self {
            parts_written: Counter::new("weave_parts_written_total", "Parts uploaded"),
            bytes_written: Counter::new("weave_bytes_written_total", "Bytes uploaded"),
            bytes_read: Counter::new("weave_bytes_read_total", "Bytes read by ranged GET"),
            sessions_begun: Counter::new("weave_sessions_begun_total", "Multipart sessions joined"),
            sessions_finalized: Counter::new(
                "weave_sessions_finalized_total",
                "Multipart sessions completed",
            ),
            open_sessions: Gauge::new("weave_open_sessions", "Sessions joined but not finalized"),
            part_write_duration: Histogram::new(
                "weave_part_write_duration_seconds",
                "Part upload latency",
            ),
        }
    }

    /// Export all metrics in Prometheus format
    pub fn export(&self) -> String {
        let mut output = String::new();
        output.push_str(&self.parts_written.to_prometheus());
        output.push_str(&self.bytes_written.to_prometheus());
        output.push_str(&self.bytes_read.to_prometheus());
        output.push_str(&self.sessions_begun.to_prometheus());
        output.push_str(&self.sessions_finalized.to_prometheus());
        output.push_str(&self.open_sessions.to_prometheus());
        output.push_str(&self.part_write_duration.to_prometheus());
        output
    }
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self::new()
    }
}
