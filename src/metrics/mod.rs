//! Prometheus metrics
//!
//! Prometheus text format exporter built on `std::sync::atomic` and
//! `parking_lot`. Each [`PollMetrics`] owns its own registry, so two servers
//! in one process (or two tests) never share counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Atomic helpers
// ---------------------------------------------------------------------------

/// A simple atomic counter backed by `AtomicU64`.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge that stores an `f64` via bit-casting into `AtomicU64`.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: f64) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    fn add(&self, delta: f64) {
        loop {
            let current = self.0.load(Ordering::Relaxed);
            let new_val = f64::from_bits(current) + delta;
            if self
                .0
                .compare_exchange_weak(
                    current,
                    new_val.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
}

/// Counters keyed by label values.
#[derive(Debug)]
pub struct CounterVec {
    label_names: Vec<String>,
    entries: RwLock<HashMap<Vec<String>, Arc<Counter>>>,
}

impl CounterVec {
    fn new(label_names: &[&str]) -> Self {
        Self {
            label_names: label_names.iter().map(|s| s.to_string()).collect(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn inc(&self, label_values: &[&str]) {
        self.with_counter(label_values, |c| c.inc());
    }

    /// Current value for the label set, zero if never incremented
    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.entries.read().get(&key).map(|c| c.get()).unwrap_or(0)
    }

    /// Sum across every label set
    pub fn total(&self) -> u64 {
        self.entries.read().values().map(|c| c.get()).sum()
    }

    fn with_counter(&self, label_values: &[&str], f: impl FnOnce(&Counter)) {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        // Fast path: read lock
        {
            let map = self.entries.read();
            if let Some(counter) = map.get(&key) {
                f(counter);
                return;
            }
        }
        // Slow path: write lock to insert
        let mut map = self.entries.write();
        let counter = map
            .entry(key)
            .or_insert_with(|| Arc::new(Counter::default()));
        f(counter);
    }
}

// ---------------------------------------------------------------------------
// Metric descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
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

#[derive(Debug)]
enum MetricData {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    CounterVec(Arc<CounterVec>),
}

#[derive(Debug)]
struct MetricDescriptor {
    name: String,
    help: String,
    metric_type: MetricType,
    data: MetricData,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Metrics registry, rendered in registration order.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<Vec<MetricDescriptor>>,
}

impl MetricsRegistry {
    pub fn register_counter(&self, name: &str, help: &str) -> Arc<Counter> {
        let counter = Arc::new(Counter::default());
        self.push(name, help, MetricType::Counter, MetricData::Counter(Arc::clone(&counter)));
        counter
    }

    pub fn register_counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Arc<CounterVec> {
        let vec = Arc::new(CounterVec::new(label_names));
        self.push(name, help, MetricType::Counter, MetricData::CounterVec(Arc::clone(&vec)));
        vec
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Arc<Gauge> {
        let gauge = Arc::new(Gauge::default());
        self.push(name, help, MetricType::Gauge, MetricData::Gauge(Arc::clone(&gauge)));
        gauge
    }

    fn push(&self, name: &str, help: &str, metric_type: MetricType, data: MetricData) {
        self.metrics.write().push(MetricDescriptor {
            name: name.to_string(),
            help: help.to_string(),
            metric_type,
            data,
        });
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let metrics = self.metrics.read();
        let mut out = String::with_capacity(2048);

        for desc in metrics.iter() {
            let _ = writeln!(out, "# HELP {} {}", desc.name, desc.help);
            let _ = writeln!(out, "# TYPE {} {}", desc.name, desc.metric_type.as_str());

            match &desc.data {
                MetricData::Counter(counter) => {
                    let _ = writeln!(out, "{} {}", desc.name, counter.get());
                }
                MetricData::Gauge(gauge) => {
                    let _ = write_f64(&mut out, &desc.name, None, gauge.get());
                }
                MetricData::CounterVec(vec) => {
                    let map = vec.entries.read();
                    let mut sorted: Vec<_> = map.iter().collect();
                    sorted.sort_by(|a, b| a.0.cmp(b.0));
                    for (label_values, counter) in sorted {
                        let labels = format_labels(&vec.label_names, label_values);
                        let _ = writeln!(out, "{}{} {}", desc.name, labels, counter.get());
                    }
                }
            }
        }

        out
    }
}

/// Format a gauge/f64 value, rendering integers without decimal.
fn write_f64(out: &mut String, name: &str, labels: Option<&str>, val: f64) -> std::fmt::Result {
    if val == val.floor() && val.is_finite() {
        writeln!(out, "{}{} {}", name, labels.unwrap_or(""), val as i64)
    } else {
        writeln!(out, "{}{} {}", name, labels.unwrap_or(""), val)
    }
}

fn format_labels(names: &[String], values: &[String]) -> String {
    let mut buf = String::from("{");
    for (i, (name, value)) in names.iter().zip(values.iter()).enumerate() {
        if i > 0 {
            buf.push(',');
        }
        let _ = write!(buf, "{}=\"{}\"", name, escape_label_value(value));
    }
    buf.push('}');
    buf
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

// ---------------------------------------------------------------------------
// Poll metrics
// ---------------------------------------------------------------------------

/// Metric handles for the polling server.
#[derive(Debug)]
pub struct PollMetrics {
    registry: MetricsRegistry,
    pub polls_created_total: Arc<Counter>,
    pub polls_started_total: Arc<Counter>,
    pub polls_ended_total: Arc<Counter>,
    /// Polls ended by reaching their end time, by the timer or lazily
    pub polls_expired_total: Arc<Counter>,
    pub votes_total: Arc<Counter>,
    /// Rejected submissions by error code
    pub votes_rejected_total: Arc<CounterVec>,
    pub ws_connections_active: Arc<Gauge>,
    pub timer_tasks_active: Arc<Gauge>,
}

impl Default for PollMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollMetrics {
    pub fn new() -> Self {
        let registry = MetricsRegistry::default();

        let polls_created_total =
            registry.register_counter("livepoll_polls_created_total", "Total polls created");
        let polls_started_total =
            registry.register_counter("livepoll_polls_started_total", "Total polls started");
        let polls_ended_total = registry.register_counter(
            "livepoll_polls_ended_total",
            "Total polls ended, explicitly or by expiry",
        );
        let polls_expired_total = registry.register_counter(
            "livepoll_polls_expired_total",
            "Total polls ended because their time ran out",
        );
        let votes_total =
            registry.register_counter("livepoll_votes_total", "Total votes recorded");
        let votes_rejected_total = registry.register_counter_vec(
            "livepoll_votes_rejected_total",
            "Total vote submissions rejected",
            &["code"],
        );
        let ws_connections_active = registry.register_gauge(
            "livepoll_ws_connections_active",
            "Number of active WebSocket connections",
        );
        let timer_tasks_active = registry.register_gauge(
            "livepoll_timer_tasks_active",
            "Number of running countdown tasks",
        );

        Self {
            registry,
            polls_created_total,
            polls_started_total,
            polls_ended_total,
            polls_expired_total,
            votes_total,
            votes_rejected_total,
            ws_connections_active,
            timer_tasks_active,
        }
    }

    pub fn render(&self) -> String {
        self.registry.render()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_inc() {
        let c = Counter::default();
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc_by(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_gauge_inc_dec() {
        let g = Gauge::default();
        g.inc();
        g.inc();
        g.dec();
        assert!((g.get() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_vec_labels() {
        let registry = MetricsRegistry::default();
        let vec = registry.register_counter_vec("x_total", "X", &["code"]);
        vec.inc(&["ALREADY_VOTED"]);
        vec.inc(&["ALREADY_VOTED"]);
        vec.inc(&["POLL_EXPIRED"]);
        assert_eq!(vec.get(&["ALREADY_VOTED"]), 2);
        assert_eq!(vec.get(&["OPTION_NOT_FOUND"]), 0);
        assert_eq!(vec.total(), 3);

        let output = registry.render();
        assert!(output.contains("x_total{code=\"ALREADY_VOTED\"} 2"));
        assert!(output.contains("x_total{code=\"POLL_EXPIRED\"} 1"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("a\"b"), "a\\\"b");
        assert_eq!(escape_label_value("a\\b"), "a\\\\b");
        assert_eq!(escape_label_value("a\nb"), "a\\nb");
    }

    #[test]
    fn test_render_gauge_integer_and_float() {
        let registry = MetricsRegistry::default();
        let g = registry.register_gauge("g", "G");
        g.set(3.0);
        assert!(registry.render().contains("g 3\n"));
        g.set(0.5);
        assert!(registry.render().contains("g 0.5\n"));
    }

    #[test]
    fn test_poll_metrics_registered() {
        let metrics = PollMetrics::new();
        metrics.polls_created_total.inc();
        let output = metrics.render();
        for name in [
            "livepoll_polls_created_total",
            "livepoll_polls_started_total",
            "livepoll_polls_ended_total",
            "livepoll_polls_expired_total",
            "livepoll_votes_total",
            "livepoll_votes_rejected_total",
            "livepoll_ws_connections_active",
            "livepoll_timer_tasks_active",
        ] {
            assert!(output.contains(&format!("# TYPE {}", name)), "{name}");
        }
        assert!(output.contains("livepoll_polls_created_total 1"));
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = PollMetrics::new();
        let b = PollMetrics::new();
        a.votes_total.inc();
        assert_eq!(a.votes_total.get(), 1);
        assert_eq!(b.votes_total.get(), 0);
    }
}
