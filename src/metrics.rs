//! Prometheus-compatible metrics endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    streams_created: AtomicU64,
    spawn_failures: AtomicU64,
    crashes: AtomicU64,
    /// Operator-requested stops that completed
    stops: AtomicU64,
    kill_escalations: AtomicU64,
    kill_timeouts: AtomicU64,
    /// Transcoder processes currently alive
    live_processes: AtomicU64,
    /// Streams that reached `Failed`, by cause
    failures_by_kind: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            streams_created: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            crashes: AtomicU64::new(0),
            stops: AtomicU64::new(0),
            kill_escalations: AtomicU64::new(0),
            kill_timeouts: AtomicU64::new(0),
            live_processes: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_stream_created(&self) {
        self.streams_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
        self.record_failure("spawn");
    }

    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
        self.record_failure("crash");
    }

    pub fn record_stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kill_escalation(&self) {
        self.kill_escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kill_timeout(&self) {
        self.kill_timeouts.fetch_add(1, Ordering::Relaxed);
        self.record_failure("kill_timeout");
    }

    /// Record a stream failure cause
    pub fn record_failure(&self, kind: &str) {
        *self
            .failures_by_kind
            .write()
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    pub fn set_live_processes(&self, count: u64) {
        self.live_processes.store(count, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP hls_live_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE hls_live_uptime_seconds counter\n");
        output.push_str(&format!("hls_live_uptime_seconds {}\n", self.uptime_secs()));

        output.push_str(
            "\n# HELP hls_live_start_time_seconds Server start time as Unix timestamp\n",
        );
        output.push_str("# TYPE hls_live_start_time_seconds gauge\n");
        output.push_str(&format!(
            "hls_live_start_time_seconds {}\n",
            std::time::SystemTime::UNIX_EPOCH
                .elapsed()
                .unwrap_or(Duration::ZERO)
                .as_secs()
                .saturating_sub(self.uptime_secs())
        ));

        let counters = [
            (
                "hls_live_streams_created_total",
                "Streams created",
                &self.streams_created,
            ),
            (
                "hls_live_spawn_failures_total",
                "Transcoder spawn failures",
                &self.spawn_failures,
            ),
            (
                "hls_live_crashes_total",
                "Transcoders that exited while running",
                &self.crashes,
            ),
            (
                "hls_live_stops_total",
                "Operator requested stops",
                &self.stops,
            ),
            (
                "hls_live_kill_escalations_total",
                "Stops that escalated to a forced kill",
                &self.kill_escalations,
            ),
            (
                "hls_live_kill_timeouts_total",
                "Forced kills that were not confirmed",
                &self.kill_timeouts,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("\n# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value.load(Ordering::Relaxed)));
        }

        output.push_str("\n# HELP hls_live_processes Transcoder processes currently alive\n");
        output.push_str("# TYPE hls_live_processes gauge\n");
        output.push_str(&format!(
            "hls_live_processes {}\n",
            self.live_processes.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP hls_live_failures_total Stream failures by kind\n");
        output.push_str("# TYPE hls_live_failures_total counter\n");
        let mut failures: Vec<_> = self
            .failures_by_kind
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        failures.sort();
        for (kind, count) in failures {
            output.push_str(&format!(
                "hls_live_failures_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics endpoint handler
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    state
        .metrics
        .set_live_processes(state.supervisor.live_process_count() as u64);
    let prometheus_output = state.metrics.export_prometheus();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus_output,
    )
        .into_response()
}
