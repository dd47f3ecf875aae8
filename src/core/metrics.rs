//! Counters for provisioning and tool routing.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Metrics shared by the sandbox manager and the routing client.
pub struct SandboxMetrics {
    // Provisioning
    acquisitions_succeeded: AtomicU64,
    acquisitions_failed: AtomicU64,
    releases_succeeded: AtomicU64,
    releases_failed: AtomicU64,

    // Tool calls
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,

    // Connections
    connections_opened: AtomicU64,
    connection_errors: AtomicU64,
    active_connections: AtomicU64,

    // Keyed by namespaced tool name
    tool_latencies: DashMap<String, LatencyStats>,
}

impl SandboxMetrics {
    pub fn new() -> Self {
        Self {
            acquisitions_succeeded: AtomicU64::new(0),
            acquisitions_failed: AtomicU64::new(0),
            releases_succeeded: AtomicU64::new(0),
            releases_failed: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            tool_latencies: DashMap::new(),
        }
    }

    pub fn record_acquisition(&self, success: bool) {
        if success {
            self.acquisitions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.acquisitions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_release(&self, success: bool) {
        if success {
            self.releases_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.releases_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the start of a tool call.
    pub fn record_call_start(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a tool call.
    pub fn record_call_end(&self, tool: &str, success: bool, duration_ms: u64) {
        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        self.tool_latencies
            .entry(tool.to_string())
            .or_insert_with(LatencyStats::new)
            .record(duration_ms);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquisitions_succeeded: self.acquisitions_succeeded.load(Ordering::Relaxed),
            acquisitions_failed: self.acquisitions_failed.load(Ordering::Relaxed),
            releases_succeeded: self.releases_succeeded.load(Ordering::Relaxed),
            releases_failed: self.releases_failed.load(Ordering::Relaxed),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }

    pub fn tool_latency(&self, tool: &str) -> Option<LatencySnapshot> {
        self.tool_latencies.get(tool).map(|stats| stats.snapshot())
    }
}

impl Default for SandboxMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool latency statistics.
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 { total / count } else { 0 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub acquisitions_succeeded: u64,
    pub acquisitions_failed: u64,
    pub releases_succeeded: u64,
    pub releases_failed: u64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub connections_opened: u64,
    pub connection_errors: u64,
    pub active_connections: u64,
}

impl MetricsSnapshot {
    /// Calculate tool call success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_calls + self.failed_calls;
        if completed == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / completed as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}
