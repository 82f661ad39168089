//! Per-link packet and negotiation counters.
//!
//! Counters are shared between a link and whoever reports on it, so they
//! are atomics behind an `Arc` rather than plain fields on the link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-link statistics.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Frames received, any protocol.
    pub rx_packets: Counter,
    /// Bytes received.
    pub rx_bytes: Counter,
    /// Frames transmitted.
    pub tx_packets: Counter,
    /// Bytes transmitted.
    pub tx_bytes: Counter,
    /// Frames dropped because they arrived in the wrong phase or state.
    pub rx_drops: Counter,
    /// Malformed frames.
    pub rx_errors: Counter,
    /// Engine failures (non-convergence, bad magic, echo timeout, ...).
    pub failures: Counter,
    /// Authentication exchanges that ended in failure.
    pub auth_failures: Counter,
}

impl LinkStats {
    /// Creates new link statistics initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received frame.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Records a transmitted frame.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    /// Records a malformed frame.
    pub fn record_rx_error(&self) {
        self.rx_errors.inc();
    }

    /// Records a dropped frame.
    pub fn record_rx_drop(&self) {
        self.rx_drops.inc();
    }

    fn export_into(&self, name: &str, out: &mut Vec<(String, u64)>) {
        out.extend([
            (format!("{}_rx_packets", name), self.rx_packets.get()),
            (format!("{}_rx_bytes", name), self.rx_bytes.get()),
            (format!("{}_tx_packets", name), self.tx_packets.get()),
            (format!("{}_tx_bytes", name), self.tx_bytes.get()),
            (format!("{}_rx_drops", name), self.rx_drops.get()),
            (format!("{}_rx_errors", name), self.rx_errors.get()),
            (format!("{}_failures", name), self.failures.get()),
            (format!("{}_auth_failures", name), self.auth_failures.get()),
        ]);
    }
}

/// Registry of all links' statistics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    links: RwLock<HashMap<String, Arc<LinkStats>>>,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a link, returning its (possibly existing) statistics.
    pub fn register_link(&self, name: &str) -> Arc<LinkStats> {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        links.entry(name.to_string()).or_default().clone()
    }

    /// Statistics of a registered link.
    pub fn link(&self, name: &str) -> Option<Arc<LinkStats>> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        links.get(name).cloned()
    }

    /// Exports all metrics as key-value pairs, sorted by key.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = Vec::new();
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        for (name, stats) in links.iter() {
            stats.export_into(name, &mut result);
        }
        result.sort();
        result
    }
}
