//! Aggregate request metrics.
//!
//! Counters are lock-free; the per-tool and per-error maps take a short
//! mutex. Minimum latency uses 0 as the "unset" sentinel and a
//! compare-and-swap loop so concurrent recorders cannot regress it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicI64,
    success_requests: AtomicI64,
    failed_requests: AtomicI64,

    total_latency_ms: AtomicI64,
    max_latency_ms: AtomicI64,
    min_latency_ms: AtomicI64,

    tool_calls: Mutex<HashMap<String, i64>>,
    error_counts: Mutex<HashMap<String, i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: i64,
    pub success_requests: i64,
    pub failed_requests: i64,
    pub avg_latency_ms: i64,
    pub max_latency_ms: i64,
    pub min_latency_ms: i64,
    pub tool_calls: HashMap<String, i64>,
    pub error_counts: HashMap<String, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, tool: &str, success: bool, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let latency_ms = latency.as_millis() as i64;
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.update_max_latency(latency_ms);
        self.update_min_latency(latency_ms);

        if let Ok(mut calls) = self.tool_calls.lock() {
            *calls.entry(tool.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self, code_name: &str) {
        if let Ok(mut counts) = self.error_counts.lock() {
            *counts.entry(code_name.to_string()).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let avg = if total > 0 {
            self.total_latency_ms.load(Ordering::Relaxed) / total
        } else {
            0
        };

        MetricsSnapshot {
            total_requests: total,
            success_requests: self.success_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_latency_ms: avg,
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            min_latency_ms: self.min_latency_ms.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.lock().map(|m| m.clone()).unwrap_or_default(),
            error_counts: self
                .error_counts
                .lock()
                .map(|m| m.clone())
                .unwrap_or_default(),
        }
    }

    fn update_max_latency(&self, latency_ms: i64) {
        loop {
            let max = self.max_latency_ms.load(Ordering::Relaxed);
            if latency_ms <= max {
                return;
            }
            if self
                .max_latency_ms
                .compare_exchange(max, latency_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn update_min_latency(&self, latency_ms: i64) {
        loop {
            let min = self.min_latency_ms.load(Ordering::Relaxed);
            if min != 0 && latency_ms >= min {
                return;
            }
            if self
                .min_latency_ms
                .compare_exchange(min, latency_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}
