use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::adaptive::types::AlgorithmType;

const CUSTOM_ID: &str = "custom";
const ACTIVE_WINDOW_MS: u64 = 300_000;

static REGISTRY: OnceLock<Arc<AlgorithmRegistry>> = OnceLock::new();

pub fn registry() -> &'static Arc<AlgorithmRegistry> {
    REGISTRY.get_or_init(|| Arc::new(AlgorithmRegistry::new()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlgorithmMetricsSnapshot {
    pub call_count: u64,
    pub total_latency_us: u64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
}

#[derive(Debug, Default)]
pub struct AlgorithmMetrics {
    call_count: AtomicU64,
    total_latency_us: AtomicU64,
    error_count: AtomicU64,
    last_called_at: AtomicU64,
}

impl AlgorithmMetrics {
    pub fn record_call(&self, latency_us: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.last_called_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.call_count();
        if calls == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let avg = (total_us as f64 / calls as f64) / 1000.0;
        (avg * 10000.0).round() / 10000.0
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_called_at(&self) -> Option<u64> {
        match self.last_called_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn snapshot(&self) -> AlgorithmMetricsSnapshot {
        AlgorithmMetricsSnapshot {
            call_count: self.call_count(),
            total_latency_us: self.total_latency_us.load(Ordering::Relaxed),
            error_count: self.error_count(),
            last_called_at: self.last_called_at(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.last_called_at()
            .map(|last| now_ms().saturating_sub(last) < ACTIVE_WINDOW_MS)
            .unwrap_or(false)
    }
}

/// Call counters per algorithm id. All custom algorithms share one row.
pub struct AlgorithmRegistry {
    metrics: HashMap<&'static str, AlgorithmMetrics>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        let metrics = tracked_ids()
            .map(|id| (id, AlgorithmMetrics::default()))
            .collect();
        Self { metrics }
    }

    pub fn record(&self, id: &str, latency_us: u64) {
        if let Some(m) = self.metrics.get(id) {
            m.record_call(latency_us);
        }
    }

    pub fn record_error(&self, id: &str) {
        if let Some(m) = self.metrics.get(id) {
            m.record_error();
        }
    }

    pub fn get(&self, id: &str) -> Option<&AlgorithmMetrics> {
        self.metrics.get(id)
    }

    pub fn snapshot(&self) -> Vec<AlgorithmStatus> {
        tracked_ids()
            .filter_map(|id| self.metrics.get(id).map(|m| (id, m)))
            .map(|(id, m)| {
                let calls = m.call_count();
                let is_active = m.is_active();
                let status = if calls == 0 {
                    "idle"
                } else if is_active {
                    "healthy"
                } else {
                    "inactive"
                };
                AlgorithmStatus {
                    id: id.to_string(),
                    name: display_name(id).to_string(),
                    call_count: calls,
                    avg_latency_ms: m.avg_latency_ms(),
                    error_count: m.error_count(),
                    last_called_at: m.last_called_at(),
                    is_active,
                    status: status.to_string(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmStatus {
    pub id: String,
    pub name: String,
    pub call_count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
    pub is_active: bool,
    pub status: String,
}

fn tracked_ids() -> impl Iterator<Item = &'static str> {
    AlgorithmType::builtin()
        .iter()
        .map(AlgorithmType::metric_id)
        .chain(std::iter::once(CUSTOM_ID))
}

fn display_name(id: &str) -> &'static str {
    AlgorithmType::builtin()
        .iter()
        .find(|a| a.metric_id() == id)
        .map(AlgorithmType::name)
        .unwrap_or("Custom")
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[macro_export]
macro_rules! track_algorithm {
    ($id:expr, $body:expr) => {{
        let start = std::time::Instant::now();
        let result = $body;
        let latency_us = start.elapsed().as_micros() as u64;
        $crate::adaptive::metrics::registry().record($id, latency_us);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_has_a_row() {
        let registry = AlgorithmRegistry::new();
        let rows = registry.snapshot();
        assert_eq!(rows.len(), AlgorithmType::builtin().len() + 1);
        assert!(rows.iter().all(|r| r.status == "idle"));
        assert!(rows.iter().any(|r| r.id == "custom"));
    }

    #[test]
    fn record_updates_counters() {
        let registry = AlgorithmRegistry::new();
        registry.record("ucb1", 1500);
        registry.record("ucb1", 500);
        registry.record_error("ucb1");
        registry.record("not-an-algorithm", 10);

        let snapshot = registry.get("ucb1").unwrap().snapshot();
        assert_eq!(snapshot.call_count, 2);
        assert_eq!(snapshot.total_latency_us, 2000);
        assert_eq!(snapshot.error_count, 1);
        assert!(snapshot.last_called_at.is_some());
        assert_eq!(registry.get("ucb1").unwrap().avg_latency_ms(), 1.0);

        let row = registry.snapshot().into_iter().find(|r| r.id == "ucb1").unwrap();
        assert_eq!(row.name, "UCB1");
        assert_eq!(row.status, "healthy");
    }
}
