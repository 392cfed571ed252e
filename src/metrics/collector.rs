//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Contadores del puente: conexiones, requests por comando, status codes,
//! sesiones y latencia de dispatch.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Tamaño de la ventana de latencias
const MAX_LATENCIES: usize = 10_000;

/// Collector de métricas, clonable: los clones comparten los datos
///
/// El loop es de un solo thread, pero el collector se lee desde fuera
/// (tests, `main` al apagar), por eso vive detrás de un `Mutex`.
#[derive(Clone)]
pub struct BridgeMetrics {
    inner: Arc<Mutex<MetricsData>>,
    start_time: Instant,
}

#[derive(Default)]
struct MetricsData {
    connections_accepted: u64,
    connections_closed: u64,
    parse_errors: u64,
    total_requests: u64,
    sessions_opened: u64,
    sessions_closed: u64,

    /// Requests por tipo de comando
    commands: BTreeMap<String, u64>,

    status_codes: BTreeMap<u16, u64>,

    /// Últimas latencias de dispatch, en microsegundos
    latencies: VecDeque<u64>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsData::default())),
            start_time: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsData> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_accept(&self) {
        self.lock().connections_accepted += 1;
    }

    pub fn record_close(&self) {
        self.lock().connections_closed += 1;
    }

    pub fn record_parse_error(&self) {
        self.lock().parse_errors += 1;
    }

    pub fn record_session_opened(&self) {
        self.lock().sessions_opened += 1;
    }

    pub fn record_session_closed(&self) {
        self.lock().sessions_closed += 1;
    }

    /// Registra un request despachado
    pub fn record_request(&self, command: &str, status_code: u16, latency: Duration) {
        let mut data = self.lock();

        data.total_requests += 1;
        *data.commands.entry(command.to_string()).or_default() += 1;
        *data.status_codes.entry(status_code).or_default() += 1;

        if data.latencies.len() == MAX_LATENCIES {
            data.latencies.pop_front();
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        data.latencies.push_back(micros);
    }

    /// Copia consistente de todos los contadores
    pub fn snapshot(&self) -> MetricsSnapshot {
        let data = self.lock();
        let latency = LatencySummary::from_window(&data.latencies);

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            connections_accepted: data.connections_accepted,
            connections_closed: data.connections_closed,
            active_connections: data
                .connections_accepted
                .saturating_sub(data.connections_closed),
            parse_errors: data.parse_errors,
            total_requests: data.total_requests,
            sessions_opened: data.sessions_opened,
            sessions_closed: data.sessions_closed,
            commands: data.commands.clone(),
            status_codes: data.status_codes.clone(),
            latency_p50_us: latency.p50,
            latency_p95_us: latency.p95,
            latency_p99_us: latency.p99,
            latency_avg_us: latency.mean,
        }
    }

    /// Snapshot en JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct LatencySummary {
    p50: u64,
    p95: u64,
    p99: u64,
    mean: u64,
}

impl LatencySummary {
    fn from_window(window: &VecDeque<u64>) -> Self {
        if window.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<u64> = window.iter().copied().collect();
        sorted.sort_unstable();
        let rank = |pct: usize| sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)];

        let total: u128 = sorted.iter().map(|&v| u128::from(v)).sum();
        Self {
            p50: rank(50),
            p95: rank(95),
            p99: rank(99),
            mean: (total / sorted.len() as u128) as u64,
        }
    }
}

/// Vista serializable del collector; se loguea al apagar el puente
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub parse_errors: u64,
    pub total_requests: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub commands: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<u16, u64>,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_requests() {
        let metrics = BridgeMetrics::new();

        metrics.record_request("push_data", 200, Duration::from_millis(1));
        metrics.record_request("push_data", 409, Duration::from_millis(2));
        metrics.record_request("poll_data", 200, Duration::from_millis(3));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.commands.get("push_data"), Some(&2));
        assert_eq!(snapshot.status_codes.get(&200), Some(&2));
        assert_eq!(snapshot.status_codes.get(&409), Some(&1));
    }

    #[test]
    fn test_connection_counters() {
        let metrics = BridgeMetrics::new();

        metrics.record_accept();
        metrics.record_accept();
        metrics.record_close();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[test]
    fn test_latency_summary_ranks() {
        let window: VecDeque<u64> = (1..=200).rev().collect();
        let summary = LatencySummary::from_window(&window);

        assert_eq!(summary.p50, 101);
        assert_eq!(summary.p95, 191);
        assert_eq!(summary.p99, 199);
        assert_eq!(summary.mean, 100);
    }

    #[test]
    fn test_empty_window_is_zero() {
        let snapshot = BridgeMetrics::new().snapshot();
        assert_eq!(snapshot.latency_p99_us, 0);
        assert_eq!(snapshot.latency_avg_us, 0);
    }

    #[test]
    fn test_window_drops_oldest() {
        let metrics = BridgeMetrics::new();
        let extra = 250u64;

        for i in 0..(MAX_LATENCIES as u64 + extra) {
            metrics.record_request("poll_data", 200, Duration::from_micros(i));
        }

        let data = metrics.lock();
        assert_eq!(data.total_requests, MAX_LATENCIES as u64 + extra);
        assert_eq!(data.latencies.len(), MAX_LATENCIES);
        assert_eq!(data.latencies.front(), Some(&extra));
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = BridgeMetrics::new();
        metrics.record_session_opened();
        metrics.record_request("new_connection", 200, Duration::from_millis(5));

        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["sessions_opened"], 1);
        assert_eq!(json["commands"]["new_connection"], 1);
        assert_eq!(json["status_codes"]["200"], 1);
    }

    #[test]
    fn test_clones_share_data() {
        let metrics = BridgeMetrics::new();
        let clone = metrics.clone();

        clone.record_parse_error();
        assert_eq!(metrics.snapshot().parse_errors, 1);
    }
}
