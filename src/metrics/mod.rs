//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Recolección de métricas del puente:
//! - Conexiones aceptadas/cerradas
//! - Requests por comando y por status code
//! - Sesiones de backend abiertas/cerradas
//! - Latencia de dispatch (p50, p95, p99)

pub mod collector;

pub use collector::{BridgeMetrics, MetricsSnapshot};
