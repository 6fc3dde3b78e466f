//! # tafel-observability
//!
//! Observability-Crate fuer Tafel:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber
//! - Request-Timing und Sicherheits-Header als Middleware

pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use health::{health_router, HealthResponse, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, TafelMetrics};
pub use middleware::{request_timing_layer, sicherheits_header, timing_middleware};
