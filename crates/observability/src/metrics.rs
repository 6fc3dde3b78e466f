//! Prometheus-kompatible Metriken fuer das Tafel-Relay
//!
//! Registrierte Metriken:
//! - `tafel_connected_clients` – Gauge: Aktuell verbundene Clients
//! - `tafel_rooms_active` – Gauge: Raeume in der Tabelle
//! - `tafel_connections_total` – Counter: Registrierte Verbindungen
//! - `tafel_rejected_handshakes_total` – Counter: Abgelehnte Handshakes
//! - `tafel_dropped_frames_total` – Counter: Verworfene Frames
//! - `tafel_broadcasts_total` – Counter: Broadcasts mit Empfaengern
//! - `tafel_deliveries_total` – Counter: Erfolgreiche Zustellungen
//! - `tafel_pruned_peers_total` – Counter: Als tot entfernte Verbindungen
//! - `tafel_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `tafel_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit
//!
//! Die Relay-Zaehler leben in `RelayStatistik` und werden bei jedem Scrape
//! nachgezogen.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tafel_signaling::RelayState;

/// Alle Tafel-Prometheus-Metriken
#[derive(Clone)]
pub struct TafelMetrics {
    pub registry: Arc<Registry>,

    // Relay-Metriken
    pub connected_clients: Gauge,
    pub rooms_active: Gauge,
    pub connections_total: IntCounter,
    pub rejected_handshakes_total: IntCounter,
    pub dropped_frames_total: IntCounter,
    pub broadcasts_total: IntCounter,
    pub deliveries_total: IntCounter,
    pub pruned_peers_total: IntCounter,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let zaehler = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(zaehler.clone()))?;
    Ok(zaehler)
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Zieht einen Prometheus-Counter auf einen absoluten Zaehlerstand nach
fn angleichen(zaehler: &IntCounter, stand: u64) {
    let bisher = zaehler.get();
    if stand > bisher {
        zaehler.inc_by(stand - bisher);
    }
}

impl TafelMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Relay-Metriken ---
        let connected_clients = gauge(
            &registry,
            "tafel_connected_clients",
            "Anzahl aktuell verbundener Clients",
        )?;
        let rooms_active = gauge(&registry, "tafel_rooms_active", "Anzahl aktiver Raeume")?;
        let connections_total = zaehler(
            &registry,
            "tafel_connections_total",
            "Gesamtanzahl registrierter Verbindungen",
        )?;
        let rejected_handshakes_total = zaehler(
            &registry,
            "tafel_rejected_handshakes_total",
            "Gesamtanzahl abgelehnter Handshakes",
        )?;
        let dropped_frames_total = zaehler(
            &registry,
            "tafel_dropped_frames_total",
            "Gesamtanzahl verworfener Frames",
        )?;
        let broadcasts_total = zaehler(
            &registry,
            "tafel_broadcasts_total",
            "Gesamtanzahl Broadcasts",
        )?;
        let deliveries_total = zaehler(
            &registry,
            "tafel_deliveries_total",
            "Gesamtanzahl erfolgreicher Zustellungen",
        )?;
        let pruned_peers_total = zaehler(
            &registry,
            "tafel_pruned_peers_total",
            "Gesamtanzahl entfernter toter Verbindungen",
        )?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new("tafel_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tafel_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        // --- Prozess-Metriken (CPU, Speicher, Dateideskriptoren) ---
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            rooms_active,
            connections_total,
            rejected_handshakes_total,
            dropped_frames_total,
            broadcasts_total,
            deliveries_total,
            pruned_peers_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Uebernimmt den aktuellen Relay-Zustand in die Metriken
    pub async fn aktualisieren(&self, state: &RelayState) {
        self.connected_clients
            .set(state.raeume.verbindungs_anzahl().await as f64);
        self.rooms_active.set(state.raeume.raum_anzahl().await as f64);

        let statistik = state.statistik.schnappschuss();
        angleichen(&self.connections_total, statistik.verbindungen);
        angleichen(&self.rejected_handshakes_total, statistik.abgelehnt);
        angleichen(&self.dropped_frames_total, statistik.verworfene_frames);
        angleichen(&self.broadcasts_total, statistik.broadcasts);
        angleichen(&self.deliveries_total, statistik.zustellungen);
        angleichen(&self.pruned_peers_total, statistik.entfernte_peers);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct MetrikState {
    relay: Arc<RelayState>,
    metriken: TafelMetrics,
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(relay: Arc<RelayState>, metriken: TafelMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(MetrikState { relay, metriken })
}

async fn metrics_handler(State(state): State<MetrikState>) -> impl IntoResponse {
    state.metriken.aktualisieren(&state.relay).await;
    match state.metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
