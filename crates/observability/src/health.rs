//! Health-Check-Endpunkt fuer das Tafel-Relay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Raum- und Verbindungsanzahl

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tafel_signaling::RelayState;

/// Status des Health-Checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Raumtabelle voll, neue Raeume werden abgelehnt
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub raeume: usize,
    pub verbindungen: usize,
}

impl HealthResponse {
    /// Erstellt eine Momentaufnahme des Relay-Zustands
    pub async fn erfassen(state: &RelayState) -> Self {
        let raeume = state.raeume.raum_anzahl().await;
        let verbindungen = state.raeume.verbindungs_anzahl().await;
        let status = if raeume >= state.config.max_raeume {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.uptime_sek(),
            raeume,
            verbindungen,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
///
/// Auch `degraded` liefert 200, die Probe soll nicht fehlschlagen.
async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::erfassen(&state).await))
}
