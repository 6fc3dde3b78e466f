//! HTTP-Routen des Relays
//!
//! - `GET /ws/:room_id?token=` – WebSocket-Endpunkt
//! - `POST /rooms` – neue Raum-ID
//! - `GET /create-room` – veraltete Variante von `POST /rooms`
//! - `GET /health`, `GET /metrics` – aus `tafel-observability`

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tafel_core::RaumId;
use tafel_observability::{
    health_router, metrics_router, request_timing_layer, sicherheits_header, timing_middleware,
    TafelMetrics,
};
use tafel_signaling::{ClientSitzung, HandshakeAnfrage, RelayState};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::ws::ws_verbindung;

#[derive(Clone)]
struct AppState {
    relay: Arc<RelayState>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Antwort von `POST /rooms`
#[derive(Debug, Serialize, Deserialize)]
pub struct RaumAntwort {
    pub room_id: String,
}

/// Baut den Router mit allen Routen und Layern
pub fn router(
    relay: Arc<RelayState>,
    metriken: Option<TafelMetrics>,
    shutdown_rx: watch::Receiver<bool>,
) -> Router {
    let cors = cors_layer(&relay.config.erlaubte_origins);

    let mut app = Router::new()
        .route("/ws/:room_id", get(ws_handler))
        .route("/rooms", post(raum_erstellen))
        .route("/create-room", get(raum_erstellen_veraltet))
        .with_state(AppState {
            relay: Arc::clone(&relay),
            shutdown_rx,
        })
        .merge(health_router(Arc::clone(&relay)));

    if let Some(metriken) = metriken {
        app = app
            .merge(metrics_router(relay, metriken.clone()))
            .route_layer(middleware::from_fn_with_state(metriken, timing_middleware));
    }

    app.layer(cors)
        .layer(middleware::from_fn(sicherheits_header))
        .layer(request_timing_layer())
}

/// CORS fuer die konfigurierten Origins, mit Credentials
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// `GET /ws/:room_id` – startet eine Client-Sitzung
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    tracing::info!(raum = %room_id, "Eingehende WebSocket-Verbindung");

    let anfrage = HandshakeAnfrage {
        raum: room_id,
        origin,
        token: query.token,
    };
    ws.on_upgrade(move |socket| async move {
        let (handle, empfaenger) = ws_verbindung(socket);
        let sitzung = ClientSitzung::neu(state.relay, handle, empfaenger);
        sitzung.verarbeiten(anfrage, state.shutdown_rx).await;
    })
}

/// `POST /rooms` – erzeugt eine neue Raum-ID
///
/// Der Raum selbst entsteht erst beim ersten Beitritt.
async fn raum_erstellen() -> impl IntoResponse {
    let raum = RaumId::zufaellig();
    tracing::info!(raum = %raum, "Raum-ID erzeugt");
    Json(RaumAntwort {
        room_id: raum.as_str().to_owned(),
    })
}

/// `GET /create-room` – veraltet, nur fuer alte Clients
async fn raum_erstellen_veraltet() -> impl IntoResponse {
    tracing::warn!("GET /create-room ist veraltet, bitte POST /rooms verwenden");
    raum_erstellen().await
}
