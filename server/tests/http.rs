//! Integration-Tests fuer die HTTP-Routen (ohne Netzwerk, via `oneshot`)

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tafel_server::{config::ServerConfig, Server};
use tower::ServiceExt;

const ORIGIN: &str = "http://localhost:5173";

fn app() -> (Server, Router) {
    let server = Server::neu(ServerConfig::default()).unwrap();
    let router = server.router();
    (server, router)
}

async fn json(antwort: axum::response::Response) -> Value {
    let bytes = to_bytes(antwort.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn ist_uuid_v4(text: &str) -> bool {
    uuid::Uuid::parse_str(text).is_ok_and(|id| id.get_version_num() == 4)
}

#[tokio::test]
async fn raum_erstellen_liefert_uuid() {
    let (server, app) = app();

    let antwort = app
        .oneshot(
            Request::post("/rooms")
                .header(header::ORIGIN, ORIGIN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::OK);
    let body = json(antwort).await;
    assert!(ist_uuid_v4(body["room_id"].as_str().unwrap()), "{body}");

    // Keine Seiteneffekte auf die Raumtabelle
    assert_eq!(server.relay().raeume.raum_anzahl().await, 0);
}

#[tokio::test]
async fn raum_ids_sind_verschieden() {
    let (_server, app) = app();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let antwort = app
            .clone()
            .oneshot(Request::post("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        ids.push(json(antwort).await["room_id"].as_str().unwrap().to_owned());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn veraltete_route_funktioniert_noch() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(Request::get("/create-room").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::OK);
    assert!(ist_uuid_v4(json(antwort).await["room_id"].as_str().unwrap()));
}

#[tokio::test]
async fn get_auf_rooms_ist_nicht_erlaubt() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(Request::get("/rooms").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn health_zeigt_zaehler() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::OK);
    let body = json(antwort).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["raeume"], 0);
    assert_eq!(body["verbindungen"], 0);
}

#[tokio::test]
async fn metrics_im_prometheus_format() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::OK);
    let bytes = to_bytes(antwort.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tafel_rooms_active"));
}

#[tokio::test]
async fn metrics_abschaltbar() {
    let mut config = ServerConfig::default();
    config.observability.metriken_aktiviert = false;
    let app = Server::neu(config).unwrap().router();
    let antwort = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(antwort.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sicherheits_header_auf_jeder_antwort() {
    let (_server, app) = app();
    for pfad in ["/health", "/gibtsnicht"] {
        let antwort = app
            .clone()
            .oneshot(Request::get(pfad).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let h = antwort.headers();
        assert!(h.contains_key("content-security-policy"), "{pfad}");
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["x-frame-options"], "SAMEORIGIN");
        assert_eq!(h["x-xss-protection"], "1; mode=block");
    }
}

#[tokio::test]
async fn cors_preflight_fuer_erlaubten_origin() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/rooms")
                .header(header::ORIGIN, ORIGIN)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let h = antwort.headers();
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    let methoden = h[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(methoden.contains("POST"));
}

#[tokio::test]
async fn cors_ignoriert_fremden_origin() {
    let (_server, app) = app();
    let antwort = app
        .oneshot(
            Request::post("/rooms")
                .header(header::ORIGIN, "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(!antwort
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn ws_ohne_upgrade_wird_abgelehnt() {
    let (server, app) = app();
    let antwort = app
        .oneshot(
            Request::get("/ws/r1")
                .header(header::ORIGIN, ORIGIN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(antwort.status().is_client_error());
    assert!(!server.relay().raeume.existiert(&tafel_core::RaumId::neu("r1").unwrap()).await);
}

#[test]
fn ungueltige_config_wird_abgelehnt() {
    let mut config = ServerConfig::default();
    config.netzwerk.sende_timeout_sek = -1.0;
    assert!(Server::neu(config).is_err());
}

#[test]
fn nicht_darstellbares_timeout_wird_abgelehnt() {
    let mut config = ServerConfig::default();
    config.netzwerk.sende_timeout_sek = 1e20;
    assert!(Server::neu(config).is_err());
}
