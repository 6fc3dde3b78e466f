//! End-to-End-Tests mit echtem WebSocket-Client

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tafel_core::RaumId;
use tafel_server::{config::ServerConfig, Server};
use tafel_signaling::RelayState;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

const TIMEOUT: Duration = Duration::from_secs(5);
const ORIGIN: &str = "http://localhost:5173";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    basis: String,
    relay: Arc<RelayState>,
    stopp: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

/// Startet einen Server auf einem freien Port
async fn server_starten(config: ServerConfig) -> TestServer {
    let server = Server::neu(config).unwrap();
    let relay = Arc::clone(server.relay());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    let (stopp, stopp_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.starten_mit(listener, async move {
        let _ = stopp_rx.await;
    }));
    TestServer {
        basis: format!("ws://{adresse}"),
        relay,
        stopp,
        task,
    }
}

async fn verbinden(server: &TestServer, pfad: &str, origin: Option<&'static str>) -> WsStream {
    let mut anfrage = format!("{}{pfad}", server.basis)
        .into_client_request()
        .unwrap();
    if let Some(origin) = origin {
        anfrage
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
    }
    let (ws, _) = connect_async(anfrage).await.unwrap();
    ws
}

/// Liest den naechsten Text-Frame als JSON
async fn json_lesen(ws: &mut WsStream) -> Value {
    loop {
        let nachricht = timeout(TIMEOUT, ws.next())
            .await
            .expect("Timeout beim Warten auf Nachricht")
            .expect("Stream geschlossen")
            .expect("WebSocket-Fehler");
        if let Message::Text(text) = nachricht {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Liest bis zum Close-Frame und gibt dessen Code zurueck
async fn schliesscode_lesen(ws: &mut WsStream) -> Option<u16> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("Timeout beim Warten auf Close") {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

async fn senden(ws: &mut WsStream, wert: Value) {
    ws.send(Message::Text(wert.to_string())).await.unwrap();
}

async fn warten_bis_raum_weg(relay: &RelayState, raum: &str) {
    let id = RaumId::neu(raum).unwrap();
    for _ in 0..100 {
        if !relay.raeume.existiert(&id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Raum {raum} wurde nicht entfernt");
}

#[tokio::test]
async fn zwei_clients_zeichnen_und_leeren() {
    let server = server_starten(ServerConfig::default()).await;

    let mut a = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    assert_eq!(json_lesen(&mut a).await, json!({"type": "history", "payload": []}));

    let strich = json!({"type": "draw", "payload": {"x": 3, "y": 4}});
    senden(&mut a, strich.clone()).await;
    assert_eq!(json_lesen(&mut a).await, strich);

    let mut b = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    assert_eq!(
        json_lesen(&mut b).await,
        json!({"type": "history", "payload": [strich]})
    );

    senden(&mut a, json!({"type": "clear"})).await;
    assert_eq!(json_lesen(&mut a).await, json!({"type": "clear"}));
    assert_eq!(json_lesen(&mut b).await, json!({"type": "clear"}));

    b.close(None).await.unwrap();
    a.close(None).await.unwrap();
    warten_bis_raum_weg(&server.relay, "R1").await;

    server.stopp.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn fremder_origin_bekommt_1008() {
    let server = server_starten(ServerConfig::default()).await;

    let mut ws = verbinden(&server, "/ws/R1", Some("http://evil.example")).await;
    assert_eq!(schliesscode_lesen(&mut ws).await, Some(1008));

    let mut ohne = verbinden(&server, "/ws/R1", None).await;
    assert_eq!(schliesscode_lesen(&mut ohne).await, Some(1008));

    assert_eq!(server.relay.raeume.raum_anzahl().await, 0);
    assert_eq!(server.relay.statistik.schnappschuss().abgelehnt, 2);
}

#[tokio::test]
async fn token_aus_query_wird_geprueft() {
    let mut config = ServerConfig::default();
    config.sicherheit.shared_secret = Some("geheim".into());
    let server = server_starten(config).await;

    let mut falsch = verbinden(&server, "/ws/R1?token=falsch", Some(ORIGIN)).await;
    assert_eq!(schliesscode_lesen(&mut falsch).await, Some(1008));

    let mut richtig = verbinden(&server, "/ws/R1?token=geheim", Some(ORIGIN)).await;
    assert_eq!(json_lesen(&mut richtig).await["type"], "history");
}

#[tokio::test]
async fn raumlimit_bekommt_1013() {
    let mut config = ServerConfig::default();
    config.raeume.max_raeume = 1;
    let server = server_starten(config).await;

    let mut a = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    json_lesen(&mut a).await;

    let mut b = verbinden(&server, "/ws/R2", Some(ORIGIN)).await;
    assert_eq!(schliesscode_lesen(&mut b).await, Some(1013));
}

#[tokio::test]
async fn zu_grosser_frame_bekommt_1009() {
    let mut config = ServerConfig::default();
    config.netzwerk.max_nachricht_bytes = 128;
    let server = server_starten(config).await;

    let mut a = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    json_lesen(&mut a).await;

    senden(&mut a, json!({"type": "draw", "payload": "x".repeat(200)})).await;
    assert_eq!(schliesscode_lesen(&mut a).await, Some(1009));
    warten_bis_raum_weg(&server.relay, "R1").await;
}

#[tokio::test]
async fn ungueltiges_json_haelt_verbindung_offen() {
    let server = server_starten(ServerConfig::default()).await;

    let mut a = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    json_lesen(&mut a).await;

    a.send(Message::Text("{kaputt".into())).await.unwrap();
    senden(&mut a, json!({"type": "draw", "payload": 1})).await;
    assert_eq!(json_lesen(&mut a).await["type"], "draw");
}

#[tokio::test]
async fn shutdown_schliesst_mit_1001() {
    let server = server_starten(ServerConfig::default()).await;

    let mut a = verbinden(&server, "/ws/R1", Some(ORIGIN)).await;
    let mut b = verbinden(&server, "/ws/R2", Some(ORIGIN)).await;
    json_lesen(&mut a).await;
    json_lesen(&mut b).await;

    server.stopp.send(()).unwrap();
    assert_eq!(schliesscode_lesen(&mut a).await, Some(1001));
    assert_eq!(schliesscode_lesen(&mut b).await, Some(1001));
    server.task.await.unwrap().unwrap();
    assert_eq!(server.relay.raeume.raum_anzahl().await, 0);
}
