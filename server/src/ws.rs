//! WebSocket-Transport – axum `WebSocket` als `ClientHandle`
//!
//! Der Socket wird in Sink und Stream geteilt. Der Sink liegt hinter einer
//! async Mutex, damit Sitzung und parallele Broadcasts senden koennen; der
//! Stream gehoert exklusiv der Sitzung.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tafel_core::{SchliessCode, VerbindungsId};
use tafel_signaling::{ClientHandle, FrameEmpfaenger, SignalingError, SignalingResult};
use tokio::sync::{watch, Mutex};

/// Teilt einen WebSocket in Handle und Empfaenger
pub fn ws_verbindung(socket: WebSocket) -> (Arc<WsVerbindung>, WsEmpfaenger) {
    let (sink, stream) = socket.split();
    let (geschlossen_tx, geschlossen_rx) = watch::channel(false);
    let handle = Arc::new(WsVerbindung {
        id: VerbindungsId::new(),
        sink: Mutex::new(sink),
        geschlossen_tx,
    });
    let empfaenger = WsEmpfaenger {
        stream,
        geschlossen_rx,
    };
    (handle, empfaenger)
}

/// Sende-Haelfte einer WebSocket-Verbindung
pub struct WsVerbindung {
    id: VerbindungsId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    geschlossen_tx: watch::Sender<bool>,
}

#[async_trait]
impl ClientHandle for WsVerbindung {
    fn id(&self) -> VerbindungsId {
        self.id
    }

    async fn annehmen(&self) -> SignalingResult<()> {
        // Upgrade ist bereits durch axum erfolgt
        Ok(())
    }

    async fn text_senden(&self, text: &str) -> SignalingResult<()> {
        if self.ist_geschlossen() {
            return Err(SignalingError::VerbindungGetrennt);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| SignalingError::transport(e.to_string()))
    }

    async fn schliessen(&self, code: SchliessCode) -> SignalingResult<()> {
        // Nur der erste Aufruf sendet den Close-Frame
        if self.geschlossen_tx.send_replace(true) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: code.code(),
            reason: Cow::Borrowed(code.grund()),
        };
        let ergebnis = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
        ergebnis.map_err(|e| SignalingError::transport(e.to_string()))
    }

    fn ist_geschlossen(&self) -> bool {
        *self.geschlossen_tx.borrow()
    }
}

/// Empfangs-Haelfte einer WebSocket-Verbindung
pub struct WsEmpfaenger {
    stream: SplitStream<WebSocket>,
    geschlossen_rx: watch::Receiver<bool>,
}

impl WsEmpfaenger {
    async fn naechster_text(&mut self) -> SignalingResult<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(daten))) => {
                    return Err(SignalingError::protokoll(format!(
                        "Binaerframe ({} Bytes) statt Text",
                        daten.len()
                    )))
                }
                // Pong beantwortet axum selbst
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(SignalingError::transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl FrameEmpfaenger for WsEmpfaenger {
    async fn text_empfangen(&mut self) -> SignalingResult<Option<String>> {
        if *self.geschlossen_rx.borrow() {
            return Ok(None);
        }
        let mut geschlossen_rx = self.geschlossen_rx.clone();
        tokio::select! {
            biased;
            frame = self.naechster_text() => frame,
            _ = async { geschlossen_rx.wait_for(|g| *g).await.map(|_| ()) } => Ok(None),
        }
    }
}
