//! In-Memory-Transport – Verbindungen ohne Netzwerk
//!
//! Liefert ein Tripel aus Handle (Server-Sende-Seite), Empfaenger
//! (Server-Empfangs-Seite) und Gegenstelle (simulierter Client). Wird fuer
//! Tests und zum Einbetten des Relays ohne WebSocket verwendet.
//!
//! Ueber das Handle lassen sich langsame oder defekte Peers simulieren:
//! `verzoegerung_setzen` verzoegert jeden Sendevorgang, `fehler_setzen`
//! laesst ihn scheitern.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tafel_core::{SchliessCode, VerbindungsId};
use tokio::sync::{mpsc, watch};

use crate::error::{SignalingError, SignalingResult};
use crate::handle::{ClientHandle, FrameEmpfaenger};

/// Wartezeit der Gegenstelle auf eingehende Frames
const EMPFANGS_WARTEZEIT: Duration = Duration::from_secs(1);

/// Frame vom simulierten Client an den Server
#[derive(Debug)]
enum Eingang {
    Text(String),
    Binaer(Vec<u8>),
    Fehler(String),
}

/// Erstellt eine neue In-Memory-Verbindung
pub fn speicher_verbindung() -> (Arc<SpeicherVerbindung>, SpeicherEmpfaenger, SpeicherGegenstelle) {
    let (eingang_tx, eingang_rx) = mpsc::unbounded_channel();
    let (ausgang_tx, ausgang_rx) = mpsc::unbounded_channel();
    let (schliess_tx, schliess_rx) = watch::channel(None);

    let handle = Arc::new(SpeicherVerbindung {
        id: VerbindungsId::new(),
        ausgang_tx,
        schliess_tx,
        angenommen: AtomicBool::new(false),
        verzoegerung_ms: AtomicU64::new(0),
        fehler: AtomicBool::new(false),
    });
    let empfaenger = SpeicherEmpfaenger {
        eingang_rx,
        schliess_rx: schliess_rx.clone(),
    };
    let gegenstelle = SpeicherGegenstelle {
        eingang_tx: Some(eingang_tx),
        ausgang_rx,
        schliess_rx,
    };
    (handle, empfaenger, gegenstelle)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Server-seitige Sende-Haelfte einer In-Memory-Verbindung
pub struct SpeicherVerbindung {
    id: VerbindungsId,
    ausgang_tx: mpsc::UnboundedSender<String>,
    schliess_tx: watch::Sender<Option<SchliessCode>>,
    angenommen: AtomicBool,
    verzoegerung_ms: AtomicU64,
    fehler: AtomicBool,
}

impl SpeicherVerbindung {
    /// Verzoegert jeden folgenden Sendevorgang
    pub fn verzoegerung_setzen(&self, dauer: Duration) {
        self.verzoegerung_ms
            .store(dauer.as_millis() as u64, Ordering::Relaxed);
    }

    /// Laesst jeden folgenden Sendevorgang fehlschlagen
    pub fn fehler_setzen(&self, fehler: bool) {
        self.fehler.store(fehler, Ordering::Relaxed);
    }

    pub fn ist_angenommen(&self) -> bool {
        self.angenommen.load(Ordering::Relaxed)
    }

    pub fn schliesscode(&self) -> Option<SchliessCode> {
        *self.schliess_tx.borrow()
    }
}

#[async_trait]
impl ClientHandle for SpeicherVerbindung {
    fn id(&self) -> VerbindungsId {
        self.id
    }

    async fn annehmen(&self) -> SignalingResult<()> {
        self.angenommen.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn text_senden(&self, text: &str) -> SignalingResult<()> {
        if self.fehler.load(Ordering::Relaxed) {
            return Err(SignalingError::transport("simulierter Sendefehler"));
        }
        let verzoegerung = self.verzoegerung_ms.load(Ordering::Relaxed);
        if verzoegerung > 0 {
            tokio::time::sleep(Duration::from_millis(verzoegerung)).await;
        }
        if self.ist_geschlossen() {
            return Err(SignalingError::VerbindungGetrennt);
        }
        self.ausgang_tx
            .send(text.to_owned())
            .map_err(|_| SignalingError::VerbindungGetrennt)
    }

    async fn schliessen(&self, code: SchliessCode) -> SignalingResult<()> {
        // Nur der erste Code zaehlt
        self.schliess_tx.send_if_modified(|aktuell| {
            if aktuell.is_none() {
                *aktuell = Some(code);
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn ist_geschlossen(&self) -> bool {
        self.schliess_tx.borrow().is_some()
    }
}

// ---------------------------------------------------------------------------
// Empfaenger
// ---------------------------------------------------------------------------

/// Server-seitige Empfangs-Haelfte einer In-Memory-Verbindung
pub struct SpeicherEmpfaenger {
    eingang_rx: mpsc::UnboundedReceiver<Eingang>,
    schliess_rx: watch::Receiver<Option<SchliessCode>>,
}

#[async_trait]
impl FrameEmpfaenger for SpeicherEmpfaenger {
    async fn text_empfangen(&mut self) -> SignalingResult<Option<String>> {
        if self.schliess_rx.borrow().is_some() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            frame = self.eingang_rx.recv() => match frame {
                Some(Eingang::Text(text)) => Ok(Some(text)),
                Some(Eingang::Binaer(daten)) => Err(SignalingError::protokoll(format!(
                    "Binaerframe ({} Bytes) statt Text",
                    daten.len()
                ))),
                Some(Eingang::Fehler(grund)) => Err(SignalingError::transport(grund)),
                None => Ok(None),
            },
            _ = async { self.schliess_rx.wait_for(|code| code.is_some()).await.map(|_| ()) } => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Gegenstelle
// ---------------------------------------------------------------------------

/// Simulierter Client am anderen Ende der Verbindung
pub struct SpeicherGegenstelle {
    eingang_tx: Option<mpsc::UnboundedSender<Eingang>>,
    ausgang_rx: mpsc::UnboundedReceiver<String>,
    schliess_rx: watch::Receiver<Option<SchliessCode>>,
}

impl SpeicherGegenstelle {
    /// Sendet einen Text-Frame an den Server
    pub fn senden(&self, text: impl Into<String>) {
        if let Some(tx) = &self.eingang_tx {
            let _ = tx.send(Eingang::Text(text.into()));
        }
    }

    /// Sendet eine Nachricht als JSON
    pub fn json_senden(&self, wert: &Value) {
        self.senden(wert.to_string());
    }

    pub fn binaer_senden(&self, daten: Vec<u8>) {
        if let Some(tx) = &self.eingang_tx {
            let _ = tx.send(Eingang::Binaer(daten));
        }
    }

    /// Simuliert einen Transportfehler auf der Empfangs-Seite des Servers
    pub fn transportfehler(&self, grund: impl Into<String>) {
        if let Some(tx) = &self.eingang_tx {
            let _ = tx.send(Eingang::Fehler(grund.into()));
        }
    }

    /// Client trennt die Verbindung
    pub fn trennen(&mut self) {
        self.eingang_tx = None;
    }

    /// Wartet auf den naechsten Frame vom Server (max. 1s)
    pub async fn empfangen(&mut self) -> Option<String> {
        tokio::time::timeout(EMPFANGS_WARTEZEIT, self.ausgang_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wartet auf den naechsten Frame und parst ihn als JSON
    pub async fn json_empfangen(&mut self) -> Option<Value> {
        let text = self.empfangen().await?;
        serde_json::from_str(&text).ok()
    }

    /// Naechster bereits vorliegender Frame, ohne zu warten
    pub fn sofort_empfangen(&mut self) -> Option<String> {
        self.ausgang_rx.try_recv().ok()
    }

    pub fn schliesscode(&self) -> Option<SchliessCode> {
        *self.schliess_rx.borrow()
    }

    /// Wartet bis der Server die Verbindung schliesst (max. 1s)
    pub async fn schliessen_abwarten(&mut self) -> Option<SchliessCode> {
        let warten = async {
            self.schliess_rx
                .wait_for(|code| code.is_some())
                .await
                .map(|code| *code)
        };
        match tokio::time::timeout(EMPFANGS_WARTEZEIT, warten).await {
            Ok(Ok(code)) => code,
            _ => None,
        }
    }
}
