//! Verbindungs-Handle – Die Transport-Schnittstelle des Relays
//!
//! Der Relay-Kern kennt keine WebSockets. Er arbeitet gegen zwei Traits:
//!
//! - `ClientHandle`: Sende-Seite, wird zwischen Sitzung und Broadcaster
//!   geteilt (`Arc<dyn ClientHandle>`). Mehrere Broadcasts koennen
//!   gleichzeitig senden; die Implementierung serialisiert intern.
//! - `FrameEmpfaenger`: Empfangs-Seite, gehoert exklusiv der Sitzung.
//!
//! Der Transport muss die Reihenfolge pro Verbindung erhalten.

use async_trait::async_trait;
use std::sync::Arc;
use tafel_core::{SchliessCode, VerbindungsId};

use crate::error::SignalingResult;

/// Sende-Seite einer Client-Verbindung
#[async_trait]
pub trait ClientHandle: Send + Sync + 'static {
    /// Identitaet des Handles (Vergleich im Raum)
    fn id(&self) -> VerbindungsId;

    /// Schliesst den Handshake auf Transportebene ab
    async fn annehmen(&self) -> SignalingResult<()>;

    /// Sendet einen Text-Frame
    async fn text_senden(&self, text: &str) -> SignalingResult<()>;

    /// Schliesst die Verbindung mit dem gegebenen Code
    ///
    /// Muss idempotent sein: weitere Aufrufe nach dem ersten sind No-Ops.
    async fn schliessen(&self, code: SchliessCode) -> SignalingResult<()>;

    /// Gibt true zurueck wenn die Verbindung bereits geschlossen ist
    fn ist_geschlossen(&self) -> bool;
}

/// Empfangs-Seite einer Client-Verbindung
#[async_trait]
pub trait FrameEmpfaenger: Send {
    /// Wartet auf den naechsten Text-Frame
    ///
    /// `Ok(None)` bedeutet: die Gegenstelle hat die Verbindung geschlossen.
    async fn text_empfangen(&mut self) -> SignalingResult<Option<String>>;
}

/// Geteiltes Handle wie es im Raum gespeichert wird
pub type GeteiltesHandle = Arc<dyn ClientHandle>;
