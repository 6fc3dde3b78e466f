//! Fehlertypen fuer Tafel
//!
//! Fehler die beim Parsen von Eingaben (Raum-IDs, Nachrichten) entstehen.
//! Transport- und Raumfehler definiert das Signaling-Crate selbst.

use thiserror::Error;

/// Globaler Result-Alias fuer Tafel
pub type Result<T> = std::result::Result<T, TafelError>;

/// Fehler beim Verarbeiten von Client-Eingaben
#[derive(Debug, Error)]
pub enum TafelError {
    #[error("Ungueltige Raum-ID: darf nicht leer sein")]
    LeereRaumId,

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(#[from] serde_json::Error),

    #[error("Nachricht ist kein JSON-Objekt")]
    KeinObjekt,

    #[error("Feld 'type' fehlt oder ist kein String")]
    TypFehlt,
}
