//! tafel-core – Gemeinsame Typen, Wire-Format und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Relay-Kern und Server
//! gemeinsam nutzen: Raum- und Verbindungs-IDs, den Nachrichten-Umschlag
//! und die WebSocket-Schliesscodes.

pub mod error;
pub mod nachricht;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, TafelError};
pub use nachricht::{Nachricht, NachrichtenArt, VerlaufNachricht};
pub use types::{RaumId, SchliessCode, VerbindungsId};
