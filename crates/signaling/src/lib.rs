//! tafel-signaling – Raum-, Verlaufs- und Sitzungsverwaltung des Relays
//!
//! Dieser Crate implementiert den transportunabhaengigen Kern des
//! Tafel-Relays: Raeume mit begrenztem Verlauf, paralleles Fan-out an alle
//! Mitglieder und die Sitzung pro Verbindung.
//!
//! ## Architektur
//!
//! ```text
//! Transport (WebSocket / Speicher)
//!     |  ClientHandle + FrameEmpfaenger
//!     v
//! ClientSitzung (pro Verbindung ein Task)
//!     |  State Machine: Handshake -> Aktiv -> Schliessend -> Geschlossen
//!     |
//!     +-- zugang           (Origin, Token, Raum-ID)
//!     +-- RaumManager      (Raeume, Mitglieder, Verlauf)
//!     +-- EventBroadcaster (Fan-out, tote Peers entfernen)
//!
//! RelayStatistik – Zaehler fuer Health und Metriken
//! ```

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod handle;
pub mod raum;
pub mod raum_manager;
pub mod server_state;
pub mod speicher;
pub mod statistik;
pub mod zugang;

// Bequeme Re-Exporte
pub use broadcast::{BroadcastErgebnis, EventBroadcaster};
pub use connection::{ClientSitzung, SitzungsZustand, TrennGrund};
pub use error::{SignalingError, SignalingResult};
pub use handle::{ClientHandle, FrameEmpfaenger, GeteiltesHandle};
pub use raum::RaumInfo;
pub use raum_manager::RaumManager;
pub use server_state::{RelayConfig, RelayState};
pub use statistik::{RelayStatistik, StatistikSchnappschuss};
pub use zugang::HandshakeAnfrage;
