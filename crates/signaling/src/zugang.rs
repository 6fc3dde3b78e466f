//! Zugangspruefung beim Handshake – Origin, Token, Raum-ID
//!
//! Origins werden exakt verglichen. Eintraege wie `https://*.example.com`
//! sind gewoehnliche Strings und passen nur auf sich selbst.

use tafel_core::{RaumId, SchliessCode};

use crate::server_state::RelayConfig;

/// Daten aus dem Verbindungsaufbau
#[derive(Debug, Clone, Default)]
pub struct HandshakeAnfrage {
    /// Raum-ID wie im Pfad angegeben
    pub raum: String,
    /// `Origin`-Header
    pub origin: Option<String>,
    /// `token`-Query-Parameter
    pub token: Option<String>,
}

/// Grund fuer eine Ablehnung im Handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ablehnung {
    UngueltigerOrigin,
    UngueltigesToken,
    UngueltigeRaumId,
}

impl Ablehnung {
    pub fn schliesscode(self) -> SchliessCode {
        SchliessCode::RichtlinienVerstoss
    }
}

impl std::fmt::Display for Ablehnung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::UngueltigerOrigin => "ungueltiger Origin",
            Self::UngueltigesToken => "ungueltiges Token",
            Self::UngueltigeRaumId => "ungueltige Raum-ID",
        };
        f.write_str(text)
    }
}

/// Prueft den Origin gegen die Allow-List (exakter Vergleich)
pub fn origin_erlaubt(origin: Option<&str>, erlaubt: &[String]) -> bool {
    match origin {
        Some(origin) if !origin.is_empty() => erlaubt.iter().any(|e| e == origin),
        _ => false,
    }
}

/// Prueft das Token byteweise; ohne konfiguriertes Geheimnis immer gueltig
pub fn token_gueltig(token: Option<&str>, geheimnis: Option<&str>) -> bool {
    match geheimnis {
        None => true,
        Some(geheimnis) => token.is_some_and(|t| t.as_bytes() == geheimnis.as_bytes()),
    }
}

/// Fuehrt alle Handshake-Pruefungen in fester Reihenfolge aus
pub fn pruefen(anfrage: &HandshakeAnfrage, config: &RelayConfig) -> Result<RaumId, Ablehnung> {
    if !origin_erlaubt(anfrage.origin.as_deref(), &config.erlaubte_origins) {
        return Err(Ablehnung::UngueltigerOrigin);
    }
    if !token_gueltig(anfrage.token.as_deref(), config.shared_secret.as_deref()) {
        return Err(Ablehnung::UngueltigesToken);
    }
    RaumId::neu(anfrage.raum.clone()).map_err(|_| Ablehnung::UngueltigeRaumId)
}
