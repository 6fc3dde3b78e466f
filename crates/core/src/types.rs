//! Identifikationstypen und Schliesscodes fuer Tafel
//!
//! IDs verwenden das Newtype-Pattern, damit Raum- und Verbindungs-IDs
//! zur Compilezeit nicht verwechselt werden koennen.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::TafelError;

/// Raum-ID, vom Client als Pfadsegment geliefert
///
/// Wird unveraendert als Schluessel verwendet. Ausser "nicht leer" gibt es
/// keine Formatpruefung.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RaumId(Arc<str>);

impl RaumId {
    /// Erstellt eine RaumId aus einem beliebigen nicht-leeren String
    pub fn neu(id: impl Into<String>) -> Result<Self, TafelError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TafelError::LeereRaumId);
        }
        Ok(Self(Arc::from(id)))
    }

    /// Erzeugt eine frische, zufaellige RaumId (UUID v4)
    pub fn zufaellig() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RaumId {
    type Error = TafelError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::neu(id)
    }
}

impl From<RaumId> for String {
    fn from(id: RaumId) -> Self {
        id.0.to_string()
    }
}

impl std::fmt::Display for RaumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige ID einer Client-Verbindung
///
/// Die Identitaet eines Handles im Raum wird ueber diese ID verglichen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerbindungsId(pub Uuid);

impl VerbindungsId {
    /// Erstellt eine neue zufaellige VerbindungsId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for VerbindungsId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// WebSocket-Schliesscodes (RFC 6455) die das Relay verwendet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchliessCode {
    /// 1001 – normales/administratives Schliessen, Idle-Timeout, tote Peers, Shutdown
    Wegfall,
    /// 1008 – ungueltiger Origin oder Token
    RichtlinienVerstoss,
    /// 1009 – Frame ueberschreitet die maximale Groesse
    NachrichtZuGross,
    /// 1013 – Raum-Limit erreicht
    SpaeterVersuchen,
}

impl SchliessCode {
    /// Numerischer Code fuer den Close-Frame
    pub fn code(self) -> u16 {
        match self {
            Self::Wegfall => 1001,
            Self::RichtlinienVerstoss => 1008,
            Self::NachrichtZuGross => 1009,
            Self::SpaeterVersuchen => 1013,
        }
    }

    /// Kurzer Grundtext fuer den Close-Frame
    pub fn grund(self) -> &'static str {
        match self {
            Self::Wegfall => "going away",
            Self::RichtlinienVerstoss => "policy violation",
            Self::NachrichtZuGross => "message too big",
            Self::SpaeterVersuchen => "try again later",
        }
    }
}

impl std::fmt::Display for SchliessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code(), self.grund())
    }
}
