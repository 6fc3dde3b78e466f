//! Fehlertypen fuer den Signaling-Service

use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Transportfehler beim Senden oder Empfangen
    #[error("Transportfehler: {0}")]
    Transport(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (z.B. Binaerframe statt Text)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Maximale Raumanzahl erreicht
    #[error("Raum-Limit erreicht (max {max})")]
    RaumLimit { max: usize },

    /// Senden hat das Zeitlimit ueberschritten
    #[error("Timeout")]
    Timeout,
}

impl SignalingError {
    /// Erstellt einen Transportfehler
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
