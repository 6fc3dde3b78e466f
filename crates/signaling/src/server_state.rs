//! Gemeinsamer Relay-Zustand
//!
//! Haelt Konfiguration, Raum-Manager, Broadcaster und Statistik. Wird
//! beim Prozessstart einmal erzeugt und per `Arc` an jede Sitzung
//! weitergegeben; es gibt keinen globalen Zustand.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::EventBroadcaster;
use crate::raum_manager::RaumManager;
use crate::statistik::RelayStatistik;

/// Standard-Origins fuer lokale Entwicklung und Render-Deployments
pub const STANDARD_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5174",
    "http://127.0.0.1:5174",
    "https://*.onrender.com",
];

/// Konfiguration des Relay-Kerns
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximale Verlaufseintraege pro Raum
    pub max_verlauf: usize,
    /// Maximale Anzahl gleichzeitiger Raeume
    pub max_raeume: usize,
    /// Zeitlimit pro Sendevorgang beim Broadcast
    pub sende_timeout: Duration,
    /// Maximale Frame-Groesse in Bytes (UTF-8)
    pub max_nachricht_bytes: usize,
    /// Leerlauf-Timeout; `None` = kein Timeout
    pub idle_timeout: Option<Duration>,
    /// Zeichen-Events auch an den Absender zuruecksenden
    pub echo_absender: bool,
    /// Gemeinsames Geheimnis fuer den `token`-Parameter
    pub shared_secret: Option<String>,
    /// Erlaubte Origins (exakter Vergleich, keine Wildcards)
    pub erlaubte_origins: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_verlauf: 500,
            max_raeume: 1000,
            sende_timeout: Duration::from_secs(2),
            max_nachricht_bytes: 65_536,
            idle_timeout: None,
            echo_absender: true,
            shared_secret: None,
            erlaubte_origins: STANDARD_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub raeume: RaumManager,
    pub broadcaster: EventBroadcaster,
    pub statistik: Arc<RelayStatistik>,
    /// Startzeitpunkt (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl RelayState {
    /// Erstellt einen neuen RelayState
    pub fn neu(config: RelayConfig) -> Arc<Self> {
        let statistik = Arc::new(RelayStatistik::neu());
        let raeume = RaumManager::neu(&config);
        let broadcaster =
            EventBroadcaster::neu(raeume.clone(), config.sende_timeout, Arc::clone(&statistik));
        Arc::new(Self {
            config: Arc::new(config),
            raeume,
            broadcaster,
            statistik,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.max_verlauf, 500);
        assert_eq!(cfg.max_raeume, 1000);
        assert_eq!(cfg.sende_timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_nachricht_bytes, 65_536);
        assert!(cfg.idle_timeout.is_none());
        assert!(cfg.echo_absender);
        assert!(cfg.shared_secret.is_none());
        assert_eq!(cfg.erlaubte_origins.len(), 7);
    }

    #[tokio::test]
    async fn state_startet_leer() {
        let state = RelayState::neu(RelayConfig::default());
        assert_eq!(state.raeume.raum_anzahl().await, 0);
        assert_eq!(state.statistik.schnappschuss().broadcasts, 0);
        assert!(state.uptime_sek() < 5);
    }
}
