//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist. Umgebungsvariablen (`MAX_ROOMS`, `SHARED_SECRET`, ...)
//! ueberschreiben die Werte aus der Datei.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tafel_signaling::server_state::{RelayConfig, STANDARD_ORIGINS};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Raum- und Verlaufsgrenzen
    pub raeume: RaumEinstellungen,
    /// Origin-Pruefung und Token
    pub sicherheit: SicherheitsEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Zeichen-Events auch an den Absender zuruecksenden
    pub echo_absender: bool,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Tafel Relay".into(),
            echo_absender: true,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer HTTP und WebSocket
    pub bind_adresse: String,
    pub port: u16,
    /// Zeitlimit pro Sendevorgang in Sekunden
    pub sende_timeout_sek: f64,
    /// Maximale Frame-Groesse in Bytes
    pub max_nachricht_bytes: usize,
    /// Leerlauf-Timeout in Sekunden (fehlt oder <= 0 = kein Timeout)
    pub idle_timeout_sek: Option<f64>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8000,
            sende_timeout_sek: 2.0,
            max_nachricht_bytes: 65_536,
            idle_timeout_sek: None,
        }
    }
}

/// Raum- und Verlaufsgrenzen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaumEinstellungen {
    /// Maximale Anzahl gleichzeitiger Raeume
    pub max_raeume: usize,
    /// Maximale Verlaufseintraege pro Raum
    pub max_verlauf: usize,
}

impl Default for RaumEinstellungen {
    fn default() -> Self {
        Self {
            max_raeume: 1000,
            max_verlauf: 500,
        }
    }
}

/// Origin-Pruefung und Token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SicherheitsEinstellungen {
    /// Gemeinsames Geheimnis fuer `?token=` (fehlt = keine Pruefung)
    pub shared_secret: Option<String>,
    /// Erlaubte Origins fuer WebSocket und CORS (exakter Vergleich)
    pub erlaubte_origins: Vec<String>,
}

impl Default for SicherheitsEinstellungen {
    fn default() -> Self {
        Self {
            shared_secret: None,
            erlaubte_origins: STANDARD_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Stellt `/metrics` bereit
    pub metriken_aktiviert: bool,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            metriken_aktiviert: true,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}")),
        }
    }

    /// Laedt die Datei und wendet die Prozess-Umgebung an
    pub fn laden_mit_umgebung(pfad: &str) -> anyhow::Result<Self> {
        let mut config = Self::laden(pfad)?;
        config.umgebung_anwenden(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Ueberschreibt Werte aus Umgebungsvariablen
    ///
    /// `lookup` liefert den Wert einer Variable. Nicht parsebare Zahlen
    /// sind ein Fehler.
    pub fn umgebung_anwenden<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(wert) = lookup("MAX_HISTORY_PER_ROOM") {
            self.raeume.max_verlauf = zahl("MAX_HISTORY_PER_ROOM", &wert)?;
        }
        if let Some(wert) = lookup("MAX_ROOMS") {
            self.raeume.max_raeume = zahl("MAX_ROOMS", &wert)?;
        }
        if let Some(wert) = lookup("BROADCAST_SEND_TIMEOUT") {
            self.netzwerk.sende_timeout_sek = sekunden("BROADCAST_SEND_TIMEOUT", &wert)?;
        }
        if let Some(wert) = lookup("MAX_MESSAGE_BYTES") {
            self.netzwerk.max_nachricht_bytes = zahl("MAX_MESSAGE_BYTES", &wert)?;
        }
        if let Some(wert) = lookup("IDLE_TIMEOUT_SECONDS") {
            self.netzwerk.idle_timeout_sek = if wert.trim().is_empty() {
                None
            } else {
                Some(sekunden("IDLE_TIMEOUT_SECONDS", &wert)?)
            };
        }
        if let Some(wert) = lookup("ECHO_SENDER_EVENTS") {
            self.server.echo_absender = matches!(
                wert.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(wert) = lookup("SHARED_SECRET") {
            self.sicherheit.shared_secret = Some(wert);
        }
        if let Some(wert) = lookup("ALLOWED_ORIGINS") {
            self.sicherheit.erlaubte_origins = origins_parsen(&wert);
        }
        Ok(())
    }

    /// Prueft Werte, die serde nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        let timeout = self.netzwerk.sende_timeout_sek;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(anyhow!("sende_timeout_sek muss positiv sein: {timeout}"));
        }
        dauer("sende_timeout_sek", timeout)?;
        if let Some(idle) = self.netzwerk.idle_timeout_sek {
            if !idle.is_finite() {
                return Err(anyhow!("idle_timeout_sek ungueltig: {idle}"));
            }
            if idle > 0.0 {
                dauer("idle_timeout_sek", idle)?;
            }
        }
        if self.netzwerk.max_nachricht_bytes == 0 {
            return Err(anyhow!("max_nachricht_bytes muss groesser 0 sein"));
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Leitet die Relay-Konfiguration ab
    ///
    /// Schlaegt fehl wenn eine Sekundenangabe nicht als `Duration` darstellbar ist.
    pub fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        let idle_timeout = match self.netzwerk.idle_timeout_sek.filter(|s| *s > 0.0) {
            Some(sek) => Some(dauer("idle_timeout_sek", sek)?),
            None => None,
        };
        Ok(RelayConfig {
            max_verlauf: self.raeume.max_verlauf,
            max_raeume: self.raeume.max_raeume,
            sende_timeout: dauer("sende_timeout_sek", self.netzwerk.sende_timeout_sek)?,
            max_nachricht_bytes: self.netzwerk.max_nachricht_bytes,
            idle_timeout,
            echo_absender: self.server.echo_absender,
            shared_secret: self.sicherheit.shared_secret.clone(),
            erlaubte_origins: self.sicherheit.erlaubte_origins.clone(),
        })
    }
}

fn dauer(name: &str, sek: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(sek).with_context(|| format!("{name}: nicht darstellbar: {sek}"))
}

fn zahl(name: &str, wert: &str) -> anyhow::Result<usize> {
    wert.trim()
        .parse()
        .with_context(|| format!("{name}: keine gueltige Zahl: '{wert}'"))
}

fn sekunden(name: &str, wert: &str) -> anyhow::Result<f64> {
    let sek: f64 = wert
        .trim()
        .parse()
        .with_context(|| format!("{name}: keine gueltige Sekundenangabe: '{wert}'"))?;
    if !sek.is_finite() {
        return Err(anyhow!("{name}: keine gueltige Sekundenangabe: '{wert}'"));
    }
    if sek > 0.0 {
        dauer(name, sek)?;
    }
    Ok(sek)
}

/// Komma-getrennte Liste, getrimmt, leere Eintraege entfallen
fn origins_parsen(wert: &str) -> Vec<String> {
    wert.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}
