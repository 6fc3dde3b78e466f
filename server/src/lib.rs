//! tafel-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;
pub mod routen;
pub mod ws;

use anyhow::Result;
use axum::Router;
use config::ServerConfig;
use std::future::Future;
use std::sync::Arc;
use tafel_observability::TafelMetrics;
use tafel_signaling::RelayState;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    relay: Arc<RelayState>,
    metriken: Option<TafelMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        config.validieren()?;
        let relay = RelayState::neu(config.relay_config()?);
        let metriken = if config.observability.metriken_aktiviert {
            Some(TafelMetrics::neu()?)
        } else {
            None
        };
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            relay,
            metriken,
            shutdown_tx,
        })
    }

    pub fn relay(&self) -> &Arc<RelayState> {
        &self.relay
    }

    /// Baut den vollstaendigen Axum-Router
    pub fn router(&self) -> Router {
        routen::router(
            Arc::clone(&self.relay),
            self.metriken.clone(),
            self.shutdown_tx.subscribe(),
        )
    }

    /// Startet den Server und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let adresse = self.config.bind_adresse();
        let listener = TcpListener::bind(&adresse).await?;
        self.starten_mit(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler konnte nicht registriert werden");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Bedient `listener` bis `signal` fertig ist
    ///
    /// Reihenfolge beim Shutdown:
    /// 1. Shutdown-Signal an alle Sitzungen
    /// 2. Alle Raeume leeren, Verbindungen mit 1001 schliessen
    /// 3. Axum beendet offene HTTP-Anfragen
    pub async fn starten_mit<S>(self, listener: TcpListener, signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %listener.local_addr()?,
            max_raeume = self.config.raeume.max_raeume,
            metriken = self.metriken.is_some(),
            "Server laeuft"
        );

        let relay = Arc::clone(&self.relay);
        let shutdown_tx = self.shutdown_tx.clone();
        let herunterfahren = async move {
            signal.await;
            tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            shutdown_tx.send_replace(true);
            let geschlossen = relay.raeume.herunterfahren().await;
            tracing::info!(verbindungen = geschlossen, "Alle Raeume geleert");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(herunterfahren)
            .await?;

        tracing::info!("Server beendet");
        Ok(())
    }
}
