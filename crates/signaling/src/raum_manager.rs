//! Raum-Manager – Lebenszyklus der Raeume und Mitgliedschaft
//!
//! ## Zwei-Ebenen-Locking
//! ```text
//! Tabellen-Mutex   RaumId -> Arc<Raum>     (Raum anlegen / entfernen)
//!     |
//!     v
//! Raum-Mutex       Mitglieder + Verlauf    (pro Raum, parallel zwischen Raeumen)
//! ```
//! Die Tabellen-Mutex wird nie angefordert, waehrend eine Raum-Mutex
//! gehalten wird. Wird ein Raum leer, markiert der Halter der Raum-Mutex
//! ihn als aufgeloest, gibt sie frei und entfernt ihn danach aus der
//! Tabelle, sofern dort noch dieselbe Instanz steht. Ein Beitritt, der
//! einen aufgeloesten Raum vorfindet, raeumt ihn selbst ab und versucht es
//! mit einem frischen Raum erneut.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tafel_core::{Nachricht, RaumId, SchliessCode, VerbindungsId, VerlaufNachricht};
use tokio::sync::Mutex;

use crate::error::{SignalingError, SignalingResult};
use crate::handle::GeteiltesHandle;
use crate::raum::{Raum, RaumInfo, RaumZustand};
use crate::server_state::RelayConfig;

/// Verwaltet alle Raeume des Relays
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RaumManager {
    inner: Arc<RaumManagerInner>,
}

struct RaumManagerInner {
    raeume: Mutex<HashMap<RaumId, Arc<Raum>>>,
    max_raeume: usize,
    max_verlauf: usize,
    /// Begrenzt Verlaufsversand und best-effort Schliessen
    sende_timeout: Duration,
}

impl RaumManager {
    /// Erstellt einen neuen, leeren RaumManager
    pub fn neu(config: &RelayConfig) -> Self {
        Self {
            inner: Arc::new(RaumManagerInner {
                raeume: Mutex::new(HashMap::new()),
                max_raeume: config.max_raeume,
                max_verlauf: config.max_verlauf,
                sende_timeout: config.sende_timeout,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Tabelle
    // -----------------------------------------------------------------------

    /// Legt den Raum an falls er fehlt
    ///
    /// Idempotent fuer bestehende Raeume. Am Limit schlaegt der Aufruf mit
    /// `RaumLimit` fehl, ohne die Tabelle zu veraendern.
    pub async fn raum_sicherstellen(&self, id: &RaumId) -> SignalingResult<()> {
        self.raum_holen_oder_anlegen(id).await.map(|_| ())
    }

    async fn raum_holen_oder_anlegen(&self, id: &RaumId) -> SignalingResult<Arc<Raum>> {
        let mut raeume = self.inner.raeume.lock().await;
        if let Some(raum) = raeume.get(id) {
            return Ok(Arc::clone(raum));
        }
        if raeume.len() >= self.inner.max_raeume {
            tracing::error!(raum = %id, max = self.inner.max_raeume, "Raum-Limit erreicht");
            return Err(SignalingError::RaumLimit {
                max: self.inner.max_raeume,
            });
        }
        let raum = Raum::neu(id.clone(), self.inner.max_verlauf);
        raeume.insert(id.clone(), Arc::clone(&raum));
        tracing::debug!(raum = %id, anzahl = raeume.len(), "Raum angelegt");
        Ok(raum)
    }

    pub(crate) async fn raum_holen(&self, id: &RaumId) -> Option<Arc<Raum>> {
        self.inner.raeume.lock().await.get(id).cloned()
    }

    /// Entfernt einen aufgeloesten Raum, sofern die Tabelle noch genau
    /// diese Instanz enthaelt. Darf nur ohne gehaltene Raum-Mutex laufen.
    async fn aufgeloesten_raum_entfernen(&self, raum: &Arc<Raum>) {
        let mut raeume = self.inner.raeume.lock().await;
        if raeume
            .get(&raum.id)
            .is_some_and(|aktuell| Arc::ptr_eq(aktuell, raum))
        {
            raeume.remove(&raum.id);
            tracing::info!(raum = %raum.id, "Raum entfernt (leer)");
        }
    }

    // -----------------------------------------------------------------------
    // Mitgliedschaft
    // -----------------------------------------------------------------------

    /// Nimmt ein Handle in den Raum auf
    ///
    /// Der Transport-Handshake wird zuerst abgeschlossen. Danach wird das
    /// Handle unter der Raum-Mutex angehaengt und erhaelt den kompletten
    /// Verlauf (leeres Array wenn keiner existiert), bevor der Aufruf
    /// zurueckkehrt. Ein fehlgeschlagener Verlaufsversand wird nur geloggt.
    pub async fn verbinden(&self, handle: GeteiltesHandle, id: &RaumId) -> SignalingResult<()> {
        if let Err(e) = handle.annehmen().await {
            // Ein vorab sichergestellter Raum darf nicht leer stehen bleiben
            self.leeren_raum_aufloesen(id).await;
            return Err(e);
        }

        loop {
            let raum = self.raum_holen_oder_anlegen(id).await?;
            let mut zustand = raum.zustand.lock().await;
            if zustand.aufgeloest {
                drop(zustand);
                self.aufgeloesten_raum_entfernen(&raum).await;
                continue;
            }

            zustand.mitglieder.push(Arc::clone(&handle));
            tracing::info!(
                raum = %id,
                verbindung = %handle.id(),
                clients = zustand.mitglieder.len(),
                "Neue Verbindung"
            );

            let verlauf = VerlaufNachricht::neu(zustand.verlauf.iter());
            let anzahl = verlauf.anzahl();
            match verlauf.kodieren() {
                Ok(text) => {
                    let senden = handle.text_senden(&text);
                    match tokio::time::timeout(self.inner.sende_timeout, senden).await {
                        Ok(Ok(())) => {
                            tracing::debug!(raum = %id, eintraege = anzahl, "Verlauf gesendet")
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(raum = %id, fehler = %e, "Fehler beim Senden des Verlaufs")
                        }
                        Err(_) => {
                            tracing::warn!(raum = %id, "Timeout beim Senden des Verlaufs")
                        }
                    }
                }
                Err(e) => tracing::warn!(raum = %id, fehler = %e, "Verlauf nicht kodierbar"),
            }
            return Ok(());
        }
    }

    /// Entfernt ein Handle aus dem Raum
    ///
    /// Idempotent: ist das Handle kein Mitglied (mehr), passiert nichts.
    /// Ein entferntes Handle wird best-effort geschlossen. Wird der Raum
    /// dadurch leer, verschwindet er samt Verlauf aus der Tabelle.
    pub async fn trennen(&self, handle: &GeteiltesHandle, id: &RaumId) {
        let Some(raum) = self.raum_holen(id).await else {
            return;
        };

        let (entfernt, leer) = {
            let mut zustand = raum.zustand.lock().await;
            if zustand.aufgeloest {
                return;
            }
            let entfernt = zustand.mitglied_entfernen(handle.id());
            if let Some(entfernt) = &entfernt {
                tracing::info!(
                    raum = %id,
                    verbindung = %entfernt.id(),
                    clients = zustand.mitglieder.len(),
                    "Verbindung geschlossen"
                );
            }
            (entfernt, Self::aufloesen_falls_leer(&mut zustand))
        };

        if leer {
            self.aufgeloesten_raum_entfernen(&raum).await;
        }
        if let Some(entfernt) = entfernt {
            self.begrenzt_schliessen(&entfernt).await;
        }
    }

    /// Loest einen Raum ohne Mitglieder auf und entfernt ihn aus der Tabelle
    async fn leeren_raum_aufloesen(&self, id: &RaumId) {
        let Some(raum) = self.raum_holen(id).await else {
            return;
        };
        let leer = {
            let mut zustand = raum.zustand.lock().await;
            Self::aufloesen_falls_leer(&mut zustand)
        };
        if leer {
            self.aufgeloesten_raum_entfernen(&raum).await;
        }
    }

    /// Schliesst ein Handle mit "going away", begrenzt durch das Sende-Timeout
    async fn begrenzt_schliessen(&self, handle: &GeteiltesHandle) {
        if handle.ist_geschlossen() {
            return;
        }
        let schliessen = handle.schliessen(SchliessCode::Wegfall);
        match tokio::time::timeout(self.inner.sende_timeout, schliessen).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(verbindung = %handle.id(), fehler = %e, "Schliessen fehlgeschlagen")
            }
            Err(_) => tracing::debug!(verbindung = %handle.id(), "Timeout beim Schliessen"),
        }
    }

    fn aufloesen_falls_leer(zustand: &mut RaumZustand) -> bool {
        if zustand.mitglieder.is_empty() {
            zustand.aufgeloest = true;
        }
        zustand.aufgeloest
    }

    // -----------------------------------------------------------------------
    // Verlauf
    // -----------------------------------------------------------------------

    /// Haengt ein Inhalts-Event an den Verlauf an
    ///
    /// Gibt false zurueck wenn der Raum nicht (mehr) existiert.
    pub async fn verlauf_anhaengen(&self, id: &RaumId, nachricht: Arc<Nachricht>) -> bool {
        self.mit_raum(id, |zustand| zustand.verlauf.anhaengen(nachricht))
            .await
            .is_some()
    }

    /// Ersetzt den Verlauf durch einen leeren Puffer gleicher Kapazitaet
    pub async fn verlauf_leeren(&self, id: &RaumId) -> bool {
        self.mit_raum(id, |zustand| zustand.verlauf.leeren())
            .await
            .is_some()
    }

    /// Fuehrt `f` unter der Raum-Mutex aus, falls der Raum aktiv ist
    async fn mit_raum<T>(
        &self,
        id: &RaumId,
        f: impl FnOnce(&mut RaumZustand) -> T,
    ) -> Option<T> {
        let raum = self.raum_holen(id).await?;
        let mut zustand = raum.zustand.lock().await;
        if zustand.aufgeloest {
            return None;
        }
        Some(f(&mut zustand))
    }

    // -----------------------------------------------------------------------
    // Broadcast-Unterstuetzung
    // -----------------------------------------------------------------------

    /// Schnappschuss der Empfaenger unter der Raum-Mutex
    ///
    /// Liefert den Raum mit, damit das spaetere Aufraeumen dieselbe Instanz
    /// trifft.
    pub(crate) async fn empfaenger_schnappschuss(
        &self,
        id: &RaumId,
        ausser: Option<VerbindungsId>,
    ) -> Option<(Arc<Raum>, Vec<GeteiltesHandle>)> {
        let raum = self.raum_holen(id).await?;
        let empfaenger = {
            let zustand = raum.zustand.lock().await;
            if zustand.aufgeloest {
                return None;
            }
            zustand.empfaenger(ausser)
        };
        Some((raum, empfaenger))
    }

    /// Entfernt tote Handles aus dem Raum und schliesst sie
    ///
    /// Handles die bereits anderweitig entfernt wurden, werden uebersprungen.
    /// Geschlossen wird erst nach Freigabe der Raum-Mutex, alle parallel.
    /// Gibt die Anzahl tatsaechlich entfernter Handles zurueck.
    pub(crate) async fn tote_entfernen(&self, raum: &Arc<Raum>, tote: &[GeteiltesHandle]) -> usize {
        let (entfernt, leer) = {
            let mut zustand = raum.zustand.lock().await;
            if zustand.aufgeloest {
                return 0;
            }
            let mut entfernt = Vec::new();
            for tot in tote {
                if let Some(handle) = zustand.mitglied_entfernen(tot.id()) {
                    tracing::info!(
                        raum = %raum.id,
                        verbindung = %handle.id(),
                        "Toter Client entfernt"
                    );
                    entfernt.push(handle);
                }
            }
            (entfernt, Self::aufloesen_falls_leer(&mut zustand))
        };

        if leer {
            self.aufgeloesten_raum_entfernen(raum).await;
        }
        join_all(entfernt.iter().map(|handle| self.begrenzt_schliessen(handle))).await;
        entfernt.len()
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Anzahl der Raeume in der Tabelle
    pub async fn raum_anzahl(&self) -> usize {
        self.inner.raeume.lock().await.len()
    }

    /// Prueft ob ein Raum in der Tabelle steht
    pub async fn existiert(&self, id: &RaumId) -> bool {
        self.inner.raeume.lock().await.contains_key(id)
    }

    /// Anzahl der Mitglieder eines Raums (0 wenn er nicht existiert)
    pub async fn mitglieder_anzahl(&self, id: &RaumId) -> usize {
        self.mit_raum(id, |zustand| zustand.mitglieder.len())
            .await
            .unwrap_or(0)
    }

    /// Prueft ob ein Handle Mitglied des Raums ist
    pub async fn ist_mitglied(&self, id: &RaumId, verbindung: VerbindungsId) -> bool {
        self.mit_raum(id, |zustand| zustand.enthaelt(verbindung))
            .await
            .unwrap_or(false)
    }

    /// Summe der Mitglieder ueber alle Raeume
    pub async fn verbindungs_anzahl(&self) -> usize {
        self.raeume_auflisten()
            .await
            .iter()
            .map(|info| info.mitglieder)
            .sum()
    }

    /// Momentaufnahme eines Raums
    pub async fn raum_info(&self, id: &RaumId) -> Option<RaumInfo> {
        let raum = self.raum_holen(id).await?;
        let zustand = raum.zustand.lock().await;
        (!zustand.aufgeloest).then(|| RaumInfo::aus(&raum, &zustand))
    }

    /// Momentaufnahmen aller aktiven Raeume, sortiert nach Raum-ID
    pub async fn raeume_auflisten(&self) -> Vec<RaumInfo> {
        let raeume: Vec<Arc<Raum>> = self.inner.raeume.lock().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(raeume.len());
        for raum in &raeume {
            let zustand = raum.zustand.lock().await;
            if !zustand.aufgeloest {
                infos.push(RaumInfo::aus(raum, &zustand));
            }
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Leert die Tabelle und schliesst alle Verbindungen mit "going away"
    ///
    /// Gibt die Anzahl geschlossener Verbindungen zurueck.
    pub async fn herunterfahren(&self) -> usize {
        let raeume: Vec<Arc<Raum>> = {
            let mut tabelle = self.inner.raeume.lock().await;
            tabelle.drain().map(|(_, raum)| raum).collect()
        };

        let mut handles = Vec::new();
        for raum in &raeume {
            let mut zustand = raum.zustand.lock().await;
            zustand.aufgeloest = true;
            handles.append(&mut zustand.mitglieder);
        }
        join_all(handles.iter().map(|handle| self.begrenzt_schliessen(handle))).await;

        tracing::info!(
            raeume = raeume.len(),
            verbindungen = handles.len(),
            "Alle Verbindungen zum Schliessen aufgefordert"
        );
        handles.len()
    }
}
