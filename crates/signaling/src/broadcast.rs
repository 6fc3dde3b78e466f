//! Event-Broadcaster – Verteilt Nachrichten an alle Mitglieder eines Raums
//!
//! Ablauf eines Broadcasts:
//! 1. Nachricht einmal kodieren
//! 2. Unter der Raum-Mutex einen Schnappschuss der Empfaenger ziehen
//! 3. Ohne Mutex an alle Empfaenger parallel senden, jeder Sendevorgang
//!    mit eigenem Zeitlimit
//! 4. Nur falls Sendungen scheiterten: Raum-Mutex erneut nehmen und die
//!    toten Clients entfernen
//!
//! Ein haengender Peer blockiert den Raum damit hoechstens fuer ein
//! Sende-Timeout und andere Raeume gar nicht.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tafel_core::{Nachricht, RaumId, VerbindungsId};

use crate::error::SignalingError;
use crate::handle::GeteiltesHandle;
use crate::raum_manager::RaumManager;
use crate::statistik::RelayStatistik;

/// Ergebnis eines einzelnen Broadcasts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastErgebnis {
    /// Anzahl der Empfaenger im Schnappschuss
    pub empfaenger: usize,
    /// Erfolgreich gesendete Frames
    pub zugestellt: usize,
    /// Aus dem Raum entfernte tote Clients
    pub entfernt: usize,
}

/// Zentraler Broadcaster fuer alle Raeume
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    raeume: RaumManager,
    sende_timeout: Duration,
    statistik: Arc<RelayStatistik>,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster
    pub fn neu(raeume: RaumManager, sende_timeout: Duration, statistik: Arc<RelayStatistik>) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                raeume,
                sende_timeout,
                statistik,
            }),
        }
    }

    /// Sendet eine Nachricht an alle Mitglieder eines Raums
    ///
    /// Mit `an_absender = false` wird `absender` aus den Empfaengern
    /// entfernt. Existiert der Raum nicht, passiert nichts.
    pub async fn senden(
        &self,
        nachricht: &Nachricht,
        raum_id: &RaumId,
        absender: Option<VerbindungsId>,
        an_absender: bool,
    ) -> BroadcastErgebnis {
        let text = match nachricht.kodieren() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(raum = %raum_id, fehler = %e, "Nachricht nicht kodierbar");
                return BroadcastErgebnis::default();
            }
        };
        let ausser = if an_absender { None } else { absender };
        self.text_verteilen(&text, raum_id, ausser).await
    }

    /// Verteilt einen bereits kodierten Frame
    pub async fn text_verteilen(
        &self,
        text: &str,
        raum_id: &RaumId,
        ausser: Option<VerbindungsId>,
    ) -> BroadcastErgebnis {
        let Some((raum, empfaenger)) = self
            .inner
            .raeume
            .empfaenger_schnappschuss(raum_id, ausser)
            .await
        else {
            return BroadcastErgebnis::default();
        };
        if empfaenger.is_empty() {
            return BroadcastErgebnis::default();
        }

        let timeout = self.inner.sende_timeout;
        let ergebnisse = join_all(
            empfaenger
                .iter()
                .map(|handle| tokio::time::timeout(timeout, handle.text_senden(text))),
        )
        .await;

        let mut tote: Vec<GeteiltesHandle> = Vec::new();
        for (handle, ergebnis) in empfaenger.iter().zip(ergebnisse) {
            if let Err(e) = ergebnis.unwrap_or(Err(SignalingError::Timeout)) {
                tracing::debug!(raum = %raum_id, verbindung = %handle.id(), fehler = %e, "Senden fehlgeschlagen");
                tote.push(Arc::clone(handle));
            }
        }

        let zugestellt = empfaenger.len() - tote.len();
        let entfernt = if tote.is_empty() {
            0
        } else {
            self.inner.raeume.tote_entfernen(&raum, &tote).await
        };
        self.inner.statistik.broadcast_abgeschlossen(zugestellt, entfernt);

        BroadcastErgebnis {
            empfaenger: empfaenger.len(),
            zugestellt,
            entfernt,
        }
    }
}
