//! Raum-Zustand – Mitglieder und Verlauf eines einzelnen Raums
//!
//! Jeder Raum hat eine eigene Mutex ueber Mitgliederliste und Verlauf.
//! Raeume sind damit voneinander unabhaengig; nur Strukturaenderungen an
//! der Raumtabelle laufen ueber die Tabellen-Mutex im `RaumManager`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tafel_core::{Nachricht, RaumId, VerbindungsId};
use tokio::sync::Mutex;

use crate::handle::GeteiltesHandle;

// ---------------------------------------------------------------------------
// Verlauf
// ---------------------------------------------------------------------------

/// Begrenzter FIFO-Puffer der letzten Inhalts-Events
///
/// Beim Ueberlauf wird der aelteste Eintrag verworfen.
#[derive(Debug)]
pub(crate) struct Verlauf {
    eintraege: VecDeque<Arc<Nachricht>>,
    kapazitaet: usize,
}

impl Verlauf {
    pub(crate) fn neu(kapazitaet: usize) -> Self {
        Self {
            eintraege: VecDeque::with_capacity(kapazitaet.min(64)),
            kapazitaet,
        }
    }

    pub(crate) fn anhaengen(&mut self, nachricht: Arc<Nachricht>) {
        if self.kapazitaet == 0 {
            return;
        }
        while self.eintraege.len() >= self.kapazitaet {
            self.eintraege.pop_front();
        }
        self.eintraege.push_back(nachricht);
    }

    /// Ersetzt den Puffer durch einen leeren mit gleicher Kapazitaet
    pub(crate) fn leeren(&mut self) {
        *self = Self::neu(self.kapazitaet);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Nachricht>> {
        self.eintraege.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.eintraege.len()
    }
}

// ---------------------------------------------------------------------------
// Raum
// ---------------------------------------------------------------------------

/// Ein Raum in der Tabelle des `RaumManager`
pub(crate) struct Raum {
    pub(crate) id: RaumId,
    pub(crate) erstellt_am: DateTime<Utc>,
    pub(crate) zustand: Mutex<RaumZustand>,
}

impl Raum {
    pub(crate) fn neu(id: RaumId, max_verlauf: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            erstellt_am: Utc::now(),
            zustand: Mutex::new(RaumZustand {
                mitglieder: Vec::new(),
                verlauf: Verlauf::neu(max_verlauf),
                aufgeloest: false,
            }),
        })
    }
}

/// Durch die Raum-Mutex geschuetzter Zustand
pub(crate) struct RaumZustand {
    /// Verbundene Handles in Beitrittsreihenfolge
    pub(crate) mitglieder: Vec<GeteiltesHandle>,
    pub(crate) verlauf: Verlauf,
    /// Gesetzt sobald der Raum leer wurde. Ein aufgeloester Raum nimmt
    /// keine Mitglieder mehr auf und wird aus der Tabelle entfernt.
    pub(crate) aufgeloest: bool,
}

impl RaumZustand {
    pub(crate) fn enthaelt(&self, id: VerbindungsId) -> bool {
        self.mitglieder.iter().any(|h| h.id() == id)
    }

    /// Entfernt ein Handle; `None` wenn es nicht (mehr) Mitglied ist
    pub(crate) fn mitglied_entfernen(&mut self, id: VerbindungsId) -> Option<GeteiltesHandle> {
        let pos = self.mitglieder.iter().position(|h| h.id() == id)?;
        Some(self.mitglieder.remove(pos))
    }

    /// Schnappschuss der Empfaenger, optional ohne den Absender
    pub(crate) fn empfaenger(&self, ausser: Option<VerbindungsId>) -> Vec<GeteiltesHandle> {
        self.mitglieder
            .iter()
            .filter(|h| Some(h.id()) != ausser)
            .cloned()
            .collect()
    }
}

/// Oeffentliche Momentaufnahme eines Raums
#[derive(Debug, Clone, Serialize)]
pub struct RaumInfo {
    pub id: RaumId,
    pub mitglieder: usize,
    pub verlauf_laenge: usize,
    pub erstellt_am: DateTime<Utc>,
}

impl RaumInfo {
    pub(crate) fn aus(raum: &Raum, zustand: &RaumZustand) -> Self {
        Self {
            id: raum.id.clone(),
            mitglieder: zustand.mitglieder.len(),
            verlauf_laenge: zustand.verlauf.len(),
            erstellt_am: raum.erstellt_am,
        }
    }
}
