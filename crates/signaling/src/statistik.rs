//! Relay-Statistik – Zaehler fuer Broadcasts, Zustellungen und Ablehnungen
//!
//! Lock-freie Zaehler; der Server exportiert sie als Prometheus-Metriken.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Laufende Zaehler des Relays
#[derive(Debug, Default)]
pub struct RelayStatistik {
    verbindungen: AtomicU64,
    abgelehnt: AtomicU64,
    verworfene_frames: AtomicU64,
    broadcasts: AtomicU64,
    zustellungen: AtomicU64,
    entfernte_peers: AtomicU64,
}

/// Momentaufnahme aller Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatistikSchnappschuss {
    pub verbindungen: u64,
    pub abgelehnt: u64,
    pub verworfene_frames: u64,
    pub broadcasts: u64,
    pub zustellungen: u64,
    pub entfernte_peers: u64,
}

impl RelayStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn verbindung_registriert(&self) {
        self.verbindungen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_abgelehnt(&self) {
        self.abgelehnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_verworfen(&self) {
        self.verworfene_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_abgeschlossen(&self, zugestellt: usize, entfernt: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.zustellungen.fetch_add(zugestellt as u64, Ordering::Relaxed);
        self.entfernte_peers.fetch_add(entfernt as u64, Ordering::Relaxed);
    }

    pub fn schnappschuss(&self) -> StatistikSchnappschuss {
        StatistikSchnappschuss {
            verbindungen: self.verbindungen.load(Ordering::Relaxed),
            abgelehnt: self.abgelehnt.load(Ordering::Relaxed),
            verworfene_frames: self.verworfene_frames.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            zustellungen: self.zustellungen.load(Ordering::Relaxed),
            entfernte_peers: self.entfernte_peers.load(Ordering::Relaxed),
        }
    }
}
