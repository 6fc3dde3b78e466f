//! Client-Sitzung – Verwaltet eine einzelne Tafel-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientSitzung` in einem eigenen tokio-Task.
//! Die Sitzung ist transportunabhaengig: sie arbeitet nur mit einem
//! `ClientHandle` (Senden) und einem `FrameEmpfaenger` (Empfangen).
//!
//! ## State Machine
//! ```text
//! Handshake -> Aktiv -> Schliessend -> Geschlossen
//!     |                                    ^
//!     +------------ Ablehnung -------------+
//! ```
//!
//! Abgelehnte Handshakes registrieren nichts. Wer einmal `Aktiv` war, wird
//! beim Verlassen der Schleife genau einmal aus dem Raum getrennt.

use std::sync::Arc;
use tafel_core::{Nachricht, NachrichtenArt, RaumId, SchliessCode};
use tokio::sync::watch;

use crate::error::SignalingError;
use crate::handle::{FrameEmpfaenger, GeteiltesHandle};
use crate::server_state::RelayState;
use crate::zugang::{self, HandshakeAnfrage};

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Zustand einer Client-Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitzungsZustand {
    /// Origin, Token und Raumkapazitaet werden geprueft
    Handshake,
    /// Mitglied eines Raums, Frames werden verarbeitet
    Aktiv,
    /// Verbindung wird aus dem Raum entfernt
    Schliessend,
    Geschlossen,
}

/// Warum eine Sitzung beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Handshake abgelehnt, Verbindung mit diesem Code geschlossen
    Abgelehnt(SchliessCode),
    /// Client hat die Verbindung geschlossen
    GegenstelleGeschlossen,
    /// Kein Frame innerhalb des Leerlauf-Timeouts
    Leerlauf,
    /// Frame ueberschritt die Groessengrenze
    ZuGross,
    /// Lesefehler oder Protokollverletzung
    Transportfehler,
    /// Server faehrt herunter
    Shutdown,
}

/// Ergebnis eines einzelnen Empfangsversuchs
enum Empfang {
    Frame(String),
    Geschlossen,
    Leerlauf,
    Fehler(SignalingError),
}

// ---------------------------------------------------------------------------
// ClientSitzung
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne Verbindung von Handshake bis Cleanup
pub struct ClientSitzung<E: FrameEmpfaenger> {
    state: Arc<RelayState>,
    handle: GeteiltesHandle,
    empfaenger: E,
    zustand: SitzungsZustand,
}

impl<E: FrameEmpfaenger> ClientSitzung<E> {
    /// Erstellt eine neue Sitzung im Zustand `Handshake`
    pub fn neu(state: Arc<RelayState>, handle: GeteiltesHandle, empfaenger: E) -> Self {
        Self {
            state,
            handle,
            empfaenger,
            zustand: SitzungsZustand::Handshake,
        }
    }

    pub fn zustand(&self) -> SitzungsZustand {
        self.zustand
    }

    /// Fuehrt die Sitzung aus bis die Verbindung endet
    ///
    /// Laeuft bis der Client trennt, ein Fehler auftritt, das
    /// Leerlauf-Timeout greift oder `shutdown_rx` auf `true` wechselt.
    pub async fn verarbeiten(
        mut self,
        anfrage: HandshakeAnfrage,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> TrennGrund {
        let raum_id = match self.handshake(&anfrage).await {
            Ok(raum_id) => raum_id,
            Err(grund) => {
                self.zustand_setzen(SitzungsZustand::Geschlossen);
                return grund;
            }
        };

        self.zustand_setzen(SitzungsZustand::Aktiv);
        let grund = self.schleife(&raum_id, &mut shutdown_rx).await;

        self.zustand_setzen(SitzungsZustand::Schliessend);
        self.state.raeume.trennen(&self.handle, &raum_id).await;
        self.zustand_setzen(SitzungsZustand::Geschlossen);

        tracing::info!(
            raum = %raum_id,
            verbindung = %self.handle.id(),
            grund = ?grund,
            "Sitzung beendet"
        );
        grund
    }

    fn zustand_setzen(&mut self, neu: SitzungsZustand) {
        tracing::trace!(
            verbindung = %self.handle.id(),
            von = ?self.zustand,
            nach = ?neu,
            "Zustandswechsel"
        );
        self.zustand = neu;
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn handshake(&mut self, anfrage: &HandshakeAnfrage) -> Result<RaumId, TrennGrund> {
        let raum_id = match zugang::pruefen(anfrage, &self.state.config) {
            Ok(raum_id) => raum_id,
            Err(ablehnung) => {
                tracing::warn!(
                    raum = %anfrage.raum,
                    origin = anfrage.origin.as_deref().unwrap_or("-"),
                    grund = %ablehnung,
                    "Verbindung abgelehnt"
                );
                return Err(self.ablehnen(ablehnung.schliesscode()).await);
            }
        };

        if let Err(e) = self.state.raeume.raum_sicherstellen(&raum_id).await {
            tracing::warn!(raum = %raum_id, fehler = %e, "Verbindung abgelehnt");
            return Err(self.ablehnen(SchliessCode::SpaeterVersuchen).await);
        }

        match self
            .state
            .raeume
            .verbinden(Arc::clone(&self.handle), &raum_id)
            .await
        {
            Ok(()) => {}
            Err(SignalingError::RaumLimit { max }) => {
                tracing::warn!(raum = %raum_id, max, "Raumlimit beim Beitritt erreicht");
                return Err(self.ablehnen(SchliessCode::SpaeterVersuchen).await);
            }
            Err(e) => {
                tracing::warn!(raum = %raum_id, fehler = %e, "Beitritt fehlgeschlagen");
                self.state.statistik.handshake_abgelehnt();
                return Err(TrennGrund::Transportfehler);
            }
        }

        self.state.statistik.verbindung_registriert();
        Ok(raum_id)
    }

    async fn ablehnen(&mut self, code: SchliessCode) -> TrennGrund {
        self.state.statistik.handshake_abgelehnt();
        if let Err(e) = self.handle.schliessen(code).await {
            tracing::debug!(verbindung = %self.handle.id(), fehler = %e, "Schliessen fehlgeschlagen");
        }
        TrennGrund::Abgelehnt(code)
    }

    // -----------------------------------------------------------------------
    // Aktiv
    // -----------------------------------------------------------------------

    async fn schleife(
        &mut self,
        raum_id: &RaumId,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> TrennGrund {
        loop {
            let empfang = tokio::select! {
                biased;
                _ = shutdown_abwarten(shutdown_rx) => {
                    tracing::info!(raum = %raum_id, "Shutdown-Signal – Sitzung wird beendet");
                    return TrennGrund::Shutdown;
                }
                empfang = self.empfangen() => empfang,
            };

            let text = match empfang {
                Empfang::Frame(text) => text,
                Empfang::Geschlossen => {
                    tracing::debug!(raum = %raum_id, "Client hat getrennt");
                    return TrennGrund::GegenstelleGeschlossen;
                }
                Empfang::Leerlauf => {
                    tracing::info!(raum = %raum_id, verbindung = %self.handle.id(), "Leerlauf-Timeout");
                    return TrennGrund::Leerlauf;
                }
                Empfang::Fehler(e) => {
                    tracing::warn!(raum = %raum_id, fehler = %e, "Fehler beim Empfangen");
                    return TrennGrund::Transportfehler;
                }
            };

            let max = self.state.config.max_nachricht_bytes;
            if text.len() > max {
                tracing::warn!(raum = %raum_id, bytes = text.len(), max, "Nachricht zu gross");
                if let Err(e) = self.handle.schliessen(SchliessCode::NachrichtZuGross).await {
                    tracing::debug!(fehler = %e, "Schliessen fehlgeschlagen");
                }
                return TrennGrund::ZuGross;
            }

            let nachricht = match Nachricht::aus_text(&text) {
                Ok(nachricht) => nachricht,
                Err(e) => {
                    tracing::debug!(raum = %raum_id, fehler = %e, "Frame verworfen");
                    self.state.statistik.frame_verworfen();
                    continue;
                }
            };

            self.weiterleiten(raum_id, nachricht).await;
        }
    }

    async fn empfangen(&mut self) -> Empfang {
        let leerlauf = self.state.config.idle_timeout.filter(|d| !d.is_zero());
        let ergebnis = match leerlauf {
            Some(dauer) => {
                match tokio::time::timeout(dauer, self.empfaenger.text_empfangen()).await {
                    Ok(ergebnis) => ergebnis,
                    Err(_) => return Empfang::Leerlauf,
                }
            }
            None => self.empfaenger.text_empfangen().await,
        };
        match ergebnis {
            Ok(Some(text)) => Empfang::Frame(text),
            Ok(None) => Empfang::Geschlossen,
            Err(e) => Empfang::Fehler(e),
        }
    }

    /// Leitet ein gueltiges Event nach seinem Typ weiter
    async fn weiterleiten(&mut self, raum_id: &RaumId, nachricht: Nachricht) {
        tracing::info!(
            raum = %raum_id,
            typ = nachricht.typ(),
            payload_bytes = nachricht.payload_bytes(),
            "Nachricht empfangen"
        );

        let absender = Some(self.handle.id());
        let broadcaster = &self.state.broadcaster;
        match nachricht.art() {
            NachrichtenArt::Leeren => {
                self.state.raeume.verlauf_leeren(raum_id).await;
                broadcaster.senden(&nachricht, raum_id, absender, true).await;
                tracing::info!(raum = %raum_id, "Tafel geleert");
            }
            NachrichtenArt::Rueckgaengig | NachrichtenArt::Wiederholen => {
                broadcaster.senden(&nachricht, raum_id, absender, true).await;
            }
            NachrichtenArt::Inhalt => {
                let nachricht = Arc::new(nachricht);
                self.state
                    .raeume
                    .verlauf_anhaengen(raum_id, Arc::clone(&nachricht))
                    .await;
                let echo = self.state.config.echo_absender;
                let ergebnis = broadcaster.senden(&nachricht, raum_id, absender, echo).await;
                tracing::debug!(
                    raum = %raum_id,
                    an_absender = echo,
                    zugestellt = ergebnis.zugestellt,
                    "Broadcast"
                );
            }
        }
    }
}

/// Wartet bis der Shutdown-Kanal `true` meldet
///
/// Ist der Sender weg, kommt kein Shutdown mehr: dann wartet die Funktion
/// fuer immer.
async fn shutdown_abwarten(rx: &mut watch::Receiver<bool>) {
    let signal = rx.wait_for(|aktiv| *aktiv).await.is_ok();
    if !signal {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::RelayConfig;
    use crate::speicher::{speicher_verbindung, SpeicherGegenstelle, SpeicherVerbindung};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const ORIGIN: &str = "http://localhost:5173";

    struct TestClient {
        task: JoinHandle<TrennGrund>,
        handle: Arc<SpeicherVerbindung>,
        gegenstelle: SpeicherGegenstelle,
    }

    fn sitzung_starten(
        state: &Arc<RelayState>,
        anfrage: HandshakeAnfrage,
        shutdown_rx: watch::Receiver<bool>,
    ) -> TestClient {
        let (handle, empfaenger, gegenstelle) = speicher_verbindung();
        let geteilt: GeteiltesHandle = handle.clone();
        let sitzung = ClientSitzung::neu(Arc::clone(state), geteilt, empfaenger);
        let task = tokio::spawn(sitzung.verarbeiten(anfrage, shutdown_rx));
        TestClient {
            task,
            handle,
            gegenstelle,
        }
    }

    fn anfrage(raum: &str) -> HandshakeAnfrage {
        HandshakeAnfrage {
            raum: raum.into(),
            origin: Some(ORIGIN.into()),
            token: None,
        }
    }

    /// Startet eine Sitzung und wartet auf den Verlauf
    async fn beitreten(state: &Arc<RelayState>, raum: &str) -> (TestClient, serde_json::Value) {
        let (_tx, rx) = watch::channel(false);
        let mut client = sitzung_starten(state, anfrage(raum), rx);
        let verlauf = client.gegenstelle.json_empfangen().await.unwrap();
        (client, verlauf)
    }

    fn id(raum: &str) -> RaumId {
        RaumId::neu(raum).unwrap()
    }

    #[tokio::test]
    async fn beitritt_liefert_leeren_verlauf() {
        let state = RelayState::neu(RelayConfig::default());
        let (client, verlauf) = beitreten(&state, "r1").await;
        assert_eq!(verlauf, json!({"type": "history", "payload": []}));
        assert!(client.handle.ist_angenommen());
        assert_eq!(state.raeume.mitglieder_anzahl(&id("r1")).await, 1);
        assert_eq!(state.statistik.schnappschuss().verbindungen, 1);
    }

    #[tokio::test]
    async fn falscher_origin_wird_abgelehnt() {
        let state = RelayState::neu(RelayConfig::default());
        let (_tx, rx) = watch::channel(false);
        let mut client = sitzung_starten(
            &state,
            HandshakeAnfrage {
                raum: "r1".into(),
                origin: Some("http://evil.example".into()),
                token: None,
            },
            rx,
        );
        assert_eq!(
            client.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::RichtlinienVerstoss)
        );
        assert_eq!(
            client.gegenstelle.schliessen_abwarten().await,
            Some(SchliessCode::RichtlinienVerstoss)
        );
        assert!(!client.handle.ist_angenommen());
        assert!(!state.raeume.existiert(&id("r1")).await);
        assert_eq!(state.statistik.schnappschuss().abgelehnt, 1);
        assert_eq!(state.statistik.schnappschuss().verbindungen, 0);
    }

    #[tokio::test]
    async fn fehlender_origin_wird_abgelehnt() {
        let state = RelayState::neu(RelayConfig::default());
        let (_tx, rx) = watch::channel(false);
        let mut a = anfrage("r1");
        a.origin = None;
        let client = sitzung_starten(&state, a, rx);
        assert_eq!(
            client.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::RichtlinienVerstoss)
        );
    }

    #[tokio::test]
    async fn token_wird_geprueft() {
        let state = RelayState::neu(RelayConfig {
            shared_secret: Some("geheim".into()),
            ..RelayConfig::default()
        });

        let (_tx, rx) = watch::channel(false);
        let ohne = sitzung_starten(&state, anfrage("r1"), rx.clone());
        assert_eq!(
            ohne.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::RichtlinienVerstoss)
        );

        let mut falsch = anfrage("r1");
        falsch.token = Some("geheim2".into());
        let falsch = sitzung_starten(&state, falsch, rx.clone());
        assert_eq!(
            falsch.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::RichtlinienVerstoss)
        );

        let mut richtig = anfrage("r1");
        richtig.token = Some("geheim".into());
        let mut client = sitzung_starten(&state, richtig, rx);
        let verlauf = client.gegenstelle.json_empfangen().await.unwrap();
        assert_eq!(verlauf["type"], "history");
    }

    #[tokio::test]
    async fn raumlimit_liefert_spaeter_versuchen() {
        let state = RelayState::neu(RelayConfig {
            max_raeume: 1,
            ..RelayConfig::default()
        });
        let (_a, _) = beitreten(&state, "r1").await;

        let (_tx, rx) = watch::channel(false);
        let mut zweiter = sitzung_starten(&state, anfrage("r2"), rx.clone());
        assert_eq!(
            zweiter.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::SpaeterVersuchen)
        );
        assert_eq!(
            zweiter.gegenstelle.schliessen_abwarten().await,
            Some(SchliessCode::SpaeterVersuchen)
        );
        assert!(!state.raeume.existiert(&id("r2")).await);

        // Bestehender Raum bleibt erreichbar
        let mut dritter = sitzung_starten(&state, anfrage("r1"), rx);
        assert!(dritter.gegenstelle.json_empfangen().await.is_some());
    }

    #[tokio::test]
    async fn leere_raum_id_wird_abgelehnt() {
        let state = RelayState::neu(RelayConfig::default());
        let (_tx, rx) = watch::channel(false);
        let client = sitzung_starten(&state, anfrage(""), rx);
        assert_eq!(
            client.task.await.unwrap(),
            TrennGrund::Abgelehnt(SchliessCode::RichtlinienVerstoss)
        );
        assert_eq!(state.raeume.raum_anzahl().await, 0);
    }

    #[tokio::test]
    async fn ungueltige_frames_werden_verworfen() {
        let state = RelayState::neu(RelayConfig::default());
        let (mut a, _) = beitreten(&state, "r1").await;

        a.gegenstelle.senden("kein json");
        a.gegenstelle.json_senden(&json!([1, 2, 3]));
        a.gegenstelle.json_senden(&json!({"payload": {"x": 1}}));
        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": {"x": 1}}));

        // Verbindung lebt noch: das gueltige Event kommt als Echo zurueck
        let echo = a.gegenstelle.json_empfangen().await.unwrap();
        assert_eq!(echo, json!({"type": "draw", "payload": {"x": 1}}));
        assert!(a.gegenstelle.sofort_empfangen().is_none());
        assert_eq!(state.statistik.schnappschuss().verworfene_frames, 3);
    }

    #[tokio::test]
    async fn inhalt_landet_im_verlauf_steuerung_nicht() {
        let state = RelayState::neu(RelayConfig::default());
        let (mut a, _) = beitreten(&state, "r1").await;

        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": 1}));
        a.gegenstelle.json_senden(&json!({"type": "undo"}));
        a.gegenstelle.json_senden(&json!({"type": "redo"}));
        for _ in 0..3 {
            a.gegenstelle.json_empfangen().await.unwrap();
        }

        let info = state.raeume.raum_info(&id("r1")).await.unwrap();
        assert_eq!(info.verlauf_laenge, 1);
    }

    #[tokio::test]
    async fn leeren_verwirft_verlauf_und_erreicht_alle() {
        let state = RelayState::neu(RelayConfig::default());
        let (mut a, _) = beitreten(&state, "r1").await;
        let (mut b, _) = beitreten(&state, "r1").await;

        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": 1}));
        a.gegenstelle.json_empfangen().await.unwrap();
        b.gegenstelle.json_empfangen().await.unwrap();

        b.gegenstelle.json_senden(&json!({"type": "clear"}));
        assert_eq!(a.gegenstelle.json_empfangen().await.unwrap(), json!({"type": "clear"}));
        assert_eq!(b.gegenstelle.json_empfangen().await.unwrap(), json!({"type": "clear"}));

        let info = state.raeume.raum_info(&id("r1")).await.unwrap();
        assert_eq!(info.verlauf_laenge, 0);

        let (_c, verlauf) = beitreten(&state, "r1").await;
        assert_eq!(verlauf["payload"], json!([]));
    }

    #[tokio::test]
    async fn ohne_echo_nur_andere_empfaenger() {
        let state = RelayState::neu(RelayConfig {
            echo_absender: false,
            ..RelayConfig::default()
        });
        let (mut a, _) = beitreten(&state, "r1").await;
        let (mut b, _) = beitreten(&state, "r1").await;

        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": 1}));
        assert_eq!(b.gegenstelle.json_empfangen().await.unwrap()["type"], "draw");

        // Steuer-Events gehen trotzdem an den Absender
        a.gegenstelle.json_senden(&json!({"type": "undo"}));
        assert_eq!(a.gegenstelle.json_empfangen().await.unwrap()["type"], "undo");
        assert!(a.gegenstelle.sofort_empfangen().is_none());
    }

    #[tokio::test]
    async fn zu_grosser_frame_schliesst_mit_1009() {
        let state = RelayState::neu(RelayConfig {
            max_nachricht_bytes: 64,
            ..RelayConfig::default()
        });
        let (mut a, _) = beitreten(&state, "r1").await;
        let (mut b, _) = beitreten(&state, "r1").await;

        // 40 Zeichen, aber 80 Bytes in UTF-8
        let text = "ä".repeat(40);
        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": text}));

        assert_eq!(a.task.await.unwrap(), TrennGrund::ZuGross);
        assert_eq!(a.handle.schliesscode(), Some(SchliessCode::NachrichtZuGross));
        assert!(b.gegenstelle.sofort_empfangen().is_none());
        assert_eq!(state.raeume.mitglieder_anzahl(&id("r1")).await, 1);
        let info = state.raeume.raum_info(&id("r1")).await.unwrap();
        assert_eq!(info.verlauf_laenge, 0);
    }

    #[tokio::test]
    async fn frame_genau_an_der_grenze_ist_erlaubt() {
        let nachricht = json!({"type": "draw", "payload": "abc"}).to_string();
        let state = RelayState::neu(RelayConfig {
            max_nachricht_bytes: nachricht.len(),
            ..RelayConfig::default()
        });
        let (mut a, _) = beitreten(&state, "r1").await;
        a.gegenstelle.senden(nachricht);
        assert_eq!(a.gegenstelle.json_empfangen().await.unwrap()["payload"], "abc");
    }

    #[tokio::test]
    async fn trennen_entfernt_raum() {
        let state = RelayState::neu(RelayConfig::default());
        let (mut a, _) = beitreten(&state, "r1").await;
        a.gegenstelle.trennen();
        assert_eq!(a.task.await.unwrap(), TrennGrund::GegenstelleGeschlossen);
        assert!(!state.raeume.existiert(&id("r1")).await);
    }

    #[tokio::test]
    async fn binaerframe_beendet_sitzung() {
        let state = RelayState::neu(RelayConfig::default());
        let (a, _) = beitreten(&state, "r1").await;
        a.gegenstelle.binaer_senden(vec![1, 2, 3]);
        assert_eq!(a.task.await.unwrap(), TrennGrund::Transportfehler);
        assert_eq!(a.handle.schliesscode(), Some(SchliessCode::Wegfall));
        assert!(!state.raeume.existiert(&id("r1")).await);
    }

    #[tokio::test]
    async fn leerlauf_timeout_trennt() {
        let state = RelayState::neu(RelayConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..RelayConfig::default()
        });
        let (a, _) = beitreten(&state, "r1").await;
        assert_eq!(a.task.await.unwrap(), TrennGrund::Leerlauf);
        assert_eq!(a.handle.schliesscode(), Some(SchliessCode::Wegfall));
        assert!(!state.raeume.existiert(&id("r1")).await);
    }

    #[tokio::test]
    async fn shutdown_signal_beendet_sitzung() {
        let state = RelayState::neu(RelayConfig::default());
        let (tx, rx) = watch::channel(false);
        let mut a = sitzung_starten(&state, anfrage("r1"), rx);
        a.gegenstelle.json_empfangen().await.unwrap();

        tx.send(true).unwrap();
        assert_eq!(a.task.await.unwrap(), TrennGrund::Shutdown);
        assert_eq!(a.handle.schliesscode(), Some(SchliessCode::Wegfall));
        assert!(!state.raeume.existiert(&id("r1")).await);
    }

    #[tokio::test]
    async fn verworfener_sender_ist_kein_shutdown() {
        let state = RelayState::neu(RelayConfig::default());
        let (tx, rx) = watch::channel(false);
        let mut a = sitzung_starten(&state, anfrage("r1"), rx);
        a.gegenstelle.json_empfangen().await.unwrap();
        drop(tx);

        a.gegenstelle.json_senden(&json!({"type": "draw", "payload": 1}));
        assert_eq!(a.gegenstelle.json_empfangen().await.unwrap()["type"], "draw");
        assert!(!a.task.is_finished());
    }
}
