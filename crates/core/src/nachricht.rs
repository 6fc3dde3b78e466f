//! Wire-Format – Der Nachrichten-Umschlag
//!
//! Jede Nachricht ist ein JSON-Objekt mit Pflichtfeld `type` (String) und
//! optionalem `payload` beliebiger Struktur. Das Relay interpretiert nur
//! `type`; alle anderen Felder werden unveraendert weitergereicht.
//!
//! ```text
//! Client -> Server:  {"type":"draw","payload":{...}}
//! Server -> Client:  {"type":"history","payload":[{...},{...}]}
//! ```

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::TafelError;

/// Typ des Verlaufs-Umschlags (nur Server -> Client)
pub const TYP_VERLAUF: &str = "history";
pub const TYP_LEEREN: &str = "clear";
pub const TYP_RUECKGAENGIG: &str = "undo";
pub const TYP_WIEDERHOLEN: &str = "redo";

/// Routing-Klasse einer eingehenden Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NachrichtenArt {
    /// `clear` – Verlauf leeren, an alle inklusive Absender
    Leeren,
    /// `undo` – an alle inklusive Absender, nicht im Verlauf
    Rueckgaengig,
    /// `redo` – an alle inklusive Absender, nicht im Verlauf
    Wiederholen,
    /// Alles andere (Zeichen-Events) – wird im Verlauf gespeichert
    Inhalt,
}

/// Eine geparste Client-Nachricht
///
/// Nach dem Parsen unveraenderlich: es gibt keine `&mut`-Zugriffe.
/// `felder` enthaelt das komplette Objekt inklusive `type` in der
/// Reihenfolge des Clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Nachricht {
    typ: String,
    felder: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for Nachricht {
    type Error = TafelError;

    fn try_from(felder: Map<String, Value>) -> Result<Self, Self::Error> {
        match felder.get("type") {
            Some(Value::String(typ)) => Ok(Self {
                typ: typ.clone(),
                felder,
            }),
            _ => Err(TafelError::TypFehlt),
        }
    }
}

impl Serialize for Nachricht {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.felder.serialize(serializer)
    }
}

impl Nachricht {
    /// Parst einen Text-Frame
    ///
    /// Schlaegt fehl bei ungueltigem JSON, Nicht-Objekten und wenn `type`
    /// fehlt oder kein String ist.
    pub fn aus_text(text: &str) -> Result<Self, TafelError> {
        let wert: Value = serde_json::from_str(text)?;
        let Value::Object(felder) = wert else {
            return Err(TafelError::KeinObjekt);
        };
        Self::try_from(felder)
    }

    /// Erstellt eine Nachricht mit Typ und optionalem Payload
    pub fn neu(typ: impl Into<String>, payload: Option<Value>) -> Self {
        let typ = typ.into();
        let mut felder = Map::new();
        felder.insert("type".into(), Value::String(typ.clone()));
        if let Some(payload) = payload {
            felder.insert("payload".into(), payload);
        }
        Self { typ, felder }
    }

    pub fn typ(&self) -> &str {
        &self.typ
    }

    pub fn payload(&self) -> Option<&Value> {
        self.felder.get("payload")
    }

    /// Ungefaehre Payload-Groesse in Bytes (nur fuer Logging)
    pub fn payload_bytes(&self) -> usize {
        self.payload().map(|p| p.to_string().len()).unwrap_or(0)
    }

    pub fn art(&self) -> NachrichtenArt {
        match self.typ.as_str() {
            TYP_LEEREN => NachrichtenArt::Leeren,
            TYP_RUECKGAENGIG => NachrichtenArt::Rueckgaengig,
            TYP_WIEDERHOLEN => NachrichtenArt::Wiederholen,
            _ => NachrichtenArt::Inhalt,
        }
    }

    /// Serialisiert die Nachricht fuer den Versand
    pub fn kodieren(&self) -> Result<String, TafelError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Verlaufs-Umschlag fuer neu beigetretene Clients
///
/// Borgt die Verlaufseintraege, damit der Schnappschuss nicht tief
/// kopiert werden muss.
#[derive(Debug, Serialize)]
pub struct VerlaufNachricht<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    payload: Vec<&'a Nachricht>,
}

impl<'a> VerlaufNachricht<'a> {
    pub fn neu(eintraege: impl IntoIterator<Item = &'a Arc<Nachricht>>) -> Self {
        Self {
            typ: TYP_VERLAUF,
            payload: eintraege.into_iter().map(|n| n.as_ref()).collect(),
        }
    }

    pub fn anzahl(&self) -> usize {
        self.payload.len()
    }

    pub fn kodieren(&self) -> Result<String, TafelError> {
        Ok(serde_json::to_string(self)?)
    }
}
