pub mod doctor;
pub mod graph;
pub mod machine;
pub mod presenter;
pub mod runtime;
pub mod stats;
pub mod watchdog;

use serde::Deserialize;
use thiserror::Error;

pub use graph::{kiosk, EdgeAction, EntryAction, Picker, Policy, Screen, ScreenGraph, ScreenId};
pub use machine::{FlowMachine, Phase};
pub use presenter::{LogPresenter, Presenter};
pub use runtime::{channel, run, watch_presence, FlowEvent, FlowHandle};
pub use watchdog::{Presence, PresenceWatchdog, WatchdogConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("no edge from {from} to {to}")]
    UndeclaredEdge { from: ScreenId, to: String },
    #[error("screen {screen} has no button {label}")]
    UnknownButton { screen: ScreenId, label: String },
    #[error("transition {from} -> {to} still fading")]
    TransitionInFlight { from: ScreenId, to: ScreenId },
    #[error("unknown screen {0}")]
    UnknownScreen(String),
    #[error("{action} not available on screen {screen}")]
    WrongScreen { action: &'static str, screen: ScreenId },
    #[error("tag {tag} is not offered on {picker:?}")]
    UnknownTag { picker: Picker, tag: String },
    #[error("no day at chart position {0}")]
    NoSuchDay(usize),
    #[error("screen covered, input ignored")]
    Covered,
    #[error("invalid screen graph: {0}")]
    InvalidGraph(String),
}

/// Timings and per-visit content of the screen flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub fade_ms: u64,
    pub splash_ms: u64,
    pub phrase_ms: u64,
    pub show_face_ms: u64,
    pub countdown_from: u8,
    pub countdown_first_tick_ms: u64,
    pub countdown_tick_ms: u64,
    /// One is picked at random on every visit to the splash screen.
    pub phrases: Vec<String>,
    /// First day of the statistics chart, YYYY-MM-DD.
    pub stats_start: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            fade_ms: 400,
            splash_ms: 3000,
            phrase_ms: 2000,
            show_face_ms: 4000,
            countdown_from: 3,
            countdown_first_tick_ms: 100,
            countdown_tick_ms: 1000,
            phrases: vec![
                "LO QUE SIENTES\nIMPORTA".into(),
                "ENTENDER TU ESTADO DE ÁNIMO\nES CLAVE PARA REFLEXIONAR".into(),
                "TU BIENESTAR EMOCIONAL\nEMPIEZA AQUÍ".into(),
            ],
            stats_start: "2024-04-01".into(),
        }
    }
}

/// Vocabularies offered by the tag pickers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub emotions: Vec<String>,
    pub motives: Vec<String>,
    pub contacts: Vec<String>,
}

impl Default for TagConfig {
    fn default() -> Self {
        let own = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            emotions: own(&[
                "EUFORÍA", "MONOTONÍA", "NOSTALGIA", "AGRADECIMIENTO", "DECEPCIÓN",
                "APATÍA", "ENTUSIASMO", "SOLEDAD", "EMOCIÓN", "ORGULLO",
                "VACÍO", "MELANCOLÍA", "SATISFACCIÓN", "ESPERANZA", "DESANIMO",
                "TRANQUILIDAD", "DOLOR", "ABURRIMIENTO", "MOTIVACIÓN", "INCOMPRENSIÓN",
            ]),
            motives: own(&[
                "FAMILIA", "AMOR", "TRABAJO", "AMIGOS", "LOGROS", "RECUERDOS",
                "NOTICIAS", "ESTUDIOS", "PÉRDIDA", "FIESTA", "COMIDA",
            ]),
            contacts: Vec::new(),
        }
    }
}

impl TagConfig {
    pub fn vocabulary(&self, picker: Picker) -> &[String] {
        match picker {
            Picker::Emotions => &self.emotions,
            Picker::Motives => &self.motives,
            Picker::Contacts => &self.contacts,
        }
    }
}
