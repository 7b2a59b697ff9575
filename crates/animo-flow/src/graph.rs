use std::collections::HashSet;
use std::time::Duration;

use crate::{FlowConfig, FlowError};

pub type ScreenId = &'static str;

/// Multi-select tag pickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Picker {
    Emotions,
    Motives,
    Contacts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Leaves only through a button edge.
    Manual,
    /// One-shot timer armed on every entry.
    Auto { after: Duration, target: ScreenId },
    /// Leaves when the entry action raises its completion event.
    Event { target: ScreenId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    None,
    PickPhrase,
    StartCountdown,
    ShowResult,
    ClearSelection(Picker),
    LoadStats,
    LoadDayDetail,
}

/// Side effect run when a button edge is taken, before the fade starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    None,
    SaveEntry,
    ShareWithContacts,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub label: &'static str,
    pub target: ScreenId,
    pub action: EdgeAction,
}

#[derive(Debug, Clone)]
pub struct Screen {
    pub id: ScreenId,
    pub policy: Policy,
    pub on_enter: EntryAction,
    pub edges: Vec<Edge>,
}

impl Screen {
    pub fn manual(id: ScreenId) -> Self {
        Self { id, policy: Policy::Manual, on_enter: EntryAction::None, edges: Vec::new() }
    }

    pub fn auto(id: ScreenId, after: Duration, target: ScreenId) -> Self {
        Self { id, policy: Policy::Auto { after, target }, on_enter: EntryAction::None, edges: Vec::new() }
    }

    pub fn event(id: ScreenId, target: ScreenId) -> Self {
        Self { id, policy: Policy::Event { target }, on_enter: EntryAction::None, edges: Vec::new() }
    }

    pub fn on_enter(mut self, action: EntryAction) -> Self {
        self.on_enter = action;
        self
    }

    pub fn edge(self, label: &'static str, target: ScreenId) -> Self {
        self.edge_with(label, target, EdgeAction::None)
    }

    pub fn edge_with(mut self, label: &'static str, target: ScreenId, action: EdgeAction) -> Self {
        self.edges.push(Edge { label, target, action });
        self
    }

    pub fn button(&self, label: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.label == label)
    }

    /// Targets reachable from here: button edges plus the auto/event target.
    pub fn leads_to(&self, target: &str) -> bool {
        let implicit = match self.policy {
            Policy::Auto { target: t, .. } | Policy::Event { target: t } => t == target,
            Policy::Manual => false,
        };
        implicit || self.edges.iter().any(|e| e.target == target)
    }

    pub fn picker(&self) -> Option<Picker> {
        match self.on_enter {
            EntryAction::ClearSelection(p) => Some(p),
            _ => None,
        }
    }
}

/// Validated screen graph. Screen 0 is the initial screen.
#[derive(Debug, Clone)]
pub struct ScreenGraph {
    screens: Vec<Screen>,
}

impl ScreenGraph {
    pub fn new(screens: Vec<Screen>) -> Result<Self, FlowError> {
        let g = Self { screens };
        g.validate()?;
        Ok(g)
    }

    fn validate(&self) -> Result<(), FlowError> {
        let bad = |msg: String| Err(FlowError::InvalidGraph(msg));
        if self.screens.is_empty() {
            return bad("no screens".into());
        }

        let mut ids = HashSet::new();
        for s in &self.screens {
            if !ids.insert(s.id) {
                return bad(format!("duplicate screen {}", s.id));
            }
        }

        for s in &self.screens {
            let mut labels = HashSet::new();
            for e in &s.edges {
                if !labels.insert(e.label) {
                    return bad(format!("{}: duplicate button {}", s.id, e.label));
                }
                if !ids.contains(e.target) {
                    return bad(format!("{}: button {} leads to unknown screen {}", s.id, e.label, e.target));
                }
            }
            match s.policy {
                Policy::Auto { after, target } => {
                    if after.is_zero() {
                        return bad(format!("{}: auto delay is zero", s.id));
                    }
                    if !ids.contains(target) {
                        return bad(format!("{}: auto target {} unknown", s.id, target));
                    }
                }
                Policy::Event { target } => {
                    if !ids.contains(target) {
                        return bad(format!("{}: event target {} unknown", s.id, target));
                    }
                    if s.on_enter != EntryAction::StartCountdown {
                        return bad(format!("{}: event screen has no event source", s.id));
                    }
                }
                Policy::Manual => {
                    if s.on_enter == EntryAction::StartCountdown {
                        return bad(format!("{}: countdown needs an event policy", s.id));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn initial(&self) -> usize {
        0
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    pub fn screen(&self, idx: usize) -> &Screen {
        &self.screens[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.screens.iter().position(|s| s.id == id)
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }
}

/// The kiosk's screens, with delays taken from `cfg`.
pub fn kiosk(cfg: &FlowConfig) -> Result<ScreenGraph, FlowError> {
    let ms = Duration::from_millis;
    ScreenGraph::new(vec![
        Screen::auto("splash", ms(cfg.splash_ms), "phrase").on_enter(EntryAction::PickPhrase),
        Screen::auto("phrase", ms(cfg.phrase_ms), "menu"),
        Screen::manual("menu").edge("scan", "show_face").edge("stats", "statistics"),
        Screen::auto("show_face", ms(cfg.show_face_ms), "countdown"),
        Screen::event("countdown", "result").on_enter(EntryAction::StartCountdown),
        Screen::manual("result")
            .on_enter(EntryAction::ShowResult)
            .edge("save", "emotions")
            .edge("retry", "countdown"),
        Screen::manual("emotions")
            .on_enter(EntryAction::ClearSelection(Picker::Emotions))
            .edge("next", "motives"),
        Screen::manual("motives")
            .on_enter(EntryAction::ClearSelection(Picker::Motives))
            .edge_with("save", "share", EdgeAction::SaveEntry),
        Screen::manual("share").edge("yes", "contacts").edge("no", "splash"),
        Screen::manual("contacts")
            .on_enter(EntryAction::ClearSelection(Picker::Contacts))
            .edge_with("send", "splash", EdgeAction::ShareWithContacts)
            .edge("back", "share"),
        Screen::manual("statistics")
            .on_enter(EntryAction::LoadStats)
            .edge("close", "menu")
            .edge("day", "day_detail"),
        Screen::manual("day_detail").on_enter(EntryAction::LoadDayDetail).edge("close", "statistics"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kiosk_graph_is_valid() {
        let g = kiosk(&FlowConfig::default()).unwrap();
        assert_eq!(g.screen(g.initial()).id, "splash");
        assert_eq!(g.len(), 12);
        let result = g.screen(g.index_of("result").unwrap());
        assert!(result.leads_to("countdown"));
        assert!(!result.leads_to("menu"));
        let countdown = g.screen(g.index_of("countdown").unwrap());
        assert!(countdown.leads_to("result"));
    }

    #[test]
    fn dangling_edge_rejected() {
        let err = ScreenGraph::new(vec![Screen::manual("a").edge("go", "nowhere")]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(m) if m.contains("nowhere")));
    }

    #[test]
    fn duplicate_ids_and_buttons_rejected() {
        assert!(ScreenGraph::new(vec![Screen::manual("a"), Screen::manual("a")]).is_err());
        let twice = Screen::manual("a").edge("go", "b").edge("go", "a");
        assert!(ScreenGraph::new(vec![twice, Screen::manual("b")]).is_err());
    }

    #[test]
    fn policies_checked() {
        let zero = Screen::auto("a", Duration::ZERO, "a");
        assert!(ScreenGraph::new(vec![zero]).is_err());
        let silent_event = Screen::event("a", "a");
        assert!(ScreenGraph::new(vec![silent_event]).is_err());
        let manual_countdown = Screen::manual("a").on_enter(EntryAction::StartCountdown);
        assert!(ScreenGraph::new(vec![manual_countdown]).is_err());
        assert!(ScreenGraph::new(vec![]).is_err());
    }
}
