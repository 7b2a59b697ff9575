use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Lost,
    Regained,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { poll_ms: 100 }
    }
}

/// Turns polled presence readings into lost/regained edges.
#[derive(Debug, Default)]
pub struct PresenceWatchdog {
    covered: bool,
}

impl PresenceWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_covered(&self) -> bool {
        self.covered
    }

    pub fn observe(&mut self, present: bool) -> Option<Presence> {
        match (self.covered, present) {
            (false, false) => {
                self.covered = true;
                Some(Presence::Lost)
            }
            (true, true) => {
                self.covered = false;
                Some(Presence::Regained)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_edges_only() {
        let mut w = PresenceWatchdog::new();
        let seen: Vec<_> = [true, true, false, false, false, true, true, false]
            .into_iter()
            .map(|p| w.observe(p))
            .collect();
        assert_eq!(
            seen,
            vec![
                None,
                None,
                Some(Presence::Lost),
                None,
                None,
                Some(Presence::Regained),
                None,
                Some(Presence::Lost),
            ]
        );
        assert!(w.is_covered());
    }
}
