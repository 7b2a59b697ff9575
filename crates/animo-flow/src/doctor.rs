use anyhow::{Context, Result};
use std::collections::HashSet;
use time::macros::format_description;
use time::Date;

use crate::graph::kiosk;
use crate::watchdog::WatchdogConfig;
use crate::{FlowConfig, TagConfig};

pub fn check_flow(cfg: &FlowConfig) -> Result<()> {
    anyhow::ensure!(cfg.fade_ms <= 2000, "flow.fade_ms should be <= 2000");
    anyhow::ensure!(cfg.splash_ms > 0 && cfg.phrase_ms > 0 && cfg.show_face_ms > 0, "flow delays must be > 0");
    anyhow::ensure!(cfg.countdown_from >= 1 && cfg.countdown_from <= 10, "flow.countdown_from should be 1..10");
    anyhow::ensure!(cfg.countdown_tick_ms >= 100, "flow.countdown_tick_ms too small");
    anyhow::ensure!(!cfg.phrases.is_empty(), "flow.phrases is empty");
    Date::parse(&cfg.stats_start, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("flow.stats_start {:?} is not YYYY-MM-DD", cfg.stats_start))?;
    kiosk(cfg).context("screen graph")?;
    Ok(())
}

pub fn check_tags(tags: &TagConfig) -> Result<()> {
    anyhow::ensure!(!tags.emotions.is_empty(), "tags.emotions is empty");
    anyhow::ensure!(!tags.motives.is_empty(), "tags.motives is empty");
    for (name, list) in [("emotions", &tags.emotions), ("motives", &tags.motives), ("contacts", &tags.contacts)] {
        let mut seen = HashSet::new();
        for t in list {
            anyhow::ensure!(!t.trim().is_empty(), "tags.{} has a blank entry", name);
            anyhow::ensure!(seen.insert(t.as_str()), "tags.{} lists {} twice", name, t);
        }
    }
    if tags.contacts.is_empty() {
        tracing::warn!("tags.contacts is empty; sharing will never send anything");
    }
    Ok(())
}

pub fn check_watchdog(cfg: &WatchdogConfig) -> Result<()> {
    anyhow::ensure!(cfg.poll_ms >= 10 && cfg.poll_ms <= 1000, "watchdog.poll_ms should be 10..1000");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_flow(&FlowConfig::default()).unwrap();
        check_tags(&TagConfig::default()).unwrap();
        check_watchdog(&WatchdogConfig::default()).unwrap();
    }

    #[test]
    fn catches_bad_values() {
        let no_phrases = FlowConfig { phrases: vec![], ..FlowConfig::default() };
        assert!(check_flow(&no_phrases).is_err());
        let zero_delay = FlowConfig { phrase_ms: 0, ..FlowConfig::default() };
        assert!(check_flow(&zero_delay).is_err());
        let mut dup = TagConfig::default();
        dup.motives.push("FAMILIA".into());
        assert!(check_tags(&dup).is_err());
    }
}
