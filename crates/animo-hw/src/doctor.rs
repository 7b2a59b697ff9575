use anyhow::Result;

use crate::{EffectorConfig, PresenceConfig};

pub fn check_presence(cfg: &PresenceConfig) -> Result<()> {
    if !cfg.enable {
        return Ok(());
    }
    let path = cfg.value_path();
    anyhow::ensure!(path.exists(), "presence.gpio {} not exported ({} missing)", cfg.gpio, path.display());
    Ok(())
}

pub fn check_effector(cfg: &EffectorConfig) -> Result<()> {
    anyhow::ensure!(cfg.period_ns >= 1_000, "effector.period_ns too small");
    anyhow::ensure!(cfg.period_ns <= 1_000_000_000, "effector.period_ns above 1s");
    Ok(())
}
