use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    pub enable: bool,
    pub gpio: u32,
    #[serde(default)]
    pub active_low: bool,
    /// Overrides /sys/class/gpio (bench rigs, tests).
    pub sysfs_root: Option<String>,
}

impl PresenceConfig {
    pub fn value_path(&self) -> PathBuf {
        let root = self.sysfs_root.as_deref().unwrap_or(GPIO_ROOT);
        Path::new(root).join(format!("gpio{}", self.gpio)).join("value")
    }
}

/// Polled boolean input telling whether someone stands at the kiosk.
pub trait PresenceInput: Send {
    fn read(&mut self) -> Result<bool>;
}

/// Exported sysfs GPIO line; the pin must already be configured as input.
pub struct SysfsGpioInput {
    path: PathBuf,
    active_low: bool,
}

impl SysfsGpioInput {
    pub fn open(cfg: &PresenceConfig) -> Result<Self> {
        let path = cfg.value_path();
        anyhow::ensure!(path.exists(), "no GPIO value file at {}", path.display());
        info!("presence: gpio{} via {}", cfg.gpio, path.display());
        Ok(Self { path, active_low: cfg.active_low })
    }
}

impl PresenceInput for SysfsGpioInput {
    fn read(&mut self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read gpio {}", self.path.display()))?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => anyhow::bail!("unexpected gpio value {:?}", other),
        };
        Ok(high != self.active_low)
    }
}

/// Used when no sensor is wired; the kiosk never covers itself.
pub struct AlwaysPresent;

impl PresenceInput for AlwaysPresent {
    fn read(&mut self) -> Result<bool> {
        Ok(true)
    }
}

pub fn open_presence(cfg: Option<&PresenceConfig>) -> Result<Box<dyn PresenceInput>> {
    match cfg {
        Some(c) if c.enable => Ok(Box::new(SysfsGpioInput::open(c)?)),
        _ => {
            warn!("presence: no sensor configured, assuming always present");
            Ok(Box::new(AlwaysPresent))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig(value: &str, active_low: bool) -> (tempfile::TempDir, PresenceConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gpio17")).unwrap();
        std::fs::write(dir.path().join("gpio17/value"), value).unwrap();
        let cfg = PresenceConfig {
            enable: true,
            gpio: 17,
            active_low,
            sysfs_root: Some(dir.path().to_string_lossy().into_owned()),
        };
        (dir, cfg)
    }

    #[test]
    fn reads_high_as_present() {
        let (_dir, cfg) = rig("1\n", false);
        let mut input = SysfsGpioInput::open(&cfg).unwrap();
        assert!(input.read().unwrap());
    }

    #[test]
    fn active_low_inverts() {
        let (dir, cfg) = rig("1\n", true);
        let mut input = SysfsGpioInput::open(&cfg).unwrap();
        assert!(!input.read().unwrap());
        std::fs::write(dir.path().join("gpio17/value"), "0\n").unwrap();
        assert!(input.read().unwrap());
    }

    #[test]
    fn garbage_value_is_an_error() {
        let (_dir, cfg) = rig("x", false);
        let mut input = SysfsGpioInput::open(&cfg).unwrap();
        assert!(input.read().is_err());
    }

    #[test]
    fn missing_pin_fails_to_open() {
        let (_dir, mut cfg) = rig("1", false);
        cfg.gpio = 4;
        assert!(SysfsGpioInput::open(&cfg).is_err());
    }

    #[test]
    fn disabled_sensor_is_always_present() {
        let (_dir, mut cfg) = rig("0", false);
        cfg.enable = false;
        let mut input = open_presence(Some(&cfg)).unwrap();
        assert!(input.read().unwrap());
        assert!(open_presence(None).unwrap().read().unwrap());
    }
}
