use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PWM_ROOT: &str = "/sys/class/pwm";

#[derive(Debug, Clone, Deserialize)]
pub struct EffectorConfig {
    pub enable: bool,
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    /// PWM period; 1 ms (1 kHz) suits LED strips.
    #[serde(default = "default_period_ns")]
    pub period_ns: u64,
    pub sysfs_root: Option<String>,
}

fn default_period_ns() -> u64 {
    1_000_000
}

/// Output whose intensity follows the detected mood (LED strip, lamp).
pub trait Effector: Send {
    /// `level` is a percentage; values above 100 are clamped.
    fn set_level(&mut self, level: u8) -> Result<()>;
}

/// Stand-in on kiosks without an effector.
#[derive(Debug, Default)]
pub struct NoopEffector;

impl Effector for NoopEffector {
    fn set_level(&mut self, level: u8) -> Result<()> {
        debug!(level, "effector: noop");
        Ok(())
    }
}

pub struct SysfsPwmEffector {
    dir: PathBuf,
    period_ns: u64,
}

impl SysfsPwmEffector {
    pub fn open(cfg: &EffectorConfig) -> Result<Self> {
        let root = cfg.sysfs_root.as_deref().unwrap_or(PWM_ROOT);
        let chip = Path::new(root).join(format!("pwmchip{}", cfg.pwm_chip));
        anyhow::ensure!(chip.exists(), "no PWM chip at {}", chip.display());
        anyhow::ensure!(cfg.period_ns > 0, "effector.period_ns must be > 0");

        let dir = chip.join(format!("pwm{}", cfg.pwm_channel));
        if !dir.exists() {
            write_attr(&chip.join("export"), &cfg.pwm_channel.to_string())?;
        }
        anyhow::ensure!(dir.exists(), "PWM channel {} did not appear after export", cfg.pwm_channel);

        // duty_cycle must never exceed period, so zero it before resizing.
        write_attr(&dir.join("duty_cycle"), "0")?;
        write_attr(&dir.join("period"), &cfg.period_ns.to_string())?;
        write_attr(&dir.join("enable"), "1")?;

        info!("effector: pwm {} period={}ns", dir.display(), cfg.period_ns);
        Ok(Self { dir, period_ns: cfg.period_ns })
    }

    fn duty_for(&self, level: u8) -> u64 {
        self.period_ns * u64::from(level.min(100)) / 100
    }
}

impl Effector for SysfsPwmEffector {
    fn set_level(&mut self, level: u8) -> Result<()> {
        let duty = self.duty_for(level);
        debug!(level, duty, "effector: pwm");
        write_attr(&self.dir.join("duty_cycle"), &duty.to_string())
    }
}

impl Drop for SysfsPwmEffector {
    fn drop(&mut self) {
        let _ = write_attr(&self.dir.join("duty_cycle"), "0");
        let _ = write_attr(&self.dir.join("enable"), "0");
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).with_context(|| format!("write {}", path.display()))
}

/// A missing or broken effector degrades to [`NoopEffector`].
pub fn open_effector(cfg: Option<&EffectorConfig>) -> Box<dyn Effector> {
    match cfg {
        Some(c) if c.enable => match SysfsPwmEffector::open(c) {
            Ok(e) => Box::new(e),
            Err(e) => {
                warn!("effector unavailable, continuing without it: {:#}", e);
                Box::new(NoopEffector)
            }
        },
        _ => Box::new(NoopEffector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> (tempfile::TempDir, EffectorConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pwmchip0/pwm1")).unwrap();
        let cfg = EffectorConfig {
            enable: true,
            pwm_chip: 0,
            pwm_channel: 1,
            period_ns: 1_000_000,
            sysfs_root: Some(dir.path().to_string_lossy().into_owned()),
        };
        (dir, cfg)
    }

    fn read(dir: &tempfile::TempDir, attr: &str) -> String {
        std::fs::read_to_string(dir.path().join("pwmchip0/pwm1").join(attr)).unwrap()
    }

    #[test]
    fn open_enables_channel() {
        let (dir, cfg) = rig();
        let _e = SysfsPwmEffector::open(&cfg).unwrap();
        assert_eq!(read(&dir, "period"), "1000000");
        assert_eq!(read(&dir, "enable"), "1");
        assert_eq!(read(&dir, "duty_cycle"), "0");
    }

    #[test]
    fn level_scales_duty_and_clamps() {
        let (dir, cfg) = rig();
        let mut e = SysfsPwmEffector::open(&cfg).unwrap();
        e.set_level(75).unwrap();
        assert_eq!(read(&dir, "duty_cycle"), "750000");
        e.set_level(250).unwrap();
        assert_eq!(read(&dir, "duty_cycle"), "1000000");
    }

    #[test]
    fn drop_switches_off() {
        let (dir, cfg) = rig();
        let mut e = SysfsPwmEffector::open(&cfg).unwrap();
        e.set_level(100).unwrap();
        drop(e);
        assert_eq!(read(&dir, "duty_cycle"), "0");
        assert_eq!(read(&dir, "enable"), "0");
    }

    #[test]
    fn missing_chip_degrades_to_noop() {
        let (_dir, mut cfg) = rig();
        cfg.pwm_chip = 3;
        assert!(SysfsPwmEffector::open(&cfg).is_err());
        let mut e = open_effector(Some(&cfg));
        assert!(e.set_level(50).is_ok());
    }

    #[test]
    fn period_defaults_when_omitted() {
        let cfg: EffectorConfig = toml::from_str("enable = true\npwm_chip = 0\npwm_channel = 0").unwrap();
        assert_eq!(cfg.period_ns, 1_000_000);
    }
}
