use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

use animo_flow::{
    doctor as flow_doctor, kiosk, watch_presence, FlowConfig, FlowEvent, FlowHandle, FlowMachine, LogPresenter,
    PresenceWatchdog, TagConfig, WatchdogConfig,
};
use animo_hw::{doctor as hw_doctor, open_effector, open_presence, EffectorConfig, PresenceConfig};
use animo_mood::{level_name, EmotionDistribution, IntensityTable, LatestDetection, NOT_DETECTED};
use animo_store::{doctor as store_doctor, JournalStore, MemoryStore, MoodStore, StoreConfig};
use animo_vision::camera::{CameraConfig, CameraOpener};
use animo_vision::{build_pipeline, doctor as vision_doctor, CaptureConfig, CaptureCoordinator, CaptureHandle, VisionConfig};

#[derive(Debug, Parser)]
#[command(name = "animo", version, about = "animo - mood kiosk")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Run the kiosk; buttons are driven by line commands on stdin.
    Run,
    /// Capture one frame and classify it.
    Scan,
    /// Map a happy/neutral/sad distribution to a mood.
    Classify {
        #[arg(long)]
        happy: f64,
        #[arg(long)]
        neutral: f64,
        #[arg(long)]
        sad: f64,
    },
    /// Print the daily mood levels of the last days.
    Stats {
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[derive(Debug, serde::Deserialize)]
struct Config {
    camera: Option<CameraConfig>,
    vision: Option<VisionConfig>,
    #[serde(default)]
    capture: CaptureConfig,
    #[serde(default)]
    flow: FlowConfig,
    #[serde(default)]
    tags: TagConfig,
    #[serde(default)]
    watchdog: WatchdogConfig,
    #[serde(default)]
    intensity: IntensityTable,
    effector: Option<EffectorConfig>,
    presence: Option<PresenceConfig>,
    store: Option<StoreConfig>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    // Only readable while the process is still single-threaded.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|_| {
        warn!("local UTC offset unknown, timestamps in UTC");
        UtcOffset::UTC
    });

    match cli.cmd {
        Command::Doctor => doctor(&cfg),
        Command::Run => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("tokio runtime")?
            .block_on(run(&cfg, offset)),
        Command::Scan => scan(&cfg),
        Command::Classify { happy, neutral, sad } => classify(happy, neutral, sad),
        Command::Stats { days } => stats(&cfg, days, offset),
        Command::Vision { cmd } => vision_cmd(&cfg, cmd),
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    flow_doctor::check_flow(&cfg.flow)?;
    flow_doctor::check_tags(&cfg.tags)?;
    flow_doctor::check_watchdog(&cfg.watchdog)?;
    cfg.intensity.validate()?;
    vision_doctor::check_capture(&cfg.capture)?;

    match &cfg.camera {
        Some(c) => vision_doctor::check_camera(c).or_else(|e| {
            warn!("camera not ready, results will read {}: {:#}", NOT_DETECTED, e);
            Ok::<(), anyhow::Error>(())
        })?,
        None => warn!("doctor: no [camera] section"),
    }
    if let Some(v) = &cfg.vision {
        vision_doctor::check_vision(v)?;
    }
    if let Some(s) = &cfg.store {
        store_doctor::check_journal(&s.journal_path)?;
    }
    if let Some(p) = &cfg.presence {
        hw_doctor::check_presence(p)?;
    }
    if let Some(e) = &cfg.effector {
        hw_doctor::check_effector(e)?;
    }

    info!("doctor: OK");
    Ok(())
}

fn classify(happy: f64, neutral: f64, sad: f64) -> Result<()> {
    let d = EmotionDistribution::from_scores(happy, neutral, sad)?;
    let mood = d.mood();
    println!(
        "happy={:.3} neutral={:.3} sad={:.3} diff={:+.3}",
        d.happy(),
        d.neutral(),
        d.sad(),
        d.happy() - d.sad()
    );
    println!("mood={} ({})", mood.display(), mood);
    Ok(())
}

fn scan(cfg: &Config) -> Result<()> {
    let camera_cfg = cfg.camera.as_ref().context("no [camera] config section")?;
    let vision = cfg.vision.as_ref().context("no [vision] config section")?;
    let mut pipeline = build_pipeline(vision)?;
    let mut camera = camera_cfg.open()?;
    let res = pipeline.scan_once(camera.as_mut(), cfg.capture.drain_frames);
    camera.release();

    match res? {
        Some(d) => {
            let f = d.face;
            println!("face={}x{}+{}+{}", f.w, f.h, f.x, f.y);
            println!(
                "happy={:.3} neutral={:.3} sad={:.3}",
                d.distribution.happy(),
                d.distribution.neutral(),
                d.distribution.sad()
            );
            println!("mood={} ({})", d.mood.display(), d.mood);
        }
        None => println!("mood={}", NOT_DETECTED),
    }
    Ok(())
}

fn stats(cfg: &Config, days: usize, offset: UtcOffset) -> Result<()> {
    anyhow::ensure!(days >= 1, "--days must be >= 1");
    let s = cfg.store.as_ref().context("no [store] config section")?;
    let journal = JournalStore::open(&s.journal_path)?;
    let today = OffsetDateTime::now_utc().to_offset(offset).date();
    let start = window_start(today, days)?;

    let mut day = start;
    for level in journal.daily_levels(start, days) {
        println!("{} {} {}", day, level, level_name(level));
        match day.next_day() {
            Some(d) => day = d,
            None => break,
        }
    }
    println!("entries={} shares={}", journal.len(), journal.share_count());
    Ok(())
}

/// First day of a `days`-long window ending today.
fn window_start(today: Date, days: usize) -> Result<Date> {
    let back = i32::try_from(days - 1).context("--days out of range")?;
    Duration::DAY
        .checked_mul(back)
        .and_then(|span| today.checked_sub(span))
        .with_context(|| format!("--days {} reaches before the calendar", days))
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            let v = cfg.vision.as_ref().context("no [vision] config section")?;

            #[cfg(feature = "vision-tflite")]
            {
                if v.face.backend == "tflite" {
                    let mut face = animo_vision::face::TfliteFaceDetector::new(v)?;
                    println!("face model:");
                    print!("{}", face.inspect()?);
                }
                let mut model = animo_vision::classifier::TfliteEmotionModel::new(v)?;
                println!("emotion model:");
                print!("{}", model.inspect()?);
                Ok(())
            }

            #[cfg(not(feature = "vision-tflite"))]
            {
                let _ = v;
                anyhow::bail!("vision backend not available; build with --features vision-tflite")
            }
        }
    }
}

async fn run(cfg: &Config, offset: UtcOffset) -> Result<()> {
    info!("run: starting");

    let slot = LatestDetection::new();
    let capture = start_capture(cfg, &slot);

    let store: Box<dyn MoodStore> = match &cfg.store {
        Some(s) => Box::new(JournalStore::open(&s.journal_path)?),
        None => {
            warn!("run: no [store] section, entries are kept in memory only");
            Box::new(MemoryStore::default())
        }
    };

    let graph = kiosk(&cfg.flow)?;
    let machine = FlowMachine::new(graph, cfg.flow.clone(), slot, Box::new(LogPresenter))?
        .with_tags(cfg.tags.clone())
        .with_intensity(cfg.intensity)
        .with_effector(open_effector(cfg.effector.as_ref()))
        .with_store(store)
        .with_offset(offset);

    let (handle, rx) = animo_flow::channel(32);

    if cfg.presence.as_ref().is_some_and(|p| p.enable) {
        let input = open_presence(cfg.presence.as_ref())?;
        tokio::spawn(watch_presence(input, cfg.watchdog.clone(), handle.clone()));
    } else {
        info!("run: no presence sensor; use `absent` / `present` on stdin");
    }

    let stdin = handle.clone();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || stdin_loop(stdin))
        .context("spawn stdin thread")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("run: interrupted");
            let _ = handle.send(FlowEvent::Shutdown).await;
        }
    });

    let machine = animo_flow::run(machine, rx).await;
    if let Some(c) = capture {
        c.stop();
    }
    drop(machine);
    info!("run: stopped");
    Ok(())
}

fn start_capture(cfg: &Config, slot: &LatestDetection) -> Option<CaptureHandle> {
    let (Some(camera), Some(vision)) = (&cfg.camera, &cfg.vision) else {
        warn!("run: no [camera]/[vision] section, every result will read {}", NOT_DETECTED);
        return None;
    };
    let pipeline = match build_pipeline(vision) {
        Ok(p) => p,
        Err(e) => {
            error!("run: vision pipeline unavailable: {:#}", e);
            return None;
        }
    };
    match CaptureCoordinator::spawn(camera, pipeline, slot.clone(), cfg.capture.clone()) {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("run: continuing without detections: {}", e);
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Event(FlowEvent),
    /// Simulated presence sensor reading.
    Sensor(bool),
}

fn parse_command(line: &str) -> Result<Option<Input>> {
    let line = line.trim();
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    let text = |what: &str| -> Result<String> {
        anyhow::ensure!(!arg.is_empty(), "{} needs an argument", what);
        Ok(arg.to_string())
    };
    let number = |what: &str| -> Result<usize> { arg.parse().with_context(|| format!("{} needs a number", what)) };

    let ev = match cmd {
        "" => return Ok(None),
        "present" => return Ok(Some(Input::Sensor(true))),
        "absent" => return Ok(Some(Input::Sensor(false))),
        "press" => FlowEvent::Press(text("press")?),
        "toggle" => FlowEvent::Toggle(text("toggle")?),
        "goto" => FlowEvent::Goto(text("goto")?),
        "left" => FlowEvent::Scroll { forward: false },
        "right" => FlowEvent::Scroll { forward: true },
        // pages are 1-based for the operator, like the chart footer
        "page" => FlowEvent::JumpPage(number("page")?.checked_sub(1).context("pages start at 1")?),
        "day" => FlowEvent::OpenDay(number("day")?),
        "state" => FlowEvent::Report,
        "quit" | "exit" => FlowEvent::Shutdown,
        other => anyhow::bail!("unknown command {:?}", other),
    };
    Ok(Some(Input::Event(ev)))
}

fn stdin_loop(handle: FlowHandle) {
    let mut dog = PresenceWatchdog::new();
    for line in std::io::stdin().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("stdin: {}", e);
                break;
            }
        };
        let event = match parse_command(&line) {
            Ok(Some(Input::Event(ev))) => ev,
            Ok(Some(Input::Sensor(present))) => match dog.observe(present) {
                Some(edge) => FlowEvent::Presence(edge),
                None => continue,
            },
            Ok(None) => continue,
            Err(e) => {
                warn!("stdin: {:#}", e);
                continue;
            }
        };
        let quit = event == FlowEvent::Shutdown;
        if handle.blocking_send(event).is_err() || quit {
            break;
        }
    }
    debug!("stdin: closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_window_bounds() {
        let today = time::macros::date!(2024 - 04 - 10);
        assert_eq!(window_start(today, 1).unwrap(), today);
        assert_eq!(window_start(today, 7).unwrap(), time::macros::date!(2024 - 04 - 04));
        assert!(window_start(today, usize::MAX).is_err());
        assert!(window_start(today, 10_000_000).is_err());
    }

    #[test]
    fn sample_config_parses() {
        let cfg: Config = toml::from_str(include_str!("../../../config/kiosk.toml")).unwrap();
        assert_eq!(cfg.flow.fade_ms, 400);
        assert!(!cfg.tags.contacts.is_empty());
        assert!(cfg.camera.is_some());
        flow_doctor::check_flow(&cfg.flow).unwrap();
        flow_doctor::check_tags(&cfg.tags).unwrap();
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert!(cfg.camera.is_none() && cfg.store.is_none());
        assert_eq!(cfg.intensity, IntensityTable::default());
        assert_eq!(cfg.flow.splash_ms, 3000);
    }

    #[test]
    fn stdin_commands() {
        assert_eq!(parse_command("press scan").unwrap(), Some(Input::Event(FlowEvent::Press("scan".into()))));
        assert_eq!(parse_command("  toggle ESPERANZA ").unwrap(), Some(Input::Event(FlowEvent::Toggle("ESPERANZA".into()))));
        assert_eq!(parse_command("page 2").unwrap(), Some(Input::Event(FlowEvent::JumpPage(1))));
        assert_eq!(parse_command("absent").unwrap(), Some(Input::Sensor(false)));
        assert_eq!(parse_command("").unwrap(), None);
        assert!(parse_command("press").is_err());
        assert!(parse_command("page 0").is_err());
        assert!(parse_command("dance").is_err());
    }
}
