use anyhow::{anyhow, Result};
use animo_hw::PresenceInput;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::machine::FlowMachine;
use crate::watchdog::{Presence, PresenceWatchdog, WatchdogConfig};
use crate::FlowError;

/// Input to the flow loop. Everything the visitor or the sensor does ends up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Press(String),
    Goto(String),
    Toggle(String),
    Scroll { forward: bool },
    JumpPage(usize),
    OpenDay(usize),
    Presence(Presence),
    /// Logs where the flow is.
    Report,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct FlowHandle {
    tx: mpsc::Sender<FlowEvent>,
}

pub fn channel(capacity: usize) -> (FlowHandle, mpsc::Receiver<FlowEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (FlowHandle { tx }, rx)
}

impl FlowHandle {
    pub async fn send(&self, event: FlowEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| anyhow!("flow loop stopped"))
    }

    /// For plain threads (stdin reader); panics inside a runtime.
    pub fn blocking_send(&self, event: FlowEvent) -> Result<()> {
        self.tx.blocking_send(event).map_err(|_| anyhow!("flow loop stopped"))
    }
}

fn apply(machine: &mut FlowMachine, event: FlowEvent, now: std::time::Instant) -> Result<(), FlowError> {
    match event {
        FlowEvent::Press(label) => machine.press(&label, now),
        FlowEvent::Goto(target) => machine.request(&target, now),
        FlowEvent::Toggle(tag) => machine.toggle(&tag).map(|on| debug!(tag = %tag, on, "flow: toggled")),
        FlowEvent::Scroll { forward } => machine.stats_scroll(forward).map(drop),
        FlowEvent::JumpPage(page) => machine.stats_jump(page).map(drop),
        FlowEvent::OpenDay(offset) => machine.open_day(offset, now),
        FlowEvent::Presence(p) => {
            machine.presence(p, now);
            Ok(())
        }
        FlowEvent::Report => {
            info!(
                screen = machine.current_id(),
                phase = ?machine.phase(),
                countdown = ?machine.countdown(),
                covered = machine.is_covered(),
                mood = ?machine.result_mood(),
                "flow: state"
            );
            Ok(())
        }
        FlowEvent::Shutdown => Ok(()),
    }
}

/// Drives `machine` until `Shutdown` or until every handle is gone, then
/// hands it back.
pub async fn run(mut machine: FlowMachine, mut rx: mpsc::Receiver<FlowEvent>) -> FlowMachine {
    machine.start(Instant::now().into_std());
    loop {
        let deadline = machine.next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Some(FlowEvent::Shutdown) | None => break,
                    Some(e) => e,
                };
                let now = Instant::now().into_std();
                machine.advance_to(now);
                if let Err(e) = apply(&mut machine, event, now) {
                    warn!("flow: {}", e);
                }
            }
            _ = timer => machine.advance_to(Instant::now().into_std()),
        }
    }
    info!(screen = machine.current_id(), "flow: loop stopped");
    machine
}

/// Polls the presence sensor and forwards lost/regained edges.
pub async fn watch_presence(mut input: Box<dyn PresenceInput>, cfg: WatchdogConfig, handle: FlowHandle) {
    let mut dog = PresenceWatchdog::new();
    let mut tick = tokio::time::interval(Duration::from_millis(cfg.poll_ms.max(1)));
    let mut failing = false;
    loop {
        tick.tick().await;
        let present = match input.read() {
            Ok(p) => {
                failing = false;
                p
            }
            Err(e) => {
                if !failing {
                    warn!("watchdog: sensor read failed: {:#}", e);
                    failing = true;
                }
                continue;
            }
        };
        if let Some(edge) = dog.observe(present) {
            if handle.send(FlowEvent::Presence(edge)).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::kiosk;
    use crate::presenter::LogPresenter;
    use crate::FlowConfig;
    use animo_mood::LatestDetection;
    use std::collections::VecDeque;

    fn machine() -> FlowMachine {
        let cfg = FlowConfig::default();
        FlowMachine::new(kiosk(&cfg).unwrap(), cfg, LatestDetection::new(), Box::new(LogPresenter))
            .unwrap()
            .with_seed(1)
    }

    #[tokio::test(start_paused = true)]
    async fn timers_and_presses_drive_the_loop() {
        let (handle, rx) = channel(8);
        let task = tokio::spawn(run(machine(), rx));

        // splash 3000 + fade 400 + phrase 2000 + fade 400 + fade-in 400
        tokio::time::sleep(Duration::from_millis(6300)).await;
        handle.send(FlowEvent::Press("stats".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        handle.send(FlowEvent::Shutdown).await.unwrap();

        let m = task.await.unwrap();
        assert_eq!(m.current_id(), "statistics");
        assert!(m.stats().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_input_keeps_running() {
        let (handle, rx) = channel(8);
        let task = tokio::spawn(run(machine(), rx));
        handle.send(FlowEvent::Goto("result".into())).await.unwrap();
        handle.send(FlowEvent::Press("nope".into())).await.unwrap();
        drop(handle);
        let m = task.await.unwrap();
        assert_eq!(m.current_id(), "splash");
    }

    struct Script(VecDeque<bool>);

    impl PresenceInput for Script {
        fn read(&mut self) -> anyhow::Result<bool> {
            match self.0.pop_front() {
                Some(p) => Ok(p),
                None => Err(anyhow!("script exhausted")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_forwards_edges() {
        let (handle, mut rx) = channel(8);
        let input = Script([true, false, false, true, true].into_iter().collect());
        tokio::spawn(watch_presence(Box::new(input), WatchdogConfig::default(), handle));

        assert_eq!(rx.recv().await, Some(FlowEvent::Presence(Presence::Lost)));
        assert_eq!(rx.recv().await, Some(FlowEvent::Presence(Presence::Regained)));
    }
}
