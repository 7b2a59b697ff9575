use std::time::Duration;
use tracing::{debug, info};

use crate::graph::{Picker, ScreenId};
use crate::stats::{ChartWindow, DayDetail};

/// Text slots the flow writes into.
pub mod slots {
    pub const PHRASE: &str = "phrase";
    pub const COUNTDOWN: &str = "countdown";
    pub const MOOD: &str = "mood";
}

/// Rendering side of the kiosk. Calls arrive from the flow event loop and
/// must not block.
pub trait Presenter: Send {
    /// Makes `screen` the visible one, without animation.
    fn show(&mut self, screen: ScreenId);
    fn fade_out(&mut self, screen: ScreenId, duration: Duration);
    fn fade_in(&mut self, screen: ScreenId, duration: Duration);
    fn set_text(&mut self, slot: &str, text: &str);
    fn set_toggle(&mut self, picker: Picker, tag: &str, on: bool);
    /// Decorative animation behind the result.
    fn start_animation(&mut self);
    fn stop_animation(&mut self);
    fn set_cover(&mut self, covered: bool);
    fn show_chart(&mut self, chart: &ChartWindow);
    fn show_day(&mut self, day: &DayDetail);
}

/// Headless presenter writing every call to the log.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show(&mut self, screen: ScreenId) {
        info!(screen, "screen");
    }

    fn fade_out(&mut self, screen: ScreenId, duration: Duration) {
        debug!(screen, ms = duration.as_millis() as u64, "fade out");
    }

    fn fade_in(&mut self, screen: ScreenId, duration: Duration) {
        debug!(screen, ms = duration.as_millis() as u64, "fade in");
    }

    fn set_text(&mut self, slot: &str, text: &str) {
        info!(slot, text = %text.replace('\n', " / "), "text");
    }

    fn set_toggle(&mut self, picker: Picker, tag: &str, on: bool) {
        info!(?picker, tag, on, "toggle");
    }

    fn start_animation(&mut self) {
        debug!("animation start");
    }

    fn stop_animation(&mut self) {
        debug!("animation stop");
    }

    fn set_cover(&mut self, covered: bool) {
        info!(covered, "cover");
    }

    fn show_chart(&mut self, chart: &ChartWindow) {
        info!(
            title = %chart.title,
            levels = ?chart.levels,
            days = %chart.day_labels.join(" "),
            page = chart.page + 1,
            pages = chart.pages,
            "chart"
        );
    }

    fn show_day(&mut self, day: &DayDetail) {
        info!(date = %day.heading(), entries = day.entries.len(), "day");
        for line in day.lines() {
            info!("  {} | {} | {}", line.header, line.emotions, line.motives);
        }
    }
}
