use anyhow::{Context, Result};
use animo_hw::{Effector, NoopEffector};
use animo_mood::{DetectionResult, IntensityTable, LatestDetection, MoodLabel, NOT_DETECTED};
use animo_store::{MemoryStore, MoodEntry, MoodStore, ShareRecord};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

use crate::graph::{EdgeAction, EntryAction, Picker, Policy, ScreenGraph, ScreenId};
use crate::presenter::{slots, Presenter};
use crate::stats::{DayDetail, StatsView};
use crate::watchdog::Presence;
use crate::{FlowConfig, FlowError, TagConfig};

/// Where the current transition is. Input that would start another
/// transition is refused unless `Settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Settled,
    FadingOut { to: ScreenId },
    FadingIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Auto,
    CountdownTick,
}

/// Timer owned by the current screen; dropped the moment the screen is left.
#[derive(Debug, Clone, Copy)]
struct ScreenTimer {
    at: Instant,
    kind: TimerKind,
}

/// Screen flow of the kiosk. Single-threaded and clock-free: every call
/// takes the current `Instant`, and timers fire from [`FlowMachine::advance_to`].
pub struct FlowMachine {
    graph: ScreenGraph,
    cfg: FlowConfig,
    tags: TagConfig,
    intensity: IntensityTable,
    slot: LatestDetection,
    presenter: Box<dyn Presenter>,
    effector: Box<dyn Effector>,
    store: Box<dyn MoodStore>,
    rng: StdRng,
    offset: UtcOffset,
    stats_start: Date,

    current: usize,
    phase: Phase,
    fade_target: usize,
    fade_until: Option<Instant>,
    screen_timer: Option<ScreenTimer>,
    countdown: Option<u8>,
    // Detection captured when the countdown hit zero, consumed by the result screen.
    pending_detection: Option<Option<DetectionResult>>,
    result_mood: Option<MoodLabel>,
    animating: bool,
    covered: bool,
    selections: BTreeMap<Picker, BTreeSet<String>>,
    phrase: Option<String>,
    stats: Option<StatsView>,
    selected_day: Option<Date>,
}

impl FlowMachine {
    pub fn new(graph: ScreenGraph, cfg: FlowConfig, slot: LatestDetection, presenter: Box<dyn Presenter>) -> Result<Self> {
        let stats_start = Date::parse(&cfg.stats_start, format_description!("[year]-[month]-[day]"))
            .with_context(|| format!("flow.stats_start {:?} is not YYYY-MM-DD", cfg.stats_start))?;
        let initial = graph.initial();
        Ok(Self {
            graph,
            cfg,
            tags: TagConfig::default(),
            intensity: IntensityTable::default(),
            slot,
            presenter,
            effector: Box::new(NoopEffector),
            store: Box::new(MemoryStore::default()),
            rng: StdRng::from_entropy(),
            offset: UtcOffset::UTC,
            stats_start,
            current: initial,
            phase: Phase::Settled,
            fade_target: initial,
            fade_until: None,
            screen_timer: None,
            countdown: None,
            pending_detection: None,
            result_mood: None,
            animating: false,
            covered: false,
            selections: BTreeMap::new(),
            phrase: None,
            stats: None,
            selected_day: None,
        })
    }

    pub fn with_tags(mut self, tags: TagConfig) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_intensity(mut self, intensity: IntensityTable) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_effector(mut self, effector: Box<dyn Effector>) -> Self {
        self.effector = effector;
        self
    }

    pub fn with_store(mut self, store: Box<dyn MoodStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Offset used for journal timestamps and the statistics calendar.
    pub fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Shows the initial screen and runs its entry.
    pub fn start(&mut self, now: Instant) {
        self.current = self.graph.initial();
        let id = self.current_id();
        info!(screen = id, "flow: start");
        self.presenter.show(id);
        self.enter(now);
    }

    pub fn graph(&self) -> &ScreenGraph {
        &self.graph
    }

    pub fn current_id(&self) -> ScreenId {
        self.graph.screen(self.current).id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_covered(&self) -> bool {
        self.covered
    }

    pub fn countdown(&self) -> Option<u8> {
        self.countdown
    }

    /// Mood shown by the last result screen, if any was detected.
    pub fn result_mood(&self) -> Option<MoodLabel> {
        self.result_mood
    }

    pub fn phrase(&self) -> Option<&str> {
        self.phrase.as_deref()
    }

    pub fn selection(&self, picker: Picker) -> Vec<String> {
        self.selections.get(&picker).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn stats(&self) -> Option<&StatsView> {
        self.stats.as_ref()
    }

    /// Earliest pending timer, fade or screen. Screen timers are held while covered.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.fade_until, self.live_screen_timer().map(|t| t.at)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires every timer due at or before `now`, in deadline order.
    pub fn advance_to(&mut self, now: Instant) {
        loop {
            let fade = self.fade_until.filter(|t| *t <= now);
            let screen = self.live_screen_timer().filter(|t| t.at <= now);
            match (fade, screen) {
                (Some(f), Some(s)) if s.at < f => self.fire_screen(s),
                (Some(f), _) => self.fire_fade(f),
                (None, Some(s)) => self.fire_screen(s),
                (None, None) => break,
            }
        }
    }

    /// Starts a transition to `target` along a declared edge.
    pub fn request(&mut self, target: &str, now: Instant) -> Result<(), FlowError> {
        self.ensure_uncovered()?;
        let to = self.graph.index_of(target).ok_or_else(|| FlowError::UnknownScreen(target.to_string()))?;
        let here = self.graph.screen(self.current);
        if !here.leads_to(target) {
            error!(from = here.id, to = target, "flow: undeclared transition");
            return Err(FlowError::UndeclaredEdge { from: here.id, to: target.to_string() });
        }
        self.ensure_settled(to)?;
        self.begin(to, now);
        Ok(())
    }

    /// Presses a button of the current screen.
    pub fn press(&mut self, label: &str, now: Instant) -> Result<(), FlowError> {
        self.ensure_uncovered()?;
        let here = self.graph.screen(self.current);
        let edge = here.button(label).cloned().ok_or_else(|| FlowError::UnknownButton {
            screen: here.id,
            label: label.to_string(),
        })?;
        let to = self.graph.index_of(edge.target).ok_or_else(|| FlowError::UnknownScreen(edge.target.to_string()))?;
        self.ensure_settled(to)?;

        match edge.action {
            EdgeAction::None => {}
            EdgeAction::SaveEntry => self.save_entry(),
            EdgeAction::ShareWithContacts => self.share(),
        }
        self.begin(to, now);
        Ok(())
    }

    /// Flips a tag on the current picker screen; returns whether it is now selected.
    pub fn toggle(&mut self, tag: &str) -> Result<bool, FlowError> {
        self.ensure_uncovered()?;
        let here = self.graph.screen(self.current);
        let picker = here.picker().ok_or(FlowError::WrongScreen { action: "toggle", screen: here.id })?;
        if !self.tags.vocabulary(picker).iter().any(|t| t == tag) {
            return Err(FlowError::UnknownTag { picker, tag: tag.to_string() });
        }
        let set = self.selections.entry(picker).or_default();
        let on = if set.remove(tag) {
            false
        } else {
            set.insert(tag.to_string());
            true
        };
        self.presenter.set_toggle(picker, tag, on);
        Ok(on)
    }

    /// Moves the statistics chart one page; false at either end.
    pub fn stats_scroll(&mut self, forward: bool) -> Result<bool, FlowError> {
        self.ensure_uncovered()?;
        let view = self.stats_view_mut("scroll")?;
        let moved = if forward { view.scroll_right() } else { view.scroll_left() };
        let chart = view.chart();
        if moved {
            self.presenter.show_chart(&chart);
        }
        Ok(moved)
    }

    pub fn stats_jump(&mut self, page: usize) -> Result<bool, FlowError> {
        self.ensure_uncovered()?;
        let view = self.stats_view_mut("jump")?;
        let moved = view.jump(page);
        let chart = view.chart();
        if moved {
            self.presenter.show_chart(&chart);
        }
        Ok(moved)
    }

    /// Opens the detail screen for point `offset` of the visible page.
    pub fn open_day(&mut self, offset: usize, now: Instant) -> Result<(), FlowError> {
        self.ensure_uncovered()?;
        let view = self.stats_view_mut("day")?;
        let date = view
            .day_at(offset)
            .and_then(|idx| view.date_of(idx))
            .ok_or(FlowError::NoSuchDay(offset))?;
        self.selected_day = Some(date);
        self.press("day", now)
    }

    pub fn presence(&mut self, presence: Presence, now: Instant) {
        match presence {
            Presence::Lost => {
                if self.covered {
                    return;
                }
                self.covered = true;
                self.presenter.set_cover(true);
                self.stop_animation();
                self.set_effector(0);
                info!(screen = self.current_id(), "watchdog: presence lost, screen covered");
            }
            Presence::Regained => {
                self.covered = false;
                self.presenter.set_cover(false);
                info!(from = self.current_id(), "watchdog: presence regained, resetting");
                self.reset(now);
            }
        }
    }

    /// Unconditional return to the initial screen; all visit state is dropped.
    pub fn reset(&mut self, now: Instant) {
        self.fade_until = None;
        self.screen_timer = None;
        self.countdown = None;
        self.pending_detection = None;
        self.phase = Phase::Settled;
        self.stop_animation();
        self.result_mood = None;
        self.selected_day = None;
        self.selections.clear();

        self.current = self.graph.initial();
        self.presenter.show(self.current_id());
        self.enter(now);
    }

    fn ensure_uncovered(&self) -> Result<(), FlowError> {
        if self.covered {
            return Err(FlowError::Covered);
        }
        Ok(())
    }

    fn ensure_settled(&self, to: usize) -> Result<(), FlowError> {
        if self.phase == Phase::Settled {
            return Ok(());
        }
        Err(FlowError::TransitionInFlight {
            from: self.current_id(),
            to: self.graph.screen(to).id,
        })
    }

    fn stats_view_mut(&mut self, action: &'static str) -> Result<&mut StatsView, FlowError> {
        let here = self.graph.screen(self.current);
        if here.on_enter != EntryAction::LoadStats {
            return Err(FlowError::WrongScreen { action, screen: here.id });
        }
        let screen = here.id;
        self.stats.as_mut().ok_or(FlowError::WrongScreen { action, screen })
    }

    fn begin(&mut self, to: usize, now: Instant) {
        let from = self.current_id();
        let target = self.graph.screen(to).id;
        self.screen_timer = None;
        self.countdown = None;
        self.leave();

        let fade = self.fade();
        self.phase = Phase::FadingOut { to: target };
        self.fade_target = to;
        self.fade_until = Some(now + fade);
        self.presenter.fade_out(from, fade);
        info!(from, to = target, "flow: transition");
    }

    fn fire_fade(&mut self, at: Instant) {
        self.fade_until = None;
        match self.phase {
            Phase::FadingOut { .. } => {
                self.current = self.fade_target;
                let id = self.current_id();
                self.presenter.show(id);
                self.enter(at);
                let fade = self.fade();
                self.phase = Phase::FadingIn;
                self.fade_until = Some(at + fade);
                self.presenter.fade_in(id, fade);
            }
            Phase::FadingIn => {
                self.phase = Phase::Settled;
                debug!(screen = self.current_id(), "flow: settled");
            }
            Phase::Settled => {}
        }
    }

    fn live_screen_timer(&self) -> Option<ScreenTimer> {
        self.screen_timer.filter(|_| !self.covered)
    }

    fn fire_screen(&mut self, timer: ScreenTimer) {
        self.screen_timer = None;
        let screen = self.graph.screen(self.current);
        let (id, policy) = (screen.id, screen.policy);
        match (timer.kind, policy) {
            (TimerKind::Auto, Policy::Auto { target, .. }) => self.follow(target, timer),
            (TimerKind::CountdownTick, Policy::Event { target }) => match self.countdown {
                Some(v) if v > 0 => {
                    self.presenter.set_text(slots::COUNTDOWN, &v.to_string());
                    self.countdown = Some(v - 1);
                    self.screen_timer = Some(ScreenTimer {
                        at: timer.at + Duration::from_millis(self.cfg.countdown_tick_ms),
                        kind: TimerKind::CountdownTick,
                    });
                }
                _ => {
                    self.countdown = None;
                    // No fresh capture: whatever the capture loop published last.
                    self.pending_detection = Some(self.slot.snapshot());
                    self.follow(target, timer);
                }
            },
            // ScreenGraph::validate pairs every armed timer with its policy.
            (kind, policy) => {
                debug_assert!(false, "timer {kind:?} on {id} with {policy:?}");
                warn!(?kind, ?policy, screen = id, "flow: stray timer ignored");
            }
        }
    }

    /// Timer-driven transition; waits for a running fade-in to finish.
    fn follow(&mut self, target: ScreenId, timer: ScreenTimer) {
        if self.phase != Phase::Settled {
            if let Some(until) = self.fade_until {
                self.screen_timer = Some(ScreenTimer { at: until, kind: timer.kind });
                return;
            }
        }
        match self.graph.index_of(target) {
            Some(to) => self.begin(to, timer.at),
            None => error!(target, "flow: timer target missing"),
        }
    }

    fn enter(&mut self, at: Instant) {
        let screen = self.graph.screen(self.current);
        let (action, policy) = (screen.on_enter, screen.policy);
        match action {
            EntryAction::None => {}
            EntryAction::PickPhrase => self.pick_phrase(),
            EntryAction::StartCountdown => {
                let from = self.cfg.countdown_from;
                self.countdown = Some(from);
                self.presenter.set_text(slots::COUNTDOWN, &from.to_string());
                self.screen_timer = Some(ScreenTimer {
                    at: at + Duration::from_millis(self.cfg.countdown_first_tick_ms),
                    kind: TimerKind::CountdownTick,
                });
            }
            EntryAction::ShowResult => self.show_result(),
            EntryAction::ClearSelection(picker) => {
                if let Some(old) = self.selections.remove(&picker) {
                    for tag in old {
                        self.presenter.set_toggle(picker, &tag, false);
                    }
                }
            }
            EntryAction::LoadStats => self.load_stats(),
            EntryAction::LoadDayDetail => self.load_day_detail(),
        }

        if let Policy::Auto { after, .. } = policy {
            self.screen_timer = Some(ScreenTimer { at: at + after, kind: TimerKind::Auto });
        }
    }

    fn leave(&mut self) {
        if self.graph.screen(self.current).on_enter == EntryAction::ShowResult {
            self.stop_animation();
        }
    }

    fn pick_phrase(&mut self) {
        let phrase = self.cfg.phrases.choose(&mut self.rng).cloned();
        if let Some(p) = &phrase {
            self.presenter.set_text(slots::PHRASE, p);
        }
        self.phrase = phrase;
    }

    fn show_result(&mut self) {
        let detection = self.pending_detection.take().unwrap_or_else(|| self.slot.snapshot());
        let mood = detection.as_ref().map(|d| d.mood);
        let text = mood.map(MoodLabel::display).unwrap_or(NOT_DETECTED);
        self.presenter.set_text(slots::MOOD, text);
        self.result_mood = mood;
        if self.covered {
            // A fade that ends behind the cover still lands here; keep it dark.
            info!(mood = text, "flow: result held, nobody present");
            return;
        }
        self.presenter.start_animation();
        self.animating = true;
        self.set_effector(self.intensity.level_for(mood));
        info!(mood = text, "flow: result");
    }

    fn stop_animation(&mut self) {
        if self.animating {
            self.presenter.stop_animation();
            self.animating = false;
        }
    }

    fn set_effector(&mut self, level: u8) {
        if let Err(e) = self.effector.set_level(level) {
            warn!("effector: set_level({}) failed: {:#}", level, e);
        }
    }

    fn now_local(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    fn save_entry(&mut self) {
        let Some(mood) = self.result_mood else {
            info!("flow: nothing detected, entry not saved");
            return;
        };
        let entry = MoodEntry {
            at: self.now_local(),
            mood,
            emotions: self.selection(Picker::Emotions),
            motives: self.selection(Picker::Motives),
        };
        match self.store.append(entry) {
            Ok(()) => info!(mood = %mood, "flow: entry saved"),
            Err(e) => warn!("flow: saving entry failed: {:#}", e),
        }
    }

    fn share(&mut self) {
        let contacts = self.selection(Picker::Contacts);
        if contacts.is_empty() {
            info!("flow: no contacts selected, nothing shared");
            return;
        }
        let record = ShareRecord { at: self.now_local(), mood: self.result_mood, contacts };
        if let Err(e) = self.store.share(record) {
            warn!("flow: sharing failed: {:#}", e);
        }
    }

    fn load_stats(&mut self) {
        let today = self.now_local().date();
        let days = if today >= self.stats_start {
            (today - self.stats_start).whole_days() as usize + 1
        } else {
            0
        };
        let page = self.stats.as_ref().map_or(0, |s| s.page());
        let mut view = StatsView::new(self.stats_start, self.store.daily_levels(self.stats_start, days));
        view.jump(page);
        self.presenter.show_chart(&view.chart());
        self.stats = Some(view);
    }

    fn load_day_detail(&mut self) {
        let Some(date) = self.selected_day else {
            warn!("flow: day detail without a selected day");
            return;
        };
        let detail = DayDetail { date, entries: self.store.entries_on(date) };
        self.presenter.show_day(&detail);
    }

    fn fade(&self) -> Duration {
        Duration::from_millis(self.cfg.fade_ms)
    }
}
