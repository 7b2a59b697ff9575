use animo_store::MoodEntry;
use time::macros::format_description;
use time::{Date, Duration, Weekday};

/// Days per chart page.
pub const WINDOW: usize = 7;

const MONTHS: [&str; 12] = ["ENE", "FEB", "MAR", "ABR", "MAY", "JUN", "JUL", "AGO", "SEP", "OCT", "NOV", "DIC"];

fn weekday_letter(day: Weekday) -> &'static str {
    match day {
        Weekday::Monday => "L",
        Weekday::Tuesday => "M",
        Weekday::Wednesday => "X",
        Weekday::Thursday => "J",
        Weekday::Friday => "V",
        Weekday::Saturday => "S",
        Weekday::Sunday => "D",
    }
}

/// What the statistics screen draws for the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartWindow {
    pub title: String,
    pub levels: Vec<u8>,
    pub day_labels: Vec<&'static str>,
    pub page: usize,
    pub pages: usize,
}

/// Paged line chart over one mood level per day.
#[derive(Debug, Clone)]
pub struct StatsView {
    start: Date,
    levels: Vec<u8>,
    window_start: usize,
}

impl StatsView {
    pub fn new(start: Date, levels: Vec<u8>) -> Self {
        Self { start, levels, window_start: 0 }
    }

    pub fn pages(&self) -> usize {
        self.levels.len().div_ceil(WINDOW)
    }

    pub fn page(&self) -> usize {
        self.window_start / WINDOW
    }

    pub fn scroll_left(&mut self) -> bool {
        if self.window_start < WINDOW {
            return false;
        }
        self.window_start -= WINDOW;
        true
    }

    pub fn scroll_right(&mut self) -> bool {
        if self.window_start + WINDOW >= self.levels.len() {
            return false;
        }
        self.window_start += WINDOW;
        true
    }

    pub fn jump(&mut self, page: usize) -> bool {
        if page >= self.pages() {
            return false;
        }
        self.window_start = page * WINDOW;
        true
    }

    pub fn visible(&self) -> &[u8] {
        let end = (self.window_start + WINDOW).min(self.levels.len());
        &self.levels[self.window_start.min(end)..end]
    }

    /// Absolute day index for a point of the visible page.
    pub fn day_at(&self, offset: usize) -> Option<usize> {
        let idx = self.window_start + offset;
        (offset < WINDOW && idx < self.levels.len()).then_some(idx)
    }

    pub fn date_of(&self, idx: usize) -> Option<Date> {
        self.start.checked_add(Duration::days(idx as i64))
    }

    /// `MEDIA DIARIA (<first day> - <last day>, <month of last day>)`
    pub fn title(&self) -> String {
        let last = (self.window_start + WINDOW - 1).min(self.levels.len().saturating_sub(1));
        let start = self.date_of(self.window_start).unwrap_or(self.start);
        let end = self.date_of(last.max(self.window_start)).unwrap_or(start);
        let month = MONTHS[usize::from(u8::from(end.month())) - 1];
        format!("MEDIA DIARIA ({} - {}, {})", start.day(), end.day(), month)
    }

    pub fn chart(&self) -> ChartWindow {
        let day_labels = (0..self.visible().len())
            .filter_map(|i| self.date_of(self.window_start + i))
            .map(|d| weekday_letter(d.weekday()))
            .collect();
        ChartWindow {
            title: self.title(),
            levels: self.visible().to_vec(),
            day_labels,
            page: self.page(),
            pages: self.pages(),
        }
    }
}

/// One line group of the day detail screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayLine {
    pub header: String,
    pub emotions: String,
    pub motives: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayDetail {
    pub date: Date,
    pub entries: Vec<MoodEntry>,
}

impl DayDetail {
    /// `19 / 04 / 2025`
    pub fn heading(&self) -> String {
        format!("{:02} / {:02} / {}", self.date.day(), u8::from(self.date.month()), self.date.year())
    }

    pub fn lines(&self) -> Vec<DayLine> {
        let hm = format_description!("[hour]:[minute]");
        self.entries
            .iter()
            .map(|e| DayLine {
                header: format!("{} {}", e.at.format(hm).unwrap_or_default(), e.mood.chart_name()),
                emotions: format!("EMOCIONES: {}", e.emotions.join(" - ")),
                motives: format!("MOTIVOS: {}", e.motives.join(" - ")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animo_mood::MoodLabel;
    use time::macros::{date, datetime};

    fn view(days: usize) -> StatsView {
        StatsView::new(date!(2024 - 04 - 01), (0..days).map(|i| (i % 5) as u8).collect())
    }

    #[test]
    fn first_page_title() {
        let v = view(28);
        assert_eq!(v.title(), "MEDIA DIARIA (1 - 7, ABR)");
        assert_eq!(v.pages(), 4);
        assert_eq!(v.visible(), &[0, 1, 2, 3, 4, 0, 1]);
    }

    #[test]
    fn scrolling_stays_inside_data() {
        let mut v = view(10);
        assert!(!v.scroll_left());
        assert!(v.scroll_right());
        assert_eq!(v.visible().len(), 3);
        assert_eq!(v.title(), "MEDIA DIARIA (8 - 10, ABR)");
        assert!(!v.scroll_right());
        assert!(v.scroll_left());
        assert_eq!(v.page(), 0);
    }

    #[test]
    fn jump_and_day_lookup() {
        let mut v = view(28);
        assert!(v.jump(3));
        assert_eq!(v.day_at(2), Some(23));
        assert_eq!(v.date_of(23), Some(date!(2024 - 04 - 24)));
        assert!(!v.jump(4));
        let mut short = view(9);
        short.jump(1);
        assert_eq!(short.day_at(1), Some(8));
        assert_eq!(short.day_at(2), None);
    }

    #[test]
    fn title_uses_month_of_last_day() {
        let mut v = StatsView::new(date!(2024 - 04 - 29), vec![2; 7]);
        assert_eq!(v.title(), "MEDIA DIARIA (29 - 5, MAY)");
        assert!(!v.scroll_right());
    }

    #[test]
    fn chart_labels_follow_weekdays() {
        // 2024-04-01 was a Monday
        let c = view(7).chart();
        assert_eq!(c.day_labels, vec!["L", "M", "X", "J", "V", "S", "D"]);
        assert_eq!((c.page, c.pages), (0, 1));
    }

    #[test]
    fn day_detail_formatting() {
        let d = DayDetail {
            date: date!(2025 - 04 - 19),
            entries: vec![MoodEntry {
                at: datetime!(2025-04-19 10:45 UTC),
                mood: MoodLabel::Happy,
                emotions: vec!["TRANQUILIDAD".into(), "ESPERANZA".into()],
                motives: vec!["FIESTA".into()],
            }],
        };
        assert_eq!(d.heading(), "19 / 04 / 2025");
        let lines = d.lines();
        assert_eq!(lines[0].header, "10:45 BIEN");
        assert_eq!(lines[0].emotions, "EMOCIONES: TRANQUILIDAD - ESPERANZA");
        assert_eq!(lines[0].motives, "MOTIVOS: FIESTA");
    }
}
