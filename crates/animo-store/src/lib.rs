pub mod doctor;
pub mod journal;

use anyhow::Result;
use animo_mood::MoodLabel;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

pub use journal::JournalStore;

/// Level recorded for days without entries.
pub const EMPTY_DAY_LEVEL: u8 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub journal_path: String,
}

/// One saved visit: the detected mood plus the tags the visitor picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub mood: MoodLabel,
    pub emotions: Vec<String>,
    pub motives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub mood: Option<MoodLabel>,
    pub contacts: Vec<String>,
}

pub trait MoodStore: Send {
    fn append(&mut self, entry: MoodEntry) -> Result<()>;

    fn share(&mut self, share: ShareRecord) -> Result<()>;

    /// Entries saved on `date`, oldest first.
    fn entries_on(&self, date: Date) -> Vec<MoodEntry>;

    /// One chart level (0..=4) per day starting at `start`.
    fn daily_levels(&self, start: Date, days: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(days);
        let mut day = Some(start);
        for _ in 0..days {
            let Some(d) = day else { break };
            out.push(daily_level(&self.entries_on(d)));
            day = d.next_day();
        }
        out
    }
}

/// Rounded mean of the entries' chart levels.
pub fn daily_level(entries: &[MoodEntry]) -> u8 {
    if entries.is_empty() {
        return EMPTY_DAY_LEVEL;
    }
    let sum: u32 = entries.iter().map(|e| u32::from(e.mood.level())).sum();
    let n = entries.len() as u32;
    ((sum * 2 + n) / (n * 2)) as u8
}

/// Volatile store for tests and kiosks running without a journal.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub entries: Vec<MoodEntry>,
    pub shares: Vec<ShareRecord>,
}

impl MoodStore for MemoryStore {
    fn append(&mut self, entry: MoodEntry) -> Result<()> {
        self.entries.push(entry);
        Ok(())
    }

    fn share(&mut self, share: ShareRecord) -> Result<()> {
        self.shares.push(share);
        Ok(())
    }

    fn entries_on(&self, date: Date) -> Vec<MoodEntry> {
        self.entries.iter().filter(|e| e.at.date() == date).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    pub(crate) fn entry(at: OffsetDateTime, mood: MoodLabel) -> MoodEntry {
        MoodEntry { at, mood, emotions: vec!["ESPERANZA".into()], motives: vec!["FAMILIA".into()] }
    }

    #[test]
    fn daily_level_rounds_the_mean() {
        let at = datetime!(2025-04-19 10:45 UTC);
        assert_eq!(daily_level(&[]), EMPTY_DAY_LEVEL);
        assert_eq!(daily_level(&[entry(at, MoodLabel::VeryHappy)]), 4);
        // (4 + 3) / 2 = 3.5 rounds up
        assert_eq!(daily_level(&[entry(at, MoodLabel::VeryHappy), entry(at, MoodLabel::Happy)]), 4);
        // (0 + 1 + 1) / 3 = 0.67
        let sad = [entry(at, MoodLabel::VerySad), entry(at, MoodLabel::Sad), entry(at, MoodLabel::Sad)];
        assert_eq!(daily_level(&sad), 1);
    }

    #[test]
    fn memory_store_groups_by_day() {
        let mut s = MemoryStore::default();
        s.append(entry(datetime!(2025-04-19 10:45 UTC), MoodLabel::Happy)).unwrap();
        s.append(entry(datetime!(2025-04-19 18:10 UTC), MoodLabel::VeryHappy)).unwrap();
        s.append(entry(datetime!(2025-04-21 09:00 UTC), MoodLabel::VerySad)).unwrap();

        assert_eq!(s.entries_on(datetime!(2025-04-19 0:00 UTC).date()).len(), 2);
        let levels = s.daily_levels(datetime!(2025-04-18 0:00 UTC).date(), 5);
        assert_eq!(levels, vec![2, 4, 2, 0, 2]);
    }
}
