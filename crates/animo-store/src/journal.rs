use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use time::Date;
use tracing::{debug, info, warn};

use crate::{MoodEntry, MoodStore, ShareRecord};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Entry(MoodEntry),
    Share(ShareRecord),
}

/// JSON-lines journal. The whole file is read at open; appends go to a
/// writer thread so callers never wait on disk.
pub struct JournalStore {
    path: PathBuf,
    entries: Vec<MoodEntry>,
    shares: usize,
    tx: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl JournalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create journal dir {}", dir.display()))?;
        }

        let mut entries = Vec::new();
        let mut shares = 0usize;
        if path.exists() {
            let raw = fs::read_to_string(&path).with_context(|| format!("read journal {}", path.display()))?;
            for (n, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(line) {
                    Ok(Record::Entry(e)) => entries.push(e),
                    Ok(Record::Share(_)) => shares += 1,
                    Err(e) => warn!("journal: skipping line {}: {}", n + 1, e),
                }
            }
        }
        entries.sort_by_key(|e| e.at);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open journal {}", path.display()))?;

        let (tx, rx) = mpsc::channel::<String>();
        let writer = std::thread::Builder::new()
            .name("journal".into())
            .spawn(move || {
                for line in rx {
                    if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                        warn!("journal: write failed: {}", e);
                    }
                }
            })
            .context("spawn journal writer")?;

        info!("journal: {} entries loaded from {}", entries.len(), path.display());
        Ok(Self { path, entries, shares, tx: Some(tx), writer: Some(writer) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn share_count(&self) -> usize {
        self.shares
    }

    fn enqueue(&self, record: &Record) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let tx = self.tx.as_ref().context("journal writer closed")?;
        tx.send(line).map_err(|_| anyhow::anyhow!("journal writer stopped"))?;
        Ok(())
    }
}

impl MoodStore for JournalStore {
    fn append(&mut self, entry: MoodEntry) -> Result<()> {
        self.enqueue(&Record::Entry(entry.clone()))?;
        debug!(mood = %entry.mood, "journal: entry queued");
        let pos = self.entries.partition_point(|e| e.at <= entry.at);
        self.entries.insert(pos, entry);
        Ok(())
    }

    fn share(&mut self, share: ShareRecord) -> Result<()> {
        self.enqueue(&Record::Share(share))?;
        self.shares += 1;
        Ok(())
    }

    fn entries_on(&self, date: Date) -> Vec<MoodEntry> {
        self.entries.iter().filter(|e| e.at.date() == date).cloned().collect()
    }
}

impl Drop for JournalStore {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop after it drains.
        self.tx.take();
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::entry;
    use animo_mood::MoodLabel;
    use time::macros::datetime;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/journal.jsonl");
        {
            let mut j = JournalStore::open(&path).unwrap();
            assert!(j.is_empty());
            j.append(entry(datetime!(2025-04-19 10:45 UTC), MoodLabel::Happy)).unwrap();
            j.append(entry(datetime!(2025-04-19 09:30 UTC), MoodLabel::Sad)).unwrap();
            j.share(ShareRecord {
                at: datetime!(2025-04-19 10:46 UTC),
                mood: Some(MoodLabel::Happy),
                contacts: vec!["MAMÁ".into()],
            })
            .unwrap();
        }
        let j = JournalStore::open(&path).unwrap();
        assert_eq!(j.len(), 2);
        assert_eq!(j.share_count(), 1);
        let day = j.entries_on(datetime!(2025-04-19 0:00 UTC).date());
        assert_eq!(day[0].mood, MoodLabel::Sad);
        assert_eq!(day[1].emotions, vec!["ESPERANZA".to_string()]);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let good = serde_json::to_string(&Record::Entry(entry(datetime!(2025-04-20 12:00 UTC), MoodLabel::VeryHappy))).unwrap();
        fs::write(&path, format!("{{not json\n\n{}\n", good)).unwrap();

        let j = JournalStore::open(&path).unwrap();
        assert_eq!(j.len(), 1);
        assert_eq!(j.daily_levels(datetime!(2025-04-20 0:00 UTC).date(), 1), vec![4]);
    }

    #[test]
    fn record_lines_are_tagged() {
        let line = serde_json::to_string(&Record::Entry(entry(datetime!(2025-04-20 12:00 UTC), MoodLabel::Normal))).unwrap();
        assert!(line.contains("\"kind\":\"entry\""));
        assert!(line.contains("\"mood\":\"NORMAL\""));
    }
}
