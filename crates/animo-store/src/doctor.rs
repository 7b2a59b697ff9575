use anyhow::Result;
use std::path::Path;

pub fn check_journal(path: &str) -> Result<()> {
    let p = Path::new(path);
    anyhow::ensure!(!path.is_empty(), "store.journal_path is empty");
    if p.exists() {
        anyhow::ensure!(p.is_file(), "store.journal_path is not a file: {}", path);
    }
    if let Some(dir) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        if dir.exists() {
            anyhow::ensure!(dir.is_dir(), "store.journal_path parent is not a dir: {}", dir.display());
        }
    }
    Ok(())
}
