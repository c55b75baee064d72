//! File-backed version history of persona prompts.
//!
//! Layout (kept outside the plugin install dir so uninstalling keeps data):
//!
//! ```text
//! <data_dir>/backups/
//! ├── qp_猫娘_abc123/
//! │   ├── v001_20260202_123456.txt
//! │   └── v002_20260202_134500.txt
//! └── qp_傲娇_def456/
//! ```
//!
//! Each file holds one previous system prompt verbatim. Loading tolerates
//! damaged entries: they are skipped and counted, never fatal.

use chrono::{Local, NaiveDateTime, Timelike};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonaBackup {
    /// Backup key of the persona (its sanitised id).
    pub persona_id: String,
    pub version: u32,
    pub system_prompt: String,
    pub backed_up_at: NaiveDateTime,
}

/// Outcome of [`BackupStore::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub personas: usize,
    pub entries: usize,
    /// Entries that were present but unusable (bad name, unreadable, not UTF-8).
    pub skipped: usize,
}

pub struct BackupStore {
    root: PathBuf,
    /// Newest first per persona key.
    index: Mutex<HashMap<String, Vec<PersonaBackup>>>,
}

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v(\d+)_(\d{8})_(\d{6})\.txt$").expect("static regex"))
}

/// Parse `v001_20260202_123456.txt` into (version, timestamp).
pub fn parse_backup_filename(name: &str) -> Option<(u32, NaiveDateTime)> {
    let caps = filename_re().captures(name)?;
    let version = caps.get(1)?.as_str().parse().ok()?;
    let stamp = format!("{}_{}", caps.get(2)?.as_str(), caps.get(3)?.as_str());
    let at = NaiveDateTime::parse_from_str(&stamp, "%Y%m%d_%H%M%S").ok()?;
    Some((version, at))
}

pub fn backup_filename(version: u32, at: NaiveDateTime) -> String {
    format!("v{:03}_{}.txt", version, at.format("%Y%m%d_%H%M%S"))
}

/// Directory name for a persona id. Path separators and other characters
/// that are illegal on common filesystems become `_`.
pub fn backup_key(persona_id: &str) -> String {
    let safe: String = persona_id
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        format!("_{}", safe)
    } else {
        safe
    }
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn persona_dir(&self, persona_id: &str) -> PathBuf {
        self.root.join(backup_key(persona_id))
    }

    /// Rebuild the in-memory index from disk.
    pub async fn load(&self) -> Result<LoadReport, BackupError> {
        let mut index = self.index.lock().await;
        index.clear();
        let mut report = LoadReport::default();

        fs::create_dir_all(&self.root).await.map_err(io_err(&self.root))?;
        let mut dirs = fs::read_dir(&self.root).await.map_err(io_err(&self.root))?;

        while let Some(entry) = dirs.next_entry().await.map_err(io_err(&self.root))? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            let (backups, skipped) = read_persona_dir(&key, &path).await;
            report.skipped += skipped;
            if !backups.is_empty() {
                report.personas += 1;
                report.entries += backups.len();
                index.insert(key, backups);
            }
        }

        if report.skipped > 0 {
            tracing::warn!(
                skipped = report.skipped,
                loaded = report.entries,
                "Some persona backups were unreadable and skipped"
            );
        }
        tracing::info!(
            personas = report.personas,
            entries = report.entries,
            "Persona backups loaded"
        );
        Ok(report)
    }

    /// Write `system_prompt` as the next version of `persona_id`, then prune
    /// so at most `max_versions` remain.
    pub async fn add_backup(
        &self,
        persona_id: &str,
        system_prompt: &str,
        max_versions: usize,
    ) -> Result<PersonaBackup, BackupError> {
        let mut index = self.index.lock().await;
        let dir = self.persona_dir(persona_id);
        fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let on_disk = list_versions(&dir).await?;
        let version = on_disk.iter().map(|(v, _)| *v).max().unwrap_or(0) + 1;
        let now = Local::now().naive_local();
        // File names only carry whole seconds
        let at = now.with_nanosecond(0).unwrap_or(now);
        let path = dir.join(backup_filename(version, at));
        fs::write(&path, system_prompt).await.map_err(io_err(&path))?;

        let backup = PersonaBackup {
            persona_id: backup_key(persona_id),
            version,
            system_prompt: system_prompt.to_string(),
            backed_up_at: at,
        };
        let list = index.entry(backup.persona_id.clone()).or_default();
        list.insert(0, backup.clone());
        tracing::info!(persona = persona_id, version, "Persona backup saved");

        let keep = max_versions.max(1);
        let mut files = on_disk;
        files.push((version, path));
        files.sort_by(|a, b| b.0.cmp(&a.0));
        for (old_version, old_path) in files.into_iter().skip(keep) {
            match fs::remove_file(&old_path).await {
                Ok(()) => tracing::debug!(persona = persona_id, version = old_version, "Pruned old backup"),
                Err(e) => tracing::warn!("Failed to prune backup {}: {}", old_path.display(), e),
            }
        }
        list.truncate(keep);

        Ok(backup)
    }

    pub async fn latest(&self, persona_id: &str) -> Option<PersonaBackup> {
        let index = self.index.lock().await;
        index.get(&backup_key(persona_id)).and_then(|l| l.first().cloned())
    }

    /// All versions, newest first.
    pub async fn all(&self, persona_id: &str) -> Vec<PersonaBackup> {
        let index = self.index.lock().await;
        index.get(&backup_key(persona_id)).cloned().unwrap_or_default()
    }

    pub async fn count(&self, persona_id: &str) -> usize {
        let index = self.index.lock().await;
        index.get(&backup_key(persona_id)).map_or(0, Vec::len)
    }

    /// Remove and return the newest version (rollback consumes it).
    pub async fn take_latest(&self, persona_id: &str) -> Result<Option<PersonaBackup>, BackupError> {
        let mut index = self.index.lock().await;
        let key = backup_key(persona_id);
        let Some(list) = index.get_mut(&key) else {
            return Ok(None);
        };
        let Some(newest) = list.first() else {
            return Ok(None);
        };

        // Disk first: the index only forgets what is gone from disk
        let path = self
            .persona_dir(persona_id)
            .join(backup_filename(newest.version, newest.backed_up_at));
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }

        let backup = list.remove(0);
        if list.is_empty() {
            index.remove(&key);
        }
        Ok(Some(backup))
    }

    pub async fn delete_persona(&self, persona_id: &str) -> Result<(), BackupError> {
        let mut index = self.index.lock().await;
        index.remove(&backup_key(persona_id));
        let dir = self.persona_dir(persona_id);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir).await.map_err(io_err(&dir))?;
            tracing::info!(persona = persona_id, "Deleted backup directory");
        }
        Ok(())
    }
}

/// Read one persona directory; returns (backups newest first, skipped count).
async fn read_persona_dir(key: &str, dir: &Path) -> (Vec<PersonaBackup>, usize) {
    let mut backups = Vec::new();
    let mut skipped = 0;

    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Failed to read backup dir {}: {}", dir.display(), e);
            return (backups, 1);
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list backup dir {}: {}", dir.display(), e);
                skipped += 1;
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".txt") {
            continue;
        }
        let Some((version, at)) = parse_backup_filename(&name) else {
            tracing::warn!("Skipping backup with unexpected name: {}", name);
            skipped += 1;
            continue;
        };
        match fs::read_to_string(entry.path()).await {
            Ok(system_prompt) => backups.push(PersonaBackup {
                persona_id: key.to_string(),
                version,
                system_prompt,
                backed_up_at: at,
            }),
            Err(e) => {
                tracing::warn!("Skipping unreadable backup {}: {}", entry.path().display(), e);
                skipped += 1;
            }
        }
    }

    backups.sort_by(|a, b| b.version.cmp(&a.version));
    (backups, skipped)
}

async fn list_versions(dir: &Path) -> Result<Vec<(u32, PathBuf)>, BackupError> {
    let mut out = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(io_err(dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((version, _)) = parse_backup_filename(&name) {
            out.push((version, entry.path()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filename() {
        let (v, at) = parse_backup_filename("v012_20260202_123456.txt").unwrap();
        assert_eq!(v, 12);
        assert_eq!(at.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-02-02 12:34:56");
        assert!(parse_backup_filename("v1_2026_1.txt").is_none());
        assert!(parse_backup_filename("v001_20261340_000000.txt").is_none());
        assert!(parse_backup_filename("notes.txt").is_none());
    }

    #[test]
    fn test_filename_roundtrip() {
        let at = NaiveDateTime::parse_from_str("20260202_134500", "%Y%m%d_%H%M%S").unwrap();
        let name = backup_filename(7, at);
        assert_eq!(name, "v007_20260202_134500.txt");
        assert_eq!(parse_backup_filename(&name), Some((7, at)));
    }

    #[test]
    fn test_backup_key_sanitises() {
        assert_eq!(backup_key("qp_猫娘_abc"), "qp_猫娘_abc");
        assert_eq!(backup_key("a/b:c*d"), "a_b_c_d");
        assert_eq!(backup_key(".."), "_..");
        assert_eq!(backup_key(""), "_");
    }
}
