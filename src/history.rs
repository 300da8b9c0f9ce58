//! On-disk history of interactively typed shell commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A line-per-entry history file capped at `capacity` entries.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
    capacity: usize,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// History is disabled when the capacity is zero.
    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Creates an empty file if history is enabled and none exists yet.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.enabled() && !self.path.exists() {
            std::fs::write(&self.path, "")
                .with_context(|| format!("failed to create {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Reads all entries, oldest first.
    pub fn read(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Records `entry` as the newest item, dropping an older duplicate and
    /// anything beyond the capacity.
    pub fn append(&self, entry: &str) -> Result<()> {
        let entry = entry.trim();
        if !self.enabled() || entry.is_empty() {
            return Ok(());
        }
        let mut entries = self.read()?;
        entries.retain(|existing| existing != entry);
        entries.push(entry.to_string());
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
        self.write(&entries)
    }

    /// Removes duplicate entries, keeping first occurrences. Returns how many
    /// entries were dropped.
    pub fn unique(&self) -> Result<usize> {
        let entries = self.read()?;
        let before = entries.len();
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<String> = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        let removed = before - unique.len();
        self.write(&unique)?;
        Ok(removed)
    }

    fn write(&self, entries: &[String]) -> Result<()> {
        let mut body = entries.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&self.path, body)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_moves_duplicates_to_the_end_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryFile::new(dir.path().join(".suglite_history"), 3);
        for entry in ["$ls", "git status", "$ls", "cargo test", "npm i"] {
            history.append(entry).unwrap();
        }
        assert_eq!(history.read().unwrap(), vec!["$ls", "cargo test", "npm i"]);
    }

    #[test]
    fn disabled_history_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryFile::new(dir.path().join(".suglite_history"), 0);
        history.ensure_exists().unwrap();
        history.append("$ls").unwrap();
        assert!(!history.path().exists());
    }

    #[test]
    fn unique_keeps_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".suglite_history");
        std::fs::write(&path, "a\nb\na\nc\nb\n").unwrap();
        let history = HistoryFile::new(&path, 10);
        assert_eq!(history.unique().unwrap(), 2);
        assert_eq!(history.read().unwrap(), vec!["a", "b", "c"]);
    }
}
