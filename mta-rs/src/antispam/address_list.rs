use crate::error::{MailError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One remembered peer address and when it was recorded.
///
/// A negative timestamp marks a permanent entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub address: String,
    pub recorded_at: i64,
}

impl ListEntry {
    pub fn new(address: impl Into<String>, recorded_at: i64) -> Self {
        Self {
            address: address.into(),
            recorded_at,
        }
    }

    pub fn age(&self, now: i64) -> i64 {
        now - self.recorded_at
    }
}

/// Ordered list of timestamped peer addresses, optionally backed by a file.
///
/// File format: the entry count on the first line, then the address and
/// the epoch timestamp on one line each.
#[derive(Debug, Clone, Default)]
pub struct AddressList {
    entries: Vec<ListEntry>,
    path: Option<PathBuf>,
}

impl AddressList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file gives an empty list that will be
    /// written to `path` on the first save; an empty path gives an
    /// in-memory list.
    pub fn load(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(Self::new());
        }

        let path = PathBuf::from(path);
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => parse_entries(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Address list {} not found, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            entries,
            path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn find(&self, address: &str) -> Option<&ListEntry> {
        self.entries.iter().find(|e| e.address == address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.find(address).is_some()
    }

    pub fn add(&mut self, address: &str, now: i64) {
        self.entries.push(ListEntry::new(address, now));
    }

    pub fn remove(&mut self, address: &str) -> Option<ListEntry> {
        let idx = self.entries.iter().position(|e| e.address == address)?;
        Some(self.entries.remove(idx))
    }

    /// Remove and return every non-permanent entry at least `max_age` old.
    pub fn take_older_than(&mut self, max_age: i64, now: i64) -> Vec<ListEntry> {
        let (old, keep): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.recorded_at >= 0 && e.age(now) >= max_age);
        self.entries = keep;
        old
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => save_entries(path, &self.entries),
            None => Ok(()),
        }
    }
}

fn parse_entries(content: &str) -> Result<Vec<ListEntry>> {
    let mut lines = content.lines();
    let count: usize = match lines.next() {
        Some(line) if !line.trim().is_empty() => line
            .trim()
            .parse()
            .map_err(|_| MailError::Parse(format!("Invalid address list count: {}", line)))?,
        _ => return Ok(Vec::new()),
    };

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let address = lines
            .next()
            .ok_or_else(|| MailError::Parse("Address list is truncated".to_string()))?;
        let recorded_at = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| MailError::Parse(format!("Missing timestamp for {}", address)))?;
        entries.push(ListEntry::new(address, recorded_at));
    }
    Ok(entries)
}

fn save_entries(path: &Path, entries: &[ListEntry]) -> Result<()> {
    let mut out = format!("{}\n", entries.len());
    for entry in entries {
        out.push_str(&format!("{}\n{}\n", entry.address, entry.recorded_at));
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("white.txt");
        let path_str = path.to_str().unwrap();

        let mut list = AddressList::load(path_str).unwrap();
        assert!(list.is_empty());
        list.add("10.0.0.1", 100);
        list.add("10.0.0.2", -1);
        list.save().unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "2\n10.0.0.1\n100\n10.0.0.2\n-1\n"
        );

        let reloaded = AddressList::load(path_str).unwrap();
        assert_eq!(reloaded.entries(), list.entries());
    }

    #[test]
    fn test_take_older_than_keeps_permanent() {
        let mut list = AddressList::new();
        list.add("a", 0);
        list.add("b", 90);
        list.add("c", -1);

        let old = list.take_older_than(50, 100);
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].address, "a");
        assert!(list.contains("b"));
        assert!(list.contains("c"));
    }

    #[test]
    fn test_truncated_file_rejected() {
        assert!(parse_entries("2\n1.1.1.1\n5\n").is_err());
        assert!(parse_entries("").unwrap().is_empty());
    }
}
