// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Apply journal for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::apply::ApplyAction;
use crate::storage::Storage;
use crate::{Result, SnapsortError};

/// One file placed by the apply phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ApplyAction,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub undone: bool,
}

impl ApplyRecord {
    pub fn new(action: ApplyAction, source: PathBuf, destination: PathBuf, category: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            source,
            destination,
            category,
            undone: false,
        }
    }
}

/// JSONL journal of apply operations
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record to the journal
    pub fn append(&self, record: &ApplyRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all records, skipping lines that do not parse
    pub fn read_all(&self) -> Result<Vec<ApplyRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Failed to parse history record: {}", e),
            }
        }

        Ok(records)
    }

    /// Most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<ApplyRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    /// Records not yet undone (newest first)
    pub fn get_undoable(&self) -> Result<Vec<ApplyRecord>> {
        let mut records: Vec<_> = self.read_all()?.into_iter().filter(|r| !r.undone).collect();
        records.reverse();
        Ok(records)
    }

    /// Mark a record as undone
    pub fn mark_undone(&self, id: &str) -> Result<()> {
        let records = self.read_all()?;

        // Rewrite the entire file with the updated record
        let mut writer = std::io::BufWriter::new(File::create(&self.path)?);
        for mut record in records {
            if record.id == id {
                record.undone = true;
            }
            writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Remove the journal
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reverse one record on disk.
///
/// A copy is undone by deleting it; a move by moving the file back, which
/// fails if something already occupies the original path.
pub async fn undo_record(storage: &dyn Storage, record: &ApplyRecord) -> Result<()> {
    match record.action {
        ApplyAction::Copy => {
            storage.remove(&record.destination).await?;
        }
        ApplyAction::Move => {
            let (dir, name) = split_path(&record.source)?;
            if storage.exists(dir, name).await? {
                return Err(SnapsortError::FileSystem(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} already exists", record.source.display()),
                )));
            }
            storage.move_file(&record.destination, dir, name).await?;
        }
    }

    info!("Undid {}: {}", record.action, record.destination.display());
    Ok(())
}

fn split_path(path: &Path) -> Result<(&Path, &str)> {
    let dir = path.parent();
    let name = path.file_name().and_then(|n| n.to_str());
    match (dir, name) {
        (Some(dir), Some(name)) => Ok((dir, name)),
        _ => Err(SnapsortError::Config(format!(
            "invalid path in history: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn record(action: ApplyAction, source: &Path, destination: &Path) -> ApplyRecord {
        ApplyRecord::new(action, source.to_path_buf(), destination.to_path_buf(), "food".into())
    }

    #[test]
    fn test_append_read_and_mark_undone() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path().join("nested/history.jsonl"));
        assert!(history.read_all().unwrap().is_empty());

        let first = record(ApplyAction::Copy, Path::new("/a.jpg"), Path::new("/out/a.jpg"));
        let second = record(ApplyAction::Move, Path::new("/b.jpg"), Path::new("/out/b.jpg"));
        history.append(&first).unwrap();
        history.append(&second).unwrap();

        let recent = history.get_recent(1).unwrap();
        assert_eq!(recent[0].id, second.id);

        history.mark_undone(&second.id).unwrap();
        let undoable = history.get_undoable().unwrap();
        assert_eq!(undoable.len(), 1);
        assert_eq!(undoable[0].id, first.id);

        history.clear().unwrap();
        assert!(history.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        history
            .append(&record(ApplyAction::Copy, Path::new("/a.jpg"), Path::new("/o/a.jpg")))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(history.path()).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undo_copy_and_move() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("out")).unwrap();
        std::fs::write(root.join("a.jpg"), b"a").unwrap();
        std::fs::write(root.join("out/a.jpg"), b"a").unwrap();
        std::fs::write(root.join("out/b.jpg"), b"b").unwrap();
        let storage = LocalStorage::new();

        let copy = record(ApplyAction::Copy, &root.join("a.jpg"), &root.join("out/a.jpg"));
        undo_record(&storage, &copy).await.unwrap();
        assert!(!root.join("out/a.jpg").exists());
        assert!(root.join("a.jpg").exists());

        let moved = record(ApplyAction::Move, &root.join("b.jpg"), &root.join("out/b.jpg"));
        undo_record(&storage, &moved).await.unwrap();
        assert_eq!(std::fs::read(root.join("b.jpg")).unwrap(), b"b".to_vec());
        assert!(!root.join("out/b.jpg").exists());
    }

    #[tokio::test]
    async fn test_undo_move_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("out")).unwrap();
        std::fs::write(root.join("b.jpg"), b"new").unwrap();
        std::fs::write(root.join("out/b.jpg"), b"old").unwrap();

        let moved = record(ApplyAction::Move, &root.join("b.jpg"), &root.join("out/b.jpg"));
        assert!(undo_record(&LocalStorage::new(), &moved).await.is_err());
        assert_eq!(std::fs::read(root.join("b.jpg")).unwrap(), b"new".to_vec());
    }
}
