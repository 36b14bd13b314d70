// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Copy or move categorized images into per-category folders

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entry::{Entry, EntryState};
use crate::history::{ApplyRecord, History};
use crate::naming::{sanitize_dir_name, unique_name};
use crate::progress::CancelFlag;
use crate::storage::Storage;
use crate::{Result, SnapsortError};

/// What to do with each categorized file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    #[default]
    Copy,
    Move,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => f.write_str("copy"),
            Self::Move => f.write_str("move"),
        }
    }
}

impl FromStr for ApplyAction {
    type Err = SnapsortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            other => Err(SnapsortError::Config(format!(
                "unknown action '{}', expected copy or move",
                other
            ))),
        }
    }
}

/// Where one file ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one apply pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    /// Entries already applied by an earlier pass
    pub skipped: usize,
    /// Categorized entries left in place because apply was stopped
    pub remaining: usize,
    pub failed: Vec<ApplyFailure>,
    pub placements: Vec<Placement>,
}

/// Places categorized entries under `output_root/<category>/`
pub struct ApplyEngine {
    storage: Arc<dyn Storage>,
    output_root: PathBuf,
    history: Option<History>,
}

impl ApplyEngine {
    pub fn new(storage: Arc<dyn Storage>, output_root: PathBuf) -> Self {
        Self {
            storage,
            output_root,
            history: None,
        }
    }

    /// Journal every placement for later undo
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Apply every categorized entry, one at a time.
    ///
    /// Copied entries become `Applied`; moved entries are removed from
    /// `entries`. A failure leaves that entry untouched and is reported.
    pub async fn apply(&self, entries: &mut Vec<Entry>, action: ApplyAction) -> ApplyReport {
        self.apply_until(entries, action, &CancelFlag::new()).await
    }

    /// Like [`apply`](Self::apply), checking `cancel` before each file.
    ///
    /// Entries not reached once it is set stay `Categorized`.
    pub async fn apply_until(
        &self,
        entries: &mut Vec<Entry>,
        action: ApplyAction,
        cancel: &CancelFlag,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut moved: HashSet<PathBuf> = HashSet::new();

        for entry in entries.iter_mut() {
            let label = match &entry.state {
                EntryState::Categorized { label } => label.clone(),
                EntryState::Applied { .. } => {
                    report.skipped += 1;
                    continue;
                }
                _ => continue,
            };

            if cancel.is_cancelled() {
                report.remaining += 1;
                continue;
            }

            match self.place(entry, &label, action).await {
                Ok(destination) => {
                    debug!("{} {} -> {}", action, entry.path.display(), destination.display());
                    self.journal(action, entry, &destination, &label);

                    report.applied += 1;
                    report.placements.push(Placement {
                        source: entry.path.clone(),
                        destination: destination.clone(),
                        category: label.clone(),
                    });

                    if action == ApplyAction::Move {
                        moved.insert(entry.path.clone());
                    }
                    entry.state = EntryState::Applied { label, destination };
                }
                Err(e) => {
                    warn!("Failed to {} {}: {}", action, entry.path.display(), e);
                    report.failed.push(ApplyFailure {
                        path: entry.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !moved.is_empty() {
            entries.retain(|e| !moved.contains(&e.path));
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            remaining = report.remaining,
            failed = report.failed.len(),
            "Apply finished"
        );
        report
    }

    async fn place(&self, entry: &Entry, label: &str, action: ApplyAction) -> Result<PathBuf> {
        let dir = self
            .storage
            .ensure_dir(&self.output_root, &sanitize_dir_name(label))
            .await?;
        let name = unique_name(self.storage.as_ref(), &dir, &entry.name).await?;

        match action {
            ApplyAction::Copy => self.storage.copy(&entry.path, &dir, &name).await,
            ApplyAction::Move => self.storage.move_file(&entry.path, &dir, &name).await,
        }
    }

    fn journal(&self, action: ApplyAction, entry: &Entry, destination: &Path, label: &str) {
        if let Some(history) = &self.history {
            let record = ApplyRecord::new(
                action,
                entry.path.clone(),
                destination.to_path_buf(),
                label.to_string(),
            );
            if let Err(e) = history.append(&record) {
                warn!("Failed to record history: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::TempDir;

    fn categorized(root: &Path, name: &str, label: &str) -> Entry {
        let path = root.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        let mut entry = Entry::new(path, name, name);
        entry.state = EntryState::Categorized { label: label.into() };
        entry
    }

    fn engine(root: &Path) -> ApplyEngine {
        ApplyEngine::new(Arc::new(LocalStorage::new()), root.join("OrganizedImages"))
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!("MOVE".parse::<ApplyAction>().unwrap(), ApplyAction::Move);
        assert_eq!(ApplyAction::Copy.to_string(), "copy");
        assert!("delete".parse::<ApplyAction>().is_err());
    }

    #[tokio::test]
    async fn test_copy_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut entries = vec![categorized(root, "a.jpg", "food"), categorized(root, "b.jpg", "art")];
        let engine = engine(root);

        let first = engine.apply(&mut entries, ApplyAction::Copy).await;
        assert_eq!(first.applied, 2);
        assert!(first.failed.is_empty());
        assert!(root.join("OrganizedImages/food/a.jpg").exists());
        assert!(root.join("OrganizedImages/art/b.jpg").exists());
        assert!(root.join("a.jpg").exists());
        assert!(entries.iter().all(Entry::is_applied));

        let second = engine.apply(&mut entries, ApplyAction::Copy).await;
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(fs::read_dir(root.join("OrganizedImages/food")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_move_removes_entries_and_sources() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut entries = vec![categorized(root, "a.jpg", "food")];
        let history = History::new(root.join("history.jsonl"));
        let engine = engine(root).with_history(history.clone());

        let report = engine.apply(&mut entries, ApplyAction::Move).await;
        assert_eq!(report.applied, 1);
        assert!(entries.is_empty());
        assert!(!root.join("a.jpg").exists());
        assert!(root.join("OrganizedImages/food/a.jpg").exists());

        let records = history.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, ApplyAction::Move);
        assert_eq!(records[0].category, "food");
    }

    #[tokio::test]
    async fn test_same_names_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("x")).unwrap();
        fs::create_dir_all(root.join("y")).unwrap();
        let mut entries = vec![
            categorized(root, "x/photo.jpg", "food"),
            categorized(root, "y/photo.jpg", "food"),
        ];
        entries[0].name = "photo.jpg".into();
        entries[1].name = "photo.jpg".into();

        let report = engine(root).apply(&mut entries, ApplyAction::Copy).await;
        assert_eq!(report.applied, 2);
        assert!(root.join("OrganizedImages/food/photo.jpg").exists());
        assert!(root.join("OrganizedImages/food/photo-1.jpg").exists());
    }

    #[tokio::test]
    async fn test_stopped_apply_leaves_entries_categorized() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut entries = vec![categorized(root, "a.jpg", "food"), categorized(root, "b.jpg", "art")];
        let engine = engine(root);

        let stop = CancelFlag::new();
        stop.cancel();
        let report = engine.apply_until(&mut entries, ApplyAction::Move, &stop).await;
        assert_eq!(report.applied, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(Entry::is_categorized));
        assert!(root.join("a.jpg").exists());
        assert!(!root.join("OrganizedImages").exists());

        let report = engine.apply(&mut entries, ApplyAction::Move).await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.remaining, 0);
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_unfinished_entries_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut missing = Entry::new(root.join("gone.jpg"), "gone.jpg", "gone.jpg");
        missing.state = EntryState::Categorized { label: "food".into() };
        let mut errored = Entry::new(root.join("e.jpg"), "e.jpg", "e.jpg");
        errored.state = EntryState::Errored { reason: "boom".into() };
        let pending = Entry::new(root.join("p.jpg"), "p.jpg", "p.jpg");

        let mut entries = vec![missing, categorized(root, "ok.jpg", "food"), errored, pending];
        let report = engine(root).apply(&mut entries, ApplyAction::Copy).await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, root.join("gone.jpg"));
        assert!(entries[0].is_categorized());
        assert!(entries[1].is_applied());
        assert!(matches!(entries[2].state, EntryState::Errored { .. }));
        assert_eq!(entries[3].state, EntryState::Pending);
    }
}
