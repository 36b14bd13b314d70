// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Entries tracked through categorization and apply, plus cache keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Label used when a fixed category list has no match
pub const FALLBACK_CATEGORY: &str = "other";

/// How categories are chosen for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "categories", rename_all = "snake_case")]
pub enum ClassificationMode {
    /// Open taxonomy picked by the classifier
    Auto,
    /// Caller-supplied category names with an "other" fallback
    FixedList(Vec<String>),
}

impl ClassificationMode {
    /// Build a fixed-list mode from raw names, trimming blanks and duplicates.
    ///
    /// An empty list falls back to `Auto`.
    pub fn fixed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut categories: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !categories.iter().any(|c| c == name) {
                categories.push(name.to_string());
            }
        }

        if categories.is_empty() {
            Self::Auto
        } else {
            Self::FixedList(categories)
        }
    }

    /// Stable descriptor used in cache keys: "auto" or the sorted, comma-joined list
    pub fn descriptor(&self) -> String {
        match self {
            Self::Auto => "auto".to_string(),
            Self::FixedList(categories) => {
                let mut sorted = categories.clone();
                sorted.sort();
                sorted.join(",")
            }
        }
    }
}

/// Key into the result cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path_id: &str, mode: &ClassificationMode) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(mode.descriptor().as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one entry within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Classifying,
    Categorized { label: String },
    Errored { reason: String },
    Applied { label: String, destination: PathBuf },
}

/// Coarse status shown while a run is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Working,
    Done,
    Error,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One image file under consideration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path; the entry's identity
    pub path: PathBuf,
    /// File name shown to the user
    pub name: String,
    /// Path relative to the scanned root
    pub relative_path: String,
    pub state: EntryState,
}

impl Entry {
    pub fn new(path: PathBuf, name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            path,
            name: name.into(),
            relative_path: relative_path.into(),
            state: EntryState::Pending,
        }
    }

    /// Identifier fed into cache keys
    pub fn path_id(&self) -> &str {
        if self.relative_path.is_empty() {
            &self.name
        } else {
            &self.relative_path
        }
    }

    pub fn cache_key(&self, mode: &ClassificationMode) -> CacheKey {
        CacheKey::new(self.path_id(), mode)
    }

    /// Assigned category, if any
    pub fn category(&self) -> Option<&str> {
        match &self.state {
            EntryState::Categorized { label } | EntryState::Applied { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.state, EntryState::Applied { .. })
    }

    pub fn is_categorized(&self) -> bool {
        matches!(self.state, EntryState::Categorized { .. })
    }

    pub fn status(&self) -> EntryStatus {
        match self.state {
            EntryState::Pending => EntryStatus::Pending,
            EntryState::Classifying => EntryStatus::Working,
            EntryState::Categorized { .. } | EntryState::Applied { .. } => EntryStatus::Done,
            EntryState::Errored { .. } => EntryStatus::Error,
        }
    }
}
