// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filesystem access behind a trait so runs and apply can be tested in isolation

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::entry::Entry;
use crate::{Result, SnapsortError};

/// Extensions treated as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Check whether a file name has an image extension
pub fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Image file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub name: String,
    /// '/'-separated path below the scan root
    pub relative_path: String,
    pub size: u64,
}

impl ScannedFile {
    pub fn into_entry(self) -> Entry {
        Entry::new(self.path, self.name, self.relative_path)
    }
}

/// Operations the pipeline needs from a file store
#[async_trait]
pub trait Storage: Send + Sync {
    /// List image files below `root`, skipping any directory named `reserved`
    async fn scan(&self, root: &Path, reserved: &str) -> Result<Vec<ScannedFile>>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    async fn exists(&self, dir: &Path, name: &str) -> Result<bool>;

    /// Create `parent/name` if needed and return its path
    async fn ensure_dir(&self, parent: &Path, name: &str) -> Result<PathBuf>;

    /// Copy `src` to `dest_dir/name`, returning the new path
    async fn copy(&self, src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf>;

    /// Move `src` to `dest_dir/name`, returning the new path
    async fn move_file(&self, src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf>;

    async fn remove(&self, path: &Path) -> Result<()>;
}

/// Local disk storage
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

fn is_reserved(entry: &DirEntry, reserved: &str) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == reserved
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn scan_blocking(root: &Path, reserved: &str) -> Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        return Err(SnapsortError::FileSystem(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", root.display()),
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_reserved(e, reserved));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_image_name(&name) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(ScannedFile {
            relative_path: relative_path(root, entry.path()),
            path: entry.into_path(),
            name,
            size,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Copy `src` to `dest`, removing a partial `dest` this call created if the copy fails
async fn copy_or_clean_up(src: &Path, dest: &Path) -> Result<()> {
    let existed = fs::try_exists(dest).await.unwrap_or(true);
    if let Err(e) = fs::copy(src, dest).await {
        if !existed && fs::try_exists(dest).await.unwrap_or(false) {
            if let Err(cleanup) = fs::remove_file(dest).await {
                warn!("Could not remove partial copy {}: {}", dest.display(), cleanup);
            }
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn scan(&self, root: &Path, reserved: &str) -> Result<Vec<ScannedFile>> {
        let root = root.to_path_buf();
        let reserved = reserved.to_string();

        let files = tokio::task::spawn_blocking(move || scan_blocking(&root, &reserved))
            .await
            .map_err(|e| SnapsortError::JobPanicked(e.to_string()))??;

        debug!(count = files.len(), "Scan complete");
        Ok(files)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    async fn exists(&self, dir: &Path, name: &str) -> Result<bool> {
        Ok(fs::try_exists(dir.join(name)).await?)
    }

    async fn ensure_dir(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let dir = parent.join(name);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn copy(&self, src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf> {
        let dest = dest_dir.join(name);
        copy_or_clean_up(src, &dest).await?;
        Ok(dest)
    }

    async fn move_file(&self, src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf> {
        let dest = dest_dir.join(name);
        if fs::rename(src, &dest).await.is_ok() {
            return Ok(dest);
        }

        // Rename fails across devices; fall back to copy + remove
        copy_or_clean_up(src, &dest).await?;
        if let Err(e) = fs::remove_file(src).await {
            if let Err(cleanup) = fs::remove_file(&dest).await {
                warn!("Could not remove partial copy {}: {}", dest.display(), cleanup);
            }
            return Err(e.into());
        }
        Ok(dest)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path).await?)
    }
}
