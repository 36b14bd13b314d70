// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Collision-free destination names

use chrono::Utc;
use std::path::Path;
use tracing::warn;

use crate::entry::FALLBACK_CATEGORY;
use crate::storage::Storage;
use crate::Result;

/// Names probed before falling back to a timestamp suffix
pub const MAX_NAME_PROBES: u32 = 999;

/// Split a file name into stem and extension (with its dot).
///
/// A leading dot does not start an extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Pick a name in `dir` that no existing file uses.
///
/// Tries `name`, then `stem-1.ext`, `stem-2.ext` and so on. When every probe
/// is taken the stem gets a nanosecond timestamp instead.
pub async fn unique_name(storage: &dyn Storage, dir: &Path, name: &str) -> Result<String> {
    if !storage.exists(dir, name).await? {
        return Ok(name.to_string());
    }

    let (stem, ext) = split_name(name);
    for i in 1..MAX_NAME_PROBES {
        let candidate = format!("{}-{}{}", stem, i, ext);
        if !storage.exists(dir, &candidate).await? {
            return Ok(candidate);
        }
    }

    let stamped = format!("{}-{}{}", stem, Utc::now().format("%Y%m%d%H%M%S%9f"), ext);
    warn!(dir = %dir.display(), name, "All numbered names taken, using {}", stamped);
    Ok(stamped)
}

/// Make a category label safe to use as one directory name
pub fn sanitize_dir_name(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => FALLBACK_CATEGORY.to_string(),
        _ => cleaned,
    }
}
