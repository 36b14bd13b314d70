// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded result cache mapping cache keys to category labels
//!
//! Eviction drops the oldest-inserted keys first. Lookups never change the
//! order, and overwriting a key keeps its original position.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::entry::CacheKey;
use crate::Result;

/// Upper bound on cached results
pub const MAX_CACHE_SIZE: usize = 10_000;

#[derive(Default)]
struct Inner {
    labels: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

/// Thread-safe cache shared by all pool workers
pub struct ResultCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.lock().labels.get(key).cloned()
    }

    /// Insert a label and evict the oldest entries beyond capacity
    pub fn put(&self, key: CacheKey, label: impl Into<String>) {
        let mut inner = self.lock();
        let label = label.into();

        if let Some(existing) = inner.labels.get_mut(&key) {
            *existing = label;
            return;
        }

        inner.order.push_back(key.clone());
        inner.labels.insert(key, label);

        while inner.labels.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.labels.remove(&oldest);
                    debug!("Evicted cache entry {}", oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.labels.clear();
        inner.order.clear();
    }

    /// Restore a cache from a persisted blob.
    ///
    /// Malformed blobs, or blobs holding more entries than `capacity`, yield an
    /// empty cache. This never fails.
    pub fn load_from(blob: &[u8], capacity: usize) -> Self {
        let cache = Self::with_capacity(capacity);

        let pairs: Vec<(String, String)> = match serde_json::from_slice(blob) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Discarding unreadable result cache: {}", e);
                return cache;
            }
        };

        if pairs.len() > cache.capacity {
            warn!(
                entries = pairs.len(),
                capacity = cache.capacity,
                "Discarding oversized result cache"
            );
            return cache;
        }

        for (key, label) in pairs {
            cache.put(CacheKey::from(key), label);
        }
        debug!("Loaded {} cached results", cache.len());
        cache
    }

    /// Serialize contents in insertion order
    pub fn flush_to(&self) -> Result<Vec<u8>> {
        let inner = self.lock();
        let pairs: Vec<(&str, &str)> = inner
            .order
            .iter()
            .filter_map(|key| inner.labels.get(key).map(|label| (key.as_str(), label.as_str())))
            .collect();
        Ok(serde_json::to_vec(&pairs)?)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
