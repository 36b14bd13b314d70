// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Run progress counters, status events, and cooperative cancellation

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::entry::EntryStatus;

const STATUS_EVENT_CAPACITY: usize = 256;

/// Cooperative stop signal shared by workers and the classifier
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; returns false if it was already requested
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Read-only view of run progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub done: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    /// Completion percentage, rounded; 0 when there is nothing to do
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.done as f64 / self.total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Per-entry status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub path: PathBuf,
    pub status: EntryStatus,
    /// Category or error text once known
    pub detail: Option<String>,
}

struct Shared {
    done: AtomicUsize,
    total: AtomicUsize,
    cancel: CancelFlag,
    snapshots: watch::Sender<ProgressSnapshot>,
    events: broadcast::Sender<StatusEvent>,
}

/// Progress coordinator; clones share the same counters
#[derive(Clone)]
pub struct Progress {
    shared: Arc<Shared>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        let (snapshots, _) = watch::channel(ProgressSnapshot { done: 0, total });
        let (events, _) = broadcast::channel(STATUS_EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                done: AtomicUsize::new(0),
                total: AtomicUsize::new(total),
                cancel: CancelFlag::new(),
                snapshots,
                events,
            }),
        }
    }

    /// Start a new run: zero the counter, fix the total, clear cancellation
    pub fn reset(&self, total: usize) {
        self.shared.done.store(0, Ordering::SeqCst);
        self.shared.total.store(total, Ordering::SeqCst);
        self.shared.cancel.reset();
        self.shared.snapshots.send_replace(ProgressSnapshot { done: 0, total });
    }

    /// Count one finished entry. Never exceeds the total.
    pub fn complete_one(&self) -> ProgressSnapshot {
        let total = self.shared.total.load(Ordering::SeqCst);
        let done = match self.shared.done.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
            (d < total).then_some(d + 1)
        }) {
            Ok(previous) => previous + 1,
            Err(current) => current,
        };

        let snapshot = ProgressSnapshot { done, total };
        self.shared.snapshots.send_replace(snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            done: self.shared.done.load(Ordering::SeqCst),
            total: self.shared.total.load(Ordering::SeqCst),
        }
    }

    /// Latest snapshot, updated on every completion
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Stream of per-entry status transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    pub fn emit(&self, path: PathBuf, status: EntryStatus, detail: Option<String>) {
        // No subscribers is fine
        let _ = self.shared.events.send(StatusEvent { path, status, detail });
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.shared.cancel.clone()
    }

    pub fn cancel(&self) {
        if self.shared.cancel.cancel() {
            info!("Cancellation requested; finishing in-flight jobs");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(ProgressSnapshot { done: 0, total: 0 }.percent(), 0);
        assert_eq!(ProgressSnapshot { done: 1, total: 3 }.percent(), 33);
        assert_eq!(ProgressSnapshot { done: 3, total: 3 }.percent(), 100);
    }

    #[test]
    fn test_done_never_exceeds_total() {
        let progress = Progress::new(2);
        progress.complete_one();
        progress.complete_one();
        let snapshot = progress.complete_one();
        assert_eq!(snapshot, ProgressSnapshot { done: 2, total: 2 });
    }

    #[test]
    fn test_cancel_is_sticky_until_reset() {
        let progress = Progress::new(5);
        let flag = progress.cancel_flag();
        assert!(!flag.is_cancelled());

        progress.cancel();
        progress.cancel();
        assert!(flag.is_cancelled());
        assert!(progress.is_cancelled());
        assert!(!flag.cancel(), "second cancel reports already set");

        progress.complete_one();
        progress.reset(3);
        assert!(!flag.is_cancelled());
        assert_eq!(progress.snapshot(), ProgressSnapshot { done: 0, total: 3 });
    }

    #[tokio::test]
    async fn test_watch_and_events() {
        let progress = Progress::new(1);
        let mut rx = progress.watch();
        let mut events = progress.subscribe();

        progress.emit(PathBuf::from("/a.jpg"), EntryStatus::Working, None);
        progress.complete_one();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().done, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.status, EntryStatus::Working);
        assert_eq!(event.path, PathBuf::from("/a.jpg"));
    }
}
