// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Debounced persistence of the result cache
//!
//! One background task owns the store and the quiet-period timer. Writers only
//! nudge it through a channel, so two flushes can never overlap on the slot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::ResultCache;
use crate::{Result, SnapsortError};

/// Default quiet period before a scheduled flush runs
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Durable single-slot storage for the serialized cache
pub trait CacheStore: Send + Sync {
    /// Read the stored blob, if any
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob
    fn save(&self, blob: &[u8]) -> Result<()>;
}

/// Load the cache from a store; any failure starts from an empty cache
pub fn load_cache(store: &dyn CacheStore, capacity: usize) -> ResultCache {
    match store.load() {
        Ok(Some(blob)) => ResultCache::load_from(&blob, capacity),
        Ok(None) => {
            debug!("No persisted result cache");
            ResultCache::with_capacity(capacity)
        }
        Err(e) => {
            warn!("Failed to read result cache, starting empty: {}", e);
            ResultCache::with_capacity(capacity)
        }
    }
}

enum Command {
    Touch,
    FlushNow(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

fn touch(tx: &mpsc::UnboundedSender<Command>) {
    if tx.send(Command::Touch).is_err() {
        warn!("Flush task is gone; scheduled flush dropped");
    }
}

/// Schedule-only handle to the flush task
#[derive(Clone)]
pub struct FlushHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl FlushHandle {
    /// Restart the quiet-period timer
    pub fn schedule(&self) {
        touch(&self.tx);
    }
}

/// Owner of the flush task
pub struct FlushScheduler {
    tx: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawn the flush task on the current runtime
    pub fn spawn(cache: Arc<ResultCache>, store: Arc<dyn CacheStore>, quiet: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_flusher(cache, store, quiet, rx));
        Self {
            tx,
            task: Some(task),
        }
    }

    /// Restart the quiet-period timer
    pub fn schedule(&self) {
        touch(&self.tx);
    }

    /// Cloneable handle for tasks that only need to schedule flushes
    pub fn handle(&self) -> FlushHandle {
        FlushHandle {
            tx: self.tx.clone(),
        }
    }

    /// Flush immediately and cancel any pending timer
    pub async fn flush_now(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Command::FlushNow(reply))
            .map_err(|_| SnapsortError::Config("Flush task is not running".to_string()))?;
        done.await
            .map_err(|_| SnapsortError::Config("Flush task stopped before replying".to_string()))?
    }

    /// Final synchronous flush; stops the task
    pub async fn finish(mut self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(reply))
            .map_err(|_| SnapsortError::Config("Flush task is not running".to_string()))?;
        let result = done
            .await
            .map_err(|_| SnapsortError::Config("Flush task stopped before replying".to_string()))?;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Flush task ended abnormally: {}", e);
            }
        }
        result
    }
}

fn flush(cache: &ResultCache, store: &dyn CacheStore) -> Result<()> {
    let blob = cache.flush_to()?;
    store.save(&blob)?;
    debug!(entries = cache.len(), bytes = blob.len(), "Flushed result cache");
    Ok(())
}

async fn run_flusher(
    cache: Arc<ResultCache>,
    store: Arc<dyn CacheStore>,
    quiet: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Touch) => {
                    deadline = Some(Instant::now() + quiet);
                }
                Some(Command::FlushNow(reply)) => {
                    deadline = None;
                    let _ = reply.send(flush(&cache, store.as_ref()));
                }
                Some(Command::Shutdown(reply)) => {
                    let _ = reply.send(flush(&cache, store.as_ref()));
                    break;
                }
                None => {
                    // Handle dropped without finish()
                    if let Err(e) = flush(&cache, store.as_ref()) {
                        warn!("Final cache flush failed: {}", e);
                    }
                    break;
                }
            },
            _ = timer => {
                deadline = None;
                if let Err(e) = flush(&cache, store.as_ref()) {
                    warn!("Scheduled cache flush failed: {}", e);
                }
            }
        }
    }

    debug!("Flush task stopped with {} cached results", cache.len());
}
