// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! One sorting session over a root directory
//!
//! A session owns the entries, the result cache with its flush task, and the
//! progress coordinator. Runs classify entries through the worker pool;
//! apply places the results on disk.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::apply::{ApplyAction, ApplyEngine, ApplyReport};
use crate::cache::{ResultCache, MAX_CACHE_SIZE};
use crate::classifier::Classifier;
use crate::entry::{ClassificationMode, Entry, EntryState, EntryStatus};
use crate::history::History;
use crate::imaging::{self, DEFAULT_MAX_DIMENSION};
use crate::persist::{load_cache, CacheStore, FlushHandle, FlushScheduler, DEFAULT_FLUSH_DEBOUNCE};
use crate::progress::{CancelFlag, Progress};
use crate::scheduler::Scheduler;
use crate::storage::{ScannedFile, Storage};
use crate::{Result, SnapsortError};

/// Name of the output folder created under the scanned root
pub const DEFAULT_OUTPUT_FOLDER: &str = "OrganizedImages";

/// Fixed settings for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub output_folder: String,
    pub flush_debounce: Duration,
    pub cache_capacity: usize,
    /// Journal for apply operations
    pub history: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            output_folder: DEFAULT_OUTPUT_FOLDER.to_string(),
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            cache_capacity: MAX_CACHE_SIZE,
            history: None,
        }
    }
}

/// Per-run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub mode: ClassificationMode,
    pub max_image_dimension: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            mode: ClassificationMode::Auto,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Counts for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub queued: usize,
    pub categorized: usize,
    pub cache_hits: usize,
    pub errored: usize,
    /// Started but stopped by cancellation
    pub cancelled: usize,
    /// Never dequeued because the run was cancelled
    pub not_started: usize,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Job {
    index: usize,
    entry: Entry,
}

enum JobOutcome {
    Categorized { label: String, from_cache: bool },
    Cancelled,
    Failed(String),
}

/// Shared state handed to every worker
struct JobContext {
    storage: Arc<dyn Storage>,
    classifier: Arc<dyn Classifier>,
    cache: Arc<ResultCache>,
    flush: FlushHandle,
    progress: Progress,
    /// Indexes of entries that missed the cache and went to the classifier
    classifying: mpsc::UnboundedSender<usize>,
    mode: ClassificationMode,
    max_dimension: u32,
}

impl JobContext {
    async fn run_job(&self, job: Job) -> Result<JobOutcome> {
        let path = job.entry.path.clone();
        self.progress.emit(path.clone(), EntryStatus::Working, None);

        match self.categorize(job.index, &job.entry).await {
            Ok((label, from_cache)) => {
                self.progress.emit(path, EntryStatus::Done, Some(label.clone()));
                Ok(JobOutcome::Categorized { label, from_cache })
            }
            Err(e) if e.is_cancelled() => {
                self.progress.emit(path, EntryStatus::Pending, None);
                Ok(JobOutcome::Cancelled)
            }
            Err(e) => {
                warn!("Failed to categorize {}: {}", path.display(), e);
                let reason = e.to_string();
                self.progress.emit(path, EntryStatus::Error, Some(reason.clone()));
                Ok(JobOutcome::Failed(reason))
            }
        }
    }

    async fn categorize(&self, index: usize, entry: &Entry) -> Result<(String, bool)> {
        let key = entry.cache_key(&self.mode);
        if let Some(label) = self.cache.get(&key) {
            debug!("Cache hit for {}", entry.relative_path);
            return Ok((label, true));
        }
        // The session may have stopped listening; the final state still lands
        let _ = self.classifying.send(index);

        let data = self.storage.read(&entry.path).await?;
        let name = entry.name.clone();
        let max_dimension = self.max_dimension;
        let payload = tokio::task::spawn_blocking(move || imaging::prepare(data, &name, max_dimension))
            .await
            .map_err(|e| SnapsortError::JobPanicked(e.to_string()))??;

        let label = self
            .classifier
            .classify(&payload, &self.mode, &self.progress.cancel_flag())
            .await?;

        self.cache.put(key, label.clone());
        self.flush.schedule();
        Ok((label, false))
    }
}

/// Sorting session rooted at one directory.
///
/// Must be created inside a tokio runtime; it spawns the cache flush task.
pub struct Session {
    root: PathBuf,
    settings: SessionSettings,
    storage: Arc<dyn Storage>,
    classifier: Arc<dyn Classifier>,
    cache: Arc<ResultCache>,
    flusher: FlushScheduler,
    progress: Progress,
    entries: Vec<Entry>,
}

impl Session {
    pub fn new(
        root: PathBuf,
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn CacheStore>,
        settings: SessionSettings,
    ) -> Self {
        let cache = Arc::new(load_cache(store.as_ref(), settings.cache_capacity));
        info!("Loaded {} cached results", cache.len());
        let flusher = FlushScheduler::spawn(Arc::clone(&cache), store, settings.flush_debounce);

        Self {
            root,
            settings,
            storage,
            classifier,
            cache,
            flusher,
            progress: Progress::default(),
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join(&self.settings.output_folder)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Progress handle; clone it to watch or cancel from another task
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Replace the entry set with the images currently under the root
    pub async fn scan(&mut self) -> Result<usize> {
        let files = self
            .storage
            .scan(&self.root, &self.settings.output_folder)
            .await?;
        self.entries = files.into_iter().map(ScannedFile::into_entry).collect();
        info!("Found {} images in {}", self.entries.len(), self.root.display());
        Ok(self.entries.len())
    }

    /// Categorize every entry not yet applied.
    ///
    /// Entries sent to the classifier are `Classifying` until their job ends.
    /// Cancellation stops new entries from starting; entries that were never
    /// started or were stopped mid-way stay `Pending`.
    pub async fn run(&mut self, options: &RunOptions) -> RunSummary {
        let jobs: Vec<Job> = self
            .entries
            .iter_mut()
            .enumerate()
            .filter(|(_, entry)| !entry.is_applied())
            .map(|(index, entry)| {
                entry.state = EntryState::Pending;
                Job {
                    index,
                    entry: entry.clone(),
                }
            })
            .collect();

        let mut summary = RunSummary {
            queued: jobs.len(),
            ..Default::default()
        };
        self.progress.reset(jobs.len());
        if jobs.is_empty() {
            return summary;
        }

        info!(
            entries = jobs.len(),
            concurrency = options.concurrency,
            mode = %options.mode.descriptor(),
            "Starting categorization"
        );

        let (classifying_tx, mut classifying_rx) = mpsc::unbounded_channel();
        let context = Arc::new(JobContext {
            storage: Arc::clone(&self.storage),
            classifier: Arc::clone(&self.classifier),
            cache: Arc::clone(&self.cache),
            flush: self.flusher.handle(),
            progress: self.progress.clone(),
            classifying: classifying_tx,
            mode: options.mode.clone(),
            max_dimension: options.max_image_dimension,
        });

        let scheduler = Scheduler::new(options.concurrency, self.progress.clone());
        let pool = scheduler.run(jobs, move |job| {
            let context = Arc::clone(&context);
            async move { context.run_job(job).await }
        });
        tokio::pin!(pool);

        let completions = loop {
            tokio::select! {
                completions = &mut pool => break completions,
                Some(index) = classifying_rx.recv() => {
                    if let Some(entry) = self.entries.get_mut(index) {
                        entry.state = EntryState::Classifying;
                    }
                }
            }
        };

        summary.not_started = summary.queued - completions.len();

        for completion in completions {
            let Some(entry) = self.entries.get_mut(completion.job.index) else {
                continue;
            };

            match completion.outcome {
                Ok(JobOutcome::Categorized { label, from_cache }) => {
                    summary.categorized += 1;
                    if from_cache {
                        summary.cache_hits += 1;
                    }
                    *summary.categories.entry(label.clone()).or_default() += 1;
                    entry.state = EntryState::Categorized { label };
                }
                Ok(JobOutcome::Cancelled) => {
                    summary.cancelled += 1;
                    entry.state = EntryState::Pending;
                }
                Ok(JobOutcome::Failed(reason)) => {
                    summary.errored += 1;
                    entry.state = EntryState::Errored { reason };
                }
                Err(e) => {
                    warn!("Worker failed on {}: {}", entry.path.display(), e);
                    summary.errored += 1;
                    let reason = e.to_string();
                    self.progress
                        .emit(entry.path.clone(), EntryStatus::Error, Some(reason.clone()));
                    entry.state = EntryState::Errored { reason };
                }
            }
        }

        if let Err(e) = self.flusher.flush_now().await {
            warn!("Failed to persist result cache: {}", e);
        }

        info!(
            categorized = summary.categorized,
            cache_hits = summary.cache_hits,
            errored = summary.errored,
            cancelled = summary.cancelled + summary.not_started,
            "Categorization finished"
        );
        summary
    }

    /// Place categorized entries under the output folder
    pub async fn apply(&mut self, action: ApplyAction) -> ApplyReport {
        self.apply_until(action, &CancelFlag::new()).await
    }

    /// Place categorized entries, stopping before the next file once `cancel` is set
    pub async fn apply_until(&mut self, action: ApplyAction, cancel: &CancelFlag) -> ApplyReport {
        let mut engine = ApplyEngine::new(Arc::clone(&self.storage), self.output_root());
        if let Some(path) = &self.settings.history {
            engine = engine.with_history(History::new(path.clone()));
        }
        engine.apply_until(&mut self.entries, action, cancel).await
    }

    /// Final cache flush; stops the flush task
    pub async fn close(self) -> Result<()> {
        self.flusher.finish().await
    }
}
