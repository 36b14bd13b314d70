// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded worker pool draining a shared job queue

use futures_util::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::progress::Progress;
use crate::{Result, SnapsortError};

/// Outcome of one job that a worker started
#[derive(Debug)]
pub struct Completion<J, O> {
    pub job: J,
    pub outcome: Result<O>,
}

/// Fixed-size pool of workers sharing one FIFO queue
pub struct Scheduler {
    concurrency: usize,
    progress: Progress,
}

impl Scheduler {
    pub fn new(concurrency: usize, progress: Progress) -> Self {
        Self {
            concurrency,
            progress,
        }
    }

    /// Number of workers spawned for a batch of `jobs`
    pub fn worker_count(&self, jobs: usize) -> usize {
        self.concurrency.min(jobs).max(1)
    }

    /// Run every job, or stop dequeuing once cancellation is observed.
    ///
    /// Returns one completion per started job, in completion order. Errors and
    /// panics inside `job_fn` are recorded on that job's completion only.
    pub async fn run<J, O, F, Fut>(&self, jobs: Vec<J>, job_fn: F) -> Vec<Completion<J, O>>
    where
        J: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        if jobs.is_empty() {
            return Vec::new();
        }

        let workers = self.worker_count(jobs.len());
        debug!(jobs = jobs.len(), workers, "Starting worker pool");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let job_fn = Arc::new(job_fn);
        let mut join_set = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let job_fn = Arc::clone(&job_fn);
            let progress = self.progress.clone();

            join_set.spawn(async move {
                let mut completions = Vec::new();

                loop {
                    let next = {
                        let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
                        if progress.is_cancelled() {
                            None
                        } else {
                            queue.pop_front()
                        }
                    };
                    let Some(job) = next else {
                        break;
                    };

                    let outcome = match AssertUnwindSafe(job_fn(job.clone())).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(SnapsortError::JobPanicked(panic_message(panic.as_ref()))),
                    };

                    progress.complete_one();
                    completions.push(Completion { job, outcome });
                }

                debug!(worker, finished = completions.len(), "Worker stopped");
                completions
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(completions) => all.extend(completions),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }
        all
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_count_is_clamped() {
        let scheduler = Scheduler::new(5, Progress::new(0));
        assert_eq!(scheduler.worker_count(2), 2);
        assert_eq!(scheduler.worker_count(50), 5);

        let scheduler = Scheduler::new(0, Progress::new(0));
        assert_eq!(scheduler.worker_count(10), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_concurrency() {
        let progress = Progress::new(40);
        let scheduler = Scheduler::new(3, progress.clone());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (in_flight.clone(), peak.clone());
        let completions = scheduler
            .run((0..40).collect(), move |i: usize| {
                let in_flight = f.clone();
                let peak = p.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                }
            })
            .await;

        assert_eq!(completions.len(), 40);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(progress.snapshot().done, 40);

        let mut jobs: Vec<usize> = completions.iter().map(|c| c.job).collect();
        jobs.sort_unstable();
        assert_eq!(jobs, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let progress = Progress::new(6);
        let scheduler = Scheduler::new(2, progress.clone());

        let completions = scheduler
            .run((0..6).collect(), |i: u32| async move {
                match i {
                    1 => Err(SnapsortError::MalformedResponse("boom".into())),
                    4 => panic!("worker exploded on {}", i),
                    _ => Ok(i),
                }
            })
            .await;

        assert_eq!(completions.len(), 6);
        assert_eq!(progress.snapshot().done, 6);

        let failed: Vec<u32> = completions.iter().filter(|c| c.outcome.is_err()).map(|c| c.job).collect();
        assert_eq!(failed.len(), 2);
        let panicked = completions.iter().find(|c| c.job == 4).unwrap();
        match &panicked.outcome {
            Err(SnapsortError::JobPanicked(msg)) => assert!(msg.contains("exploded")),
            other => panic!("expected panic outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_drains_without_new_jobs() {
        let progress = Progress::new(20);
        let scheduler = Scheduler::new(2, progress.clone());
        let started = Arc::new(AtomicUsize::new(0));

        let (s, p) = (started.clone(), progress.clone());
        let completions = scheduler
            .run((0..20).collect(), move |i: usize| {
                let started = s.clone();
                let progress = p.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 3 {
                        progress.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok(())
                }
            })
            .await;

        let started = started.load(Ordering::SeqCst);
        assert!(started < 20);
        assert_eq!(completions.len(), started);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.done, started);
        assert!(snapshot.done <= snapshot.total);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = Scheduler::new(3, Progress::new(0));
        let completions = scheduler.run(Vec::<u8>::new(), |_| async { Ok(()) }).await;
        assert!(completions.is_empty());
    }
}
