//! Reconciliation framework and bounded worker pool
//!
//! A job computes its pending set once (registry items minus existing derived
//! records) and hands each item to exactly one worker task. At most `width`
//! tasks run at a time. Each task runs on its own tokio task, so an error or
//! panic in one item is recorded and never affects its siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use scout_common::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// What a worker did with its item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Derived record written
    Completed,
    /// Record already existed at the re-check; no work done
    AlreadyDone,
}

#[async_trait]
pub trait ReconcileJob: Send + Sync + 'static {
    type Item: Send + 'static;

    fn name(&self) -> &'static str;

    /// Items lacking a derived record, in processing order
    async fn pending(&self) -> Result<Vec<Self::Item>>;

    /// Key used in logs and the failure list
    fn item_key(&self, item: &Self::Item) -> String;

    /// Produce the derived record for one item
    ///
    /// Implementations re-check for an existing record before any expensive
    /// call; another run may have filled it in since `pending` was computed.
    async fn process(&self, item: Self::Item) -> Result<TaskOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub key: String,
    pub message: String,
}

/// Job summary (printed as the JSON summary line)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: String,
    pub status: String,
    pub pending: usize,
    /// Worker tasks started; always equal to `pending`
    pub spawned: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<TaskFailure>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl JobReport {
    /// 0 when every item succeeded or was skipped, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }
}

/// Run one job to completion with at most `width` concurrent workers
///
/// `Err` only when the pending set cannot be computed; per-item failures are
/// collected in the report.
pub async fn run_job<J: ReconcileJob>(job: Arc<J>, width: usize) -> Result<JobReport> {
    let started_at = Utc::now();
    let width = width.max(1);

    let pending = job.pending().await?;
    let pending_count = pending.len();
    info!(
        job = job.name(),
        pending = pending_count,
        workers = width,
        "Pending set computed"
    );

    let results: Vec<(String, std::result::Result<TaskOutcome, String>)> = stream::iter(pending)
        .map(|item| {
            let job = job.clone();
            let key = job.item_key(&item);
            async move {
                let worker = tokio::spawn(async move { job.process(item).await });
                let result = match worker.await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("worker task aborted: {}", e)),
                };
                (key, result)
            }
        })
        .buffer_unordered(width)
        .collect()
        .await;

    let mut report = JobReport {
        job: job.name().to_string(),
        status: String::new(),
        pending: pending_count,
        spawned: results.len(),
        succeeded: 0,
        skipped: 0,
        failed: 0,
        failures: Vec::new(),
        started_at,
        ended_at: started_at,
    };

    for (key, result) in results {
        match result {
            Ok(TaskOutcome::Completed) => report.succeeded += 1,
            Ok(TaskOutcome::AlreadyDone) => report.skipped += 1,
            Err(message) => {
                warn!(job = job.name(), item = %key, error = %message, "Worker failed");
                report.failed += 1;
                report.failures.push(TaskFailure { key, message });
            }
        }
    }

    report.status = if report.failed == 0 {
        "completed"
    } else {
        "completed_with_errors"
    }
    .to_string();
    report.ended_at = Utc::now();

    info!(
        job = job.name(),
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        "Job finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_common::Error;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Items 0..total; `done` already have records, `broken` fail, `panics` panic
    struct CountingJob {
        total: usize,
        done: HashSet<usize>,
        broken: HashSet<usize>,
        panics: HashSet<usize>,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<usize>>,
    }

    impl CountingJob {
        fn new(total: usize) -> Self {
            Self {
                total,
                done: HashSet::new(),
                broken: HashSet::new(),
                panics: HashSet::new(),
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReconcileJob for CountingJob {
        type Item = usize;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn pending(&self) -> Result<Vec<usize>> {
            Ok((0..self.total).filter(|i| !self.done.contains(i)).collect())
        }

        fn item_key(&self, item: &usize) -> String {
            format!("item-{}", item)
        }

        async fn process(&self, item: usize) -> Result<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(item);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(&item) {
                panic!("worker blew up on {}", item);
            }
            if self.broken.contains(&item) {
                return Err(Error::Http { status: Some(500), message: format!("item {} failed", item) });
            }
            Ok(TaskOutcome::Completed)
        }
    }

    #[tokio::test]
    async fn test_one_task_per_pending_item() {
        let mut job = CountingJob::new(100);
        job.done = (0..97).collect();
        let job = Arc::new(job);

        let report = run_job(job.clone(), 8).await.unwrap();

        assert_eq!(report.pending, 3);
        assert_eq!(report.spawned, 3);
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
        let mut seen = job.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![97, 98, 99]);
        assert_eq!(report.status, "completed");
    }

    #[tokio::test]
    async fn test_width_bounds_concurrency() {
        let job = Arc::new(CountingJob::new(20));

        let report = run_job(job.clone(), 4).await.unwrap();

        assert_eq!(report.succeeded, 20);
        assert!(job.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut job = CountingJob::new(10);
        job.broken = [2, 5].into_iter().collect();
        job.panics = [7].into_iter().collect();
        let job = Arc::new(job);

        let report = run_job(job.clone(), 3).await.unwrap();

        assert_eq!(report.spawned, 10);
        assert_eq!(report.succeeded, 7);
        assert_eq!(report.failed, 3);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.status, "completed_with_errors");

        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.key.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["item-2", "item-5", "item-7"]);
        assert!(report
            .failures
            .iter()
            .any(|f| f.key == "item-7" && f.message.contains("aborted")));
    }

    #[tokio::test]
    async fn test_empty_pending_set() {
        let job = Arc::new(CountingJob::new(0));
        let report = run_job(job.clone(), 8).await.unwrap();
        assert_eq!(report.spawned, 0);
        assert_eq!(report.exit_code(), 0);
    }
}
