//! Batch runner: chunked, bounded-concurrency execution with per-item outcomes.
//!
//! Items are processed in sequential chunks of at most `batch_size`. Every
//! item inside a chunk runs concurrently on a rayon pool, and the next chunk
//! starts only once every item of the current one has settled. One item's
//! failure (or panic) is recorded against that item and never stops its
//! siblings or later chunks.

use serde::Serialize;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of items processed concurrently per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Stable failure category, suitable for reports and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// A mapping row named a file that was not supplied.
    Missing,
    /// The input's media type is not accepted by the tool.
    Unsupported,
    Decode,
    Encode,
    Fetch,
    Write,
    /// Anything else, including panics inside the item's pipeline.
    Unexpected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Missing => "missing",
            FailureKind::Unsupported => "unsupported",
            FailureKind::Decode => "decode",
            FailureKind::Encode => "encode",
            FailureKind::Fetch => "fetch",
            FailureKind::Write => "write",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single item failed, before it is attributed to that item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// A failed item together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{item}: {kind}: {detail}")]
pub struct ItemFailure {
    pub item: String,
    pub kind: FailureKind,
    pub detail: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, failure: Failure) -> Self {
        Self {
            item: item.into(),
            kind: failure.kind,
            detail: failure.detail,
        }
    }

    /// Short reason string: `kind: detail`.
    pub fn reason(&self) -> String {
        format!("{}: {}", self.kind, self.detail)
    }
}

/// Outcome of one item.
pub type ItemOutcome<T> = Result<T, ItemFailure>;

/// One unit of work for the runner.
#[derive(Debug, Clone)]
pub struct Job<T> {
    /// Identifier used in progress reports and failure lists.
    pub label: String,
    pub input: T,
}

impl<T> Job<T> {
    pub fn new(label: impl Into<String>, input: T) -> Self {
        Self {
            label: label.into(),
            input,
        }
    }
}

/// Incremental progress, reported after every item settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress<'a> {
    /// Items settled so far, including this one.
    pub processed: usize,
    pub total: usize,
    pub item: &'a str,
    pub succeeded: bool,
}

/// Final status of a batch that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    AllSucceeded,
    CompletedWithErrors,
}

/// All outcomes of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<ItemOutcome<T>>,
    pub duration: Duration,
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }

    pub fn status(&self) -> BatchStatus {
        if self.outcomes.iter().all(|o| o.is_ok()) {
            BatchStatus::AllSucceeded
        } else {
            BatchStatus::CompletedWithErrors
        }
    }

    /// Failures in input order.
    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    /// Successful outputs in input order.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    /// Transform successful outputs in input order, keeping failures as-is.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BatchReport<U> {
        BatchReport {
            outcomes: self
                .outcomes
                .into_iter()
                .map(|outcome| outcome.map(&mut f))
                .collect(),
            duration: self.duration,
        }
    }

    /// Serializable summary without the per-item payloads.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            status: self.status(),
            total: self.total(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            duration_ms: self.duration.as_millis() as u64,
            failures: self.failures().cloned().collect(),
        }
    }
}

/// JSON-friendly view of a [`BatchReport`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub status: BatchStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub failures: Vec<ItemFailure>,
}

/// Runs jobs in fixed-size chunks with a hard barrier between chunks.
pub struct BatchRunner {
    batch_size: usize,
    pool: Option<rayon::ThreadPool>,
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("batch_size", &self.batch_size)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchRunner {
    /// Create a runner. A batch size of zero is treated as one.
    ///
    /// The pool has one thread per chunk slot so I/O-bound items in a chunk
    /// overlap. If the pool cannot be built, the global rayon pool is used.
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batch_size)
            .thread_name(|i| format!("bulkimg-worker-{i}"))
            .build()
            .map_err(|e| warn!(error = %e, "falling back to the global thread pool"))
            .ok();

        Self { batch_size, pool }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run every job to completion.
    ///
    /// `op` produces the item's output or a [`Failure`]. `on_progress` is
    /// called once per item, serialized, with a strictly increasing
    /// `processed` count.
    pub fn run<T, R, F, P>(&self, jobs: Vec<Job<T>>, op: F, on_progress: P) -> BatchReport<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, Failure> + Sync,
        P: Fn(Progress<'_>) + Sync,
    {
        use rayon::prelude::*;

        let start = Instant::now();
        let total = jobs.len();
        let processed = Mutex::new(0usize);
        let mut outcomes = Vec::with_capacity(total);

        info!(total, batch_size = self.batch_size, "starting batch");

        let run_one = |job: Job<T>| -> ItemOutcome<R> {
            let Job { label, input } = job;
            debug!(item = %label, "processing");

            let outcome = match catch_unwind(AssertUnwindSafe(|| op(input))) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(failure)) => Err(ItemFailure::new(&label, failure)),
                Err(panic) => Err(ItemFailure::new(
                    &label,
                    Failure::new(FailureKind::Unexpected, panic_message(panic.as_ref())),
                )),
            };

            if let Err(ref failure) = outcome {
                warn!(item = %label, kind = %failure.kind, detail = %failure.detail, "item failed");
            }

            let mut count = processed.lock().unwrap_or_else(|e| e.into_inner());
            *count += 1;
            on_progress(Progress {
                processed: *count,
                total,
                item: &label,
                succeeded: outcome.is_ok(),
            });

            outcome
        };

        let mut remaining = jobs.into_iter();
        let mut chunk_index = 0usize;
        loop {
            let chunk: Vec<Job<T>> = remaining.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            debug!(chunk = chunk_index, size = chunk.len(), "starting chunk");

            let settled: Vec<ItemOutcome<R>> = match self.pool {
                Some(ref pool) => pool.install(|| chunk.into_par_iter().map(&run_one).collect()),
                None => chunk.into_par_iter().map(&run_one).collect(),
            };
            outcomes.extend(settled);
            chunk_index += 1;
        }

        let report = BatchReport {
            outcomes,
            duration: start.elapsed(),
        };
        info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
