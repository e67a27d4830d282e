//! Download engine for saving many portal files concurrently with retries.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use politodown::download::{DownloadEngine, RetryPolicy};
//! use politodown::{Credentials, Naming, Portal, PortalOptions, server_filename};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let portal = Portal::new(PortalOptions::default())?;
//! portal.signin(Credentials::new("s123456", "password"), None).await?;
//!
//! let mut files = Vec::new();
//! for material in portal.materials(2023).await? {
//!     for assignment in material.assignments(&portal, false).await? {
//!         files.extend(assignment.files(&portal, true, false).await?);
//!     }
//! }
//!
//! let engine = DownloadEngine::new(4, RetryPolicy::default())?;
//! let naming: Arc<Naming> = Arc::new(server_filename);
//! let stats = engine
//!     .save_all(&portal, files, Path::new("./polito"), naming, false, Arc::new(|_: u64| {}))
//!     .await?;
//! println!("Downloaded: {}, Failed: {}", stats.downloaded, stats.failed);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::error::PortalError;
use crate::portal::{Naming, RemoteFile, SaveOutcome};
use crate::session::Portal;

const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 100;

/// Files saved at once when the user does not choose.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Progress callback receiving the length of every chunk written.
pub type ByteProgress = dyn Fn(u64) + Send + Sync;

/// Failures that stop a whole batch rather than one file.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot save {value} files at once: pick {MIN_CONCURRENCY} to {MAX_CONCURRENCY}")]
    InvalidConcurrency { value: usize },

    /// The permit pool went away while files were still queued.
    #[error("download slots were closed before the batch finished")]
    SemaphoreClosed,
}

/// Totals of a [`DownloadEngine::save_all`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Files written.
    pub downloaded: usize,
    /// Files already present with the same size and modification time.
    pub up_to_date: usize,
    /// Files the naming function skipped.
    pub skipped: usize,
    /// Files that could not be saved.
    pub failed: usize,
    /// Retry attempts made.
    pub retried: usize,
    /// Bytes written by successful downloads.
    pub bytes: u64,
}

impl SaveStats {
    /// Number of files processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.downloaded + self.up_to_date + self.skipped + self.failed
    }
}

/// Counters shared by the spawned save tasks.
#[derive(Debug, Default)]
struct Counters {
    downloaded: AtomicUsize,
    up_to_date: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    bytes: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &SaveOutcome) {
        match outcome {
            SaveOutcome::Downloaded { bytes, .. } => {
                self.downloaded.fetch_add(1, Ordering::SeqCst);
                self.bytes.fetch_add(*bytes, Ordering::SeqCst);
            }
            SaveOutcome::UpToDate { .. } => {
                self.up_to_date.fetch_add(1, Ordering::SeqCst);
            }
            SaveOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SaveStats {
        SaveStats {
            downloaded: self.downloaded.load(Ordering::SeqCst),
            up_to_date: self.up_to_date.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
        }
    }
}

/// Saves batches of [`RemoteFile`]s with bounded concurrency.
///
/// Each file is saved in its own Tokio task once a semaphore permit is
/// available. Transient failures are retried with exponential backoff;
/// permanent failures are logged and counted without stopping the batch.
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
}

impl DownloadEngine {
    /// Creates an engine saving at most `concurrency` files at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(concurrency: usize, retry_policy: RetryPolicy) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Saves every file under `root/<file location>`.
    ///
    /// Individual failures do not make this method fail; they are counted in
    /// the returned [`SaveStats`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, portal, files, naming, on_bytes), fields(root = %root.display(), files = files.len()))]
    pub async fn save_all(
        &self,
        portal: &Portal,
        files: Vec<RemoteFile>,
        root: &Path,
        naming: Arc<Naming>,
        overwrite: bool,
        on_bytes: Arc<ByteProgress>,
    ) -> Result<SaveStats, EngineError> {
        let counters = Arc::new(Counters::default());
        let mut handles = Vec::with_capacity(files.len());

        info!("saving batch");

        for file in files {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let portal = portal.clone();
            let counters = Arc::clone(&counters);
            let dir = root.join(file.location());
            let naming = Arc::clone(&naming);
            let on_bytes = Arc::clone(&on_bytes);
            let retry_policy = self.retry_policy.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                let job = SaveJob {
                    portal: &portal,
                    file: &file,
                    dir: &dir,
                    naming: naming.as_ref(),
                    overwrite,
                    on_bytes: on_bytes.as_ref(),
                };
                match save_with_retry(&job, &retry_policy, &counters).await {
                    Ok(outcome) => {
                        if let SaveOutcome::Downloaded { path, bytes, .. } = &outcome {
                            info!(path = %path.display(), bytes, "file downloaded");
                        }
                        counters.record(&outcome);
                    }
                    Err((error, attempts)) => {
                        warn!(
                            file = %file.name(),
                            url = %file.link(),
                            error = %error,
                            attempts,
                            "save failed after all attempts"
                        );
                        counters.increment_failed();
                    }
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for saves to complete");

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "save task panicked");
                counters.increment_failed();
            }
        }

        let stats = counters.snapshot();
        info!(
            downloaded = stats.downloaded,
            up_to_date = stats.up_to_date,
            skipped = stats.skipped,
            failed = stats.failed,
            retried = stats.retried,
            bytes = stats.bytes,
            "batch save complete"
        );
        Ok(stats)
    }
}

struct SaveJob<'a> {
    portal: &'a Portal,
    file: &'a RemoteFile,
    dir: &'a Path,
    naming: &'a Naming,
    overwrite: bool,
    on_bytes: &'a ByteProgress,
}

/// Byte progress of one file across its attempts.
///
/// A retried download starts again from the first byte; only the part of an
/// attempt that goes past what earlier attempts reached is forwarded.
struct FileProgress<'a> {
    on_bytes: &'a ByteProgress,
    reported: AtomicU64,
    attempt: AtomicU64,
}

impl<'a> FileProgress<'a> {
    fn new(on_bytes: &'a ByteProgress) -> Self {
        Self {
            on_bytes,
            reported: AtomicU64::new(0),
            attempt: AtomicU64::new(0),
        }
    }

    fn start_attempt(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    fn record(&self, len: u64) {
        let total = self.attempt.fetch_add(len, Ordering::SeqCst) + len;
        let previous = self.reported.fetch_max(total, Ordering::SeqCst);
        if total > previous {
            (self.on_bytes)(total - previous);
        }
    }
}

/// Saves one file, retrying transient failures.
///
/// Returns the final error and the number of attempts made on failure.
#[instrument(skip(job, policy, counters), fields(file = %job.file.name()))]
async fn save_with_retry(
    job: &SaveJob<'_>,
    policy: &RetryPolicy,
    counters: &Counters,
) -> Result<SaveOutcome, (PortalError, u32)> {
    tokio::fs::create_dir_all(job.dir)
        .await
        .map_err(|e| (PortalError::io(job.dir, e), 0))?;

    let progress = FileProgress::new(job.on_bytes);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        debug!(attempt, "attempting save");

        progress.start_attempt();
        let on_bytes = |n: u64| progress.record(n);
        let error = match job
            .file
            .save(job.portal, job.dir, job.naming, job.overwrite, &on_bytes)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(error) => error,
        };

        match policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                info!(
                    url = %job.file.link(),
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying save"
                );
                counters.increment_retried();
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp(reason) => {
                debug!(url = %job.file.link(), %reason, "not retrying save");
                return Err((error, attempt));
            }
        }
    }
}
