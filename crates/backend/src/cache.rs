//! Background mirroring of HTTP resources to local disk
//!
//! Jobs go through a bounded queue consumed by a fixed pool of workers.
//! Ownership of a destination is claimed with a staging file next to it
//! (`_<name>`), so two jobs for the same target never write concurrently,
//! even across restarts. A stale staging file is treated as abandoned.
//!
//! The resource is fetched with parallel range requests streaming straight
//! into the staging file, which is renamed into place only once every byte
//! has arrived.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::fs::{self, OpenOptions};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::file::{refresh_marker_path, staging_path};
use crate::http::HttpSource;
use crate::human;
use crate::source::ContentSource;

/// Bounds for the number of cache workers
pub const WORKERS_RANGE: (usize, usize) = (1, 32);
/// Jobs the queue holds per worker
pub const QUEUE_DEPTH_PER_WORKER: usize = 8;

/// Request to mirror `remote` to `local`
#[derive(Debug, Clone)]
pub struct CacheJob {
    /// Who asked for it (`tftp`, `http`)
    pub trigger: String,
    /// Origin URL
    pub remote: String,
    /// Final path on disk
    pub local: String,
    /// Extra request headers for the origin
    pub headers: HeaderMap,
    /// Base start delay, jittered by ±10%
    pub delay: Duration,
    /// Upper bound on parallel range requests
    pub concurrency: usize,
    /// Refresh marker to write next to the mirror, 0 for none
    pub refresh: u64,
}

impl CacheJob {
    /// Trim fields and reject jobs missing a trigger, remote or local path
    fn normalized(mut self) -> Option<Self> {
        self.trigger = self.trigger.trim().to_string();
        self.remote = self.remote.trim().to_string();
        self.local = self.local.trim().to_string();
        if self.trigger.is_empty() || self.remote.is_empty() || self.local.is_empty() {
            return None;
        }
        self.concurrency = self.concurrency.max(1);
        Some(self)
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Mirror written and renamed into place
    Completed { size: u64 },
    /// Missing trigger, remote or local path
    Invalid,
    /// Another job owns the destination
    InProgress,
    /// Origin size check failed; nothing was written
    SizeCheckFailed,
    /// Origin reports an empty resource; nothing was written
    Empty,
    /// Local filesystem error before the transfer started
    Failed,
    /// Chunks delivered fewer bytes than announced; staging file discarded
    Incomplete { size: u64, received: u64 },
}

/// Tunables of the cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub workers: usize,
    /// Unit used to decide how many chunks a file is split into
    pub block_size: u64,
    /// Age after which a staging file is considered abandoned
    pub staleness: Duration,
    pub size_timeout: Duration,
    pub chunk_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: WORKERS_RANGE.1,
            block_size: 4 << 20,
            staleness: Duration::from_secs(300),
            size_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(3600),
        }
    }
}

/// Producer side of the job queue
#[derive(Debug, Clone)]
pub struct CacheQueue {
    sender: mpsc::Sender<CacheJob>,
}

impl CacheQueue {
    /// Create a queue and hand back its consumer end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CacheJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a job without waiting; returns false if it was dropped
    pub fn queue(&self, job: CacheJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!(scope = "cache", remote = %job.remote, "Queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(scope = "cache", remote = %job.remote, "Queue closed, dropping job");
                false
            }
        }
    }
}

/// Split `[0, size)` into chunks of `(offset, length)`.
///
/// At most `concurrency` chunks and no more than one per `block_size`
/// bytes; always at least one. The last chunk absorbs the remainder.
pub fn partition(size: u64, concurrency: usize, block_size: u64) -> Vec<(u64, u64)> {
    let count = (concurrency as u64).min(size / block_size.max(1)).max(1);
    let chunk = size / count;
    (0..count)
        .map(|i| {
            let offset = i * chunk;
            let length = if i == count - 1 { size - offset } else { chunk };
            (offset, length)
        })
        .collect()
}

/// Randomize `delay` by ±10%
fn jitter(delay: Duration) -> Duration {
    let spread = (delay / 5).as_millis() as u64;
    if spread == 0 {
        return delay;
    }
    let offset = rand::rng().random_range(0..=spread);
    (delay + delay / 10).saturating_sub(Duration::from_millis(offset))
}

/// Whether a staging file exists and is younger than `staleness`
async fn claimed(staging: &Path, staleness: Duration) -> Option<bool> {
    let meta = fs::metadata(staging).await.ok()?;
    let fresh = meta
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age < staleness)
        .unwrap_or(true);
    Some(fresh)
}

/// Mirroring worker pool
#[derive(Debug, Clone)]
pub struct CacheEngine {
    config: CacheConfig,
    client: Client,
}

impl CacheEngine {
    pub fn new(config: CacheConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Spawn the worker pool and return the queue feeding it.
    ///
    /// Workers exit once every `CacheQueue` clone has been dropped.
    pub fn start(self) -> CacheQueue {
        let workers = self.config.workers.clamp(WORKERS_RANGE.0, WORKERS_RANGE.1);
        let (queue, receiver) = CacheQueue::channel(workers * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(Mutex::new(receiver));
        let engine = Arc::new(self);

        for worker in 0..workers {
            let receiver = receiver.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    let outcome = engine.run_job(job).await;
                    debug!(scope = "cache", worker, ?outcome, "Job finished");
                }
            });
        }
        info!(scope = "cache", event = "start", workers, "Cache workers started");
        queue
    }

    /// Run one job to completion
    pub async fn run_job(&self, job: CacheJob) -> JobOutcome {
        let Some(job) = job.normalized() else {
            warn!(scope = "cache", "Discarding invalid cache job");
            return JobOutcome::Invalid;
        };
        let local = PathBuf::from(&job.local);
        let staging = staging_path(&local);

        match claimed(&staging, self.config.staleness).await {
            Some(true) => {
                debug!(scope = "cache", local = %job.local, "Mirror already in progress");
                return JobOutcome::InProgress;
            }
            Some(false) => {
                debug!(scope = "cache", staging = %staging.display(), "Removing abandoned staging file");
                let _ = fs::remove_file(&staging).await;
            }
            None => {}
        }

        if !job.delay.is_zero() {
            tokio::time::sleep(jitter(job.delay)).await;
            if claimed(&staging, self.config.staleness).await.is_some() {
                debug!(scope = "cache", local = %job.local, "Mirror started by another worker");
                return JobOutcome::InProgress;
            }
        }

        if let Some(parent) = local.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            warn!(scope = "cache", event = "error", local = %job.local, error = %e, "Cannot create destination directory");
            return JobOutcome::Failed;
        }

        let sizing = HttpSource::new(
            self.client.clone(),
            &job.remote,
            job.headers.clone(),
            self.config.size_timeout,
        );
        let size = match sizing.read(0, 1).await {
            Ok(content) if content.total > 0 => content.total,
            Ok(_) => {
                debug!(scope = "cache", remote = %job.remote, "Origin resource is empty");
                return JobOutcome::Empty;
            }
            Err(e) => {
                warn!(scope = "cache", event = "error", remote = %job.remote, error = %e, "Origin size check failed");
                return JobOutcome::SizeCheckFailed;
            }
        };

        // Creating the staging file exclusively is what claims the target
        let file = match OpenOptions::new().write(true).create_new(true).open(&staging).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return JobOutcome::InProgress,
            Err(e) => {
                warn!(scope = "cache", event = "error", staging = %staging.display(), error = %e, "Cannot create staging file");
                return JobOutcome::Failed;
            }
        };
        drop(file);

        let chunks = partition(size, job.concurrency, self.config.block_size);
        info!(
            scope = "cache",
            event = "start",
            trigger = %job.trigger,
            remote = %job.remote,
            local = %job.local,
            size,
            chunks = chunks.len(),
            "Mirroring"
        );

        let start = Instant::now();
        let source = sizing.with_timeout(self.config.chunk_timeout);
        let handles = chunks.into_iter().map(|(offset, length)| {
            let source = source.clone();
            let staging = staging.clone();
            tokio::spawn(async move { fetch_chunk(&source, &staging, offset, length).await })
        });
        let received: u64 = join_all(handles).await.into_iter().map(|r| r.unwrap_or(0)).sum();
        let elapsed = start.elapsed();

        if received != size {
            let _ = fs::remove_file(&staging).await;
            warn!(
                scope = "cache",
                event = "end",
                remote = %job.remote,
                local = %job.local,
                size,
                received,
                duration = %human::duration(elapsed),
                "Mirror incomplete, discarded"
            );
            return JobOutcome::Incomplete { size, received };
        }

        if let Err(e) = fs::rename(&staging, &local).await {
            let _ = fs::remove_file(&staging).await;
            warn!(scope = "cache", event = "error", local = %job.local, error = %e, "Cannot move mirror into place");
            return JobOutcome::Failed;
        }
        let marker = refresh_marker_path(&local);
        if job.refresh > 0 {
            if let Err(e) = fs::write(&marker, format!("{}\n", job.refresh)).await {
                warn!(scope = "cache", marker = %marker.display(), error = %e, "Cannot write refresh marker");
            }
        } else {
            let _ = fs::remove_file(&marker).await;
        }

        info!(
            scope = "cache",
            event = "end",
            trigger = %job.trigger,
            remote = %job.remote,
            local = %job.local,
            size = %human::size(size),
            duration = %human::duration(elapsed),
            bandwidth = %human::bandwidth(size, elapsed),
            "Mirror complete"
        );
        JobOutcome::Completed { size }
    }
}

/// Fetch one range into the staging file; returns the bytes written
async fn fetch_chunk(source: &HttpSource, staging: &Path, offset: u64, length: u64) -> u64 {
    let mut file = match OpenOptions::new().write(true).open(staging).await {
        Ok(file) => file,
        Err(e) => {
            debug!(scope = "cache", staging = %staging.display(), error = %e, "Cannot open staging file");
            return 0;
        }
    };
    match source.read_into(&mut file, offset, length).await {
        Ok(received) => received,
        Err(e) => {
            debug!(scope = "cache", remote = %source.url(), offset, length, error = %e, "Chunk failed");
            0
        }
    }
}
