//! Fixed-size worker pool for file digests.
//!
//! # Responsibilities
//! - Keep CPU-bound hashing off the request-serving runtime
//! - Hand each caller a future for its own result
//! - Contain worker panics to the job that caused them
//!
//! # Design Decisions
//! - Plain OS threads, created once before any listener is bound
//! - One shared job queue; idle workers pick up the next job
//! - A failed job is reported, never retried

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::oneshot;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Errors reported to the caller of [`HashPool::submit`].
#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to hash {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("hash worker panicked while hashing {0}")]
    WorkerPanicked(PathBuf),

    #[error("hash worker pool is shut down")]
    PoolClosed,
}

/// Hex-encoded SHA-256 digest.
pub type FileDigest = String;

struct Job {
    path: PathBuf,
    reply: oneshot::Sender<Result<FileDigest, HashError>>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Pool of hashing threads.
pub struct HashPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl HashPool {
    /// Create a pool sized to the available CPU count.
    pub fn with_available_parallelism() -> std::io::Result<Self> {
        let size = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(size)
    }

    /// Create a pool with `size` worker threads (at least one).
    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("hash-worker-{}", id))
                .spawn(move || worker_loop(id, receiver, counters))?;
            workers.push(handle);
        }

        tracing::info!(workers = size, "Hash worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
            counters,
        })
    }

    /// Hash the file at `path` on a worker thread.
    pub async fn submit(&self, path: impl AsRef<Path>) -> Result<FileDigest, HashError> {
        let path = path.as_ref().to_path_buf();
        let (reply, result) = oneshot::channel();

        let sender = self.sender.as_ref().ok_or(HashError::PoolClosed)?;
        sender
            .send(Job { path, reply })
            .map_err(|_| HashError::PoolClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        result.await.map_err(|_| HashError::PoolClosed)?
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for HashPool {
    fn drop(&mut self) {
        // Closing the queue ends every worker loop once pending jobs drain.
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("Hash worker pool stopped");
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, counters: Arc<PoolCounters>) {
    loop {
        let job = {
            let queue = match receiver.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            match queue.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        };

        let path = job.path;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sha256_file(&path)));
        let result = match outcome {
            Ok(Ok(digest)) => Ok(digest),
            Ok(Err(source)) => Err(HashError::Io {
                path: path.clone(),
                source,
            }),
            Err(_) => Err(HashError::WorkerPanicked(path.clone())),
        };

        match &result {
            Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                tracing::warn!(worker = id, error = %e, "Hash job failed");
                counters.failed.fetch_add(1, Ordering::Relaxed)
            }
        };

        // The caller may have given up waiting.
        let _ = job.reply.send(result);
    }
    tracing::trace!(worker = id, "Hash worker exiting");
}

/// Synchronous SHA-256 of a file, hex encoded.
pub fn sha256_file(path: &Path) -> std::io::Result<FileDigest> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn digest_matches_known_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let abc = dir.path().join("abc");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&abc, b"abc").unwrap();

        let pool = HashPool::new(2).unwrap();
        assert_eq!(pool.submit(&empty).await.unwrap(), EMPTY_SHA256);
        assert_eq!(pool.submit(&abc).await.unwrap(), ABC_SHA256);
    }

    #[tokio::test]
    async fn repeated_submissions_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, vec![7u8; 300_000]).unwrap();

        let pool = HashPool::new(3).unwrap();
        let first = pool.submit(&path).await.unwrap();
        let second = pool.submit(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_submissions_stay_independent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = HashPool::new(4).unwrap();

        let paths: Vec<PathBuf> = (0..16)
            .map(|i| {
                let path = dir.path().join(format!("file-{}", i));
                std::fs::write(&path, format!("content {}", i).repeat(1000)).unwrap();
                path
            })
            .collect();

        let results = join_all(paths.iter().map(|p| pool.submit(p))).await;

        for (path, digest) in paths.iter().zip(results) {
            assert_eq!(digest.unwrap(), sha256_file(path).unwrap());
        }
        assert_eq!(pool.stats().completed, 16);
    }

    #[tokio::test]
    async fn missing_file_fails_only_that_job() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        std::fs::write(&good, b"abc").unwrap();

        let pool = HashPool::new(1).unwrap();
        let err = pool.submit(dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, HashError::Io { .. }));

        // Pool keeps serving after a failure.
        assert_eq!(pool.submit(&good).await.unwrap(), ABC_SHA256);
        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn pool_has_at_least_one_worker() {
        assert_eq!(HashPool::new(0).unwrap().size(), 1);
    }
}
