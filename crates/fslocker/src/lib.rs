/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
//! Advisory exclusive file locks with queryable last-use times.
//!
//! This is the only coordination point between processes on one host: every
//! leasable resource maps to one file under the registry root, `flock(2)`
//! provides mutual exclusion, and the file's mtime records when the resource
//! was last touched. Locks die with their holder, so a crashed process can
//! never strand a resource.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

/// Cadence of non-blocking retries while waiting on a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LockError {
    /// The lock is held elsewhere (or was still held when a bounded wait
    /// expired). Callers routinely treat this as "skip", not as a failure.
    #[error("lock is held by another process")]
    WouldBlock,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A lease record as seen by [`FsLocker::list_files`].
#[derive(Debug, Clone)]
pub struct Record {
    /// File name, i.e. the resource identifier (an IP address string).
    pub name: String,
    /// Last time the record was bumped.
    pub bump_time: SystemTime,
}

/// Registry of advisory exclusive locks rooted at one directory.
///
/// Paths handed to the methods here are interpreted relative to the root, so
/// callers can build stable per-interface subtrees without caring where the
/// registry actually lives.
pub struct FsLocker {
    root: PathBuf,
}

impl FsLocker {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the exclusive lock for `path`, creating the record file if it
    /// does not exist yet.
    ///
    /// `timeout` selects the waiting mode: `Some(ZERO)` makes a single
    /// non-blocking attempt, `Some(d)` retries until `d` has elapsed, and
    /// `None` retries indefinitely. Contention is reported as
    /// [`LockError::WouldBlock`], distinct from real I/O errors, so callers
    /// can skip busy resources without aborting a scan. The wait is async and
    /// can be cancelled at any sleep point; no lock is held on cancellation.
    pub async fn exclusive_lock(
        &self,
        path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<ExclusiveLock, LockError> {
        let path = self.root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match timeout {
            Some(timeout) if timeout.is_zero() => try_exclusive_lock(&path),
            Some(timeout) => {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    match try_exclusive_lock(&path) {
                        Err(LockError::WouldBlock) if tokio::time::Instant::now() < deadline => {
                            tokio::time::sleep(RETRY_INTERVAL).await;
                        }
                        Err(LockError::WouldBlock) => {
                            tracing::debug!(path = %path.display(), "lock still contended at timeout");
                            return Err(LockError::WouldBlock);
                        }
                        other => return other,
                    }
                }
            }
            None => loop {
                match try_exclusive_lock(&path) {
                    Err(LockError::WouldBlock) => tokio::time::sleep(RETRY_INTERVAL).await,
                    other => return other,
                }
            },
        }
    }

    /// Enumerate the lease records in `dir` with their bump times.
    ///
    /// Records may be removed concurrently by other processes; entries that
    /// vanish between the directory read and the metadata read are skipped.
    /// A missing directory yields an empty listing.
    pub fn list_files(&self, dir: impl AsRef<Path>) -> io::Result<Vec<Record>> {
        let dir = self.root.join(dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            records.push(Record {
                name,
                bump_time: metadata.modified()?,
            });
        }
        Ok(records)
    }

    /// Delete a lease record. The caller must hold its lock.
    pub fn remove_path(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::remove_file(self.root.join(path))
    }
}

fn try_exclusive_lock(path: &Path) -> Result<ExclusiveLock, LockError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(ExclusiveLock { lock: Some(lock) }),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(LockError::WouldBlock),
        Err((_, errno)) => {
            tracing::warn!(path = %path.display(), errno = ?errno, "unable to take exclusive lock");
            Err(LockError::Io(io::Error::from_raw_os_error(errno as i32)))
        }
    }
}

/// A held exclusive lock. Dropping it releases the lock, so a cancelled task
/// can never keep a resource reserved.
#[derive(Debug)]
pub struct ExclusiveLock {
    lock: Option<Flock<File>>,
}

impl ExclusiveLock {
    /// Advance the record's bump time to now. Observable through
    /// [`FsLocker::list_files`]. No-op after [`ExclusiveLock::unlock`].
    pub fn bump(&self) -> io::Result<()> {
        match &self.lock {
            Some(file) => file.set_modified(SystemTime::now()),
            None => Ok(()),
        }
    }

    /// Release the lock. Idempotent; dropping the token has the same effect.
    pub fn unlock(&mut self) {
        self.lock.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonblocking_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FsLocker::new(dir.path()).unwrap();

        let held = locker
            .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
            .await
            .unwrap();

        let contended = locker
            .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
            .await;
        assert!(matches!(contended, Err(LockError::WouldBlock)));

        drop(held);
        locker
            .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unlock_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FsLocker::new(dir.path()).unwrap();

        let mut lock = locker
            .exclusive_lock("ip-config", Some(Duration::ZERO))
            .await
            .unwrap();
        lock.unlock();
        lock.unlock();
        lock.bump().unwrap();

        locker
            .exclusive_lock("ip-config", Some(Duration::ZERO))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_files_reports_bump_times() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FsLocker::new(dir.path()).unwrap();

        let lock = locker
            .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
            .await
            .unwrap();
        let before = locker.list_files("iface/ip-addresses").unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name, "10.0.0.2");

        // Bump must move the observed time forward (never backward).
        std::thread::sleep(Duration::from_millis(20));
        lock.bump().unwrap();
        let after = locker.list_files("iface/ip-addresses").unwrap();
        assert!(after[0].bump_time >= before[0].bump_time);
    }

    #[tokio::test]
    async fn list_files_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FsLocker::new(dir.path()).unwrap();
        assert!(locker.list_files("nope/ip-addresses").unwrap().is_empty());
    }
}
