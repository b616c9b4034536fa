//! Queue owner lease
//!
//! Exactly one owner per session, enforced by an exclusive-create lock
//! file next to the owner socket. A check-then-write dance would race;
//! the lock is only ever taken with `O_CREAT|O_EXCL` semantics
//! (`OpenOptions::create_new`). A lock whose recorded PID is dead is
//! stale: it and its socket are cleaned up before the next attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use acpx_core::error::Result;
use acpx_store::StorePaths;

/// Contents of a queue owner lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub session_id: String,
    pub socket_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A held lease: proof of queue-owner identity for one session
#[derive(Debug)]
pub struct QueueLease {
    pub session_id: String,
    pub lock_path: PathBuf,
    pub socket_path: PathBuf,
}

/// Outcome of a lease acquisition attempt
#[derive(Debug)]
pub enum Acquire {
    /// This process is now the owner
    Acquired(QueueLease),
    /// A live owner already holds the lock
    OwnerRunning(LockInfo),
}

/// Read and parse a lock file; unreadable or malformed locks are `None`
pub fn read_lock(lock_path: &Path) -> Option<LockInfo> {
    let bytes = std::fs::read(lock_path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!("malformed lock file {}: {}", lock_path.display(), err);
            None
        }
    }
}

/// Remove a stale lock and its socket
pub fn clean_stale(lock_path: &Path, socket_path: &Path) {
    tracing::debug!("cleaning stale lease at {}", lock_path.display());
    let _ = std::fs::remove_file(socket_path);
    let _ = std::fs::remove_file(lock_path);
}

/// Attempt to become the queue owner for a session
pub async fn acquire(paths: &StorePaths, record_id: &str) -> Result<Acquire> {
    paths.ensure_dirs().await?;
    let lock_path = paths.lock_path(record_id);
    let socket_path = paths.socket_path(record_id);

    if let Some(info) = read_lock(&lock_path) {
        if acpx_acp::pid_alive(info.pid) {
            return Ok(Acquire::OwnerRunning(info));
        }
        clean_stale(&lock_path, &socket_path);
    } else if lock_path.exists() {
        // Unparseable lock: nobody can prove ownership, treat as stale.
        clean_stale(&lock_path, &socket_path);
    }

    let info = LockInfo {
        pid: std::process::id(),
        session_id: record_id.to_string(),
        socket_path: socket_path.clone(),
        created_at: Utc::now(),
    };
    let body = serde_json::to_vec_pretty(&info)?;

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(mut file) => {
            file.write_all(&body)?;
            // A leftover socket from a crashed owner would fail the bind.
            let _ = std::fs::remove_file(&socket_path);
            Ok(Acquire::Acquired(QueueLease {
                session_id: record_id.to_string(),
                lock_path,
                socket_path,
            }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            // Lost the race; whoever won is the owner.
            match read_lock(&lock_path) {
                Some(info) => Ok(Acquire::OwnerRunning(info)),
                None => Err(acpx_core::AcpxError::queue(
                    "queue lock contended and unreadable",
                )
                .with_retryable(true)),
            }
        }
        Err(err) => Err(err.into()),
    }
}

impl QueueLease {
    /// Release the lease: socket first, then the lock
    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.lock_path);
        tracing::debug!("released lease for session {}", self.session_id);
    }
}
