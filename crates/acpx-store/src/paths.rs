//! On-disk layout of the acpx home directory
//!
//! ```text
//! ~/.acpx/sessions/<urlencoded recordId>.json      session record
//! ~/.acpx/sessions/<urlencoded recordId>/          session directory
//!     stream.<n>.ndjson                            event log segments
//!     owner.log                                    queue owner diagnostics
//! ~/.acpx/queues/<queueKey>.lock                   queue owner lock
//! ~/.acpx/queues/<queueKey>.sock                   queue owner socket
//! ```
//!
//! `queueKey` is the first 24 hex chars of sha256(recordId). The root is
//! overridable through `ACPX_HOME`, which is how tests isolate themselves.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Environment variable overriding the acpx home directory
pub const HOME_ENV: &str = "ACPX_HOME";

/// Length of the hex queue key derived from a record id
const QUEUE_KEY_LEN: usize = 24;

/// Resolved filesystem layout for one acpx home
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    /// Resolve the home directory: `ACPX_HOME` if set, else `~/.acpx`
    pub fn discover() -> Self {
        let root = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".acpx")))
            .unwrap_or_else(|| PathBuf::from(".acpx"));
        Self { root }
    }

    /// Use an explicit root (tests, embedding)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn queues_dir(&self) -> PathBuf {
        self.root.join("queues")
    }

    /// Path of a session record file
    pub fn record_path(&self, record_id: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.json", urlencoding::encode(record_id)))
    }

    /// Per-session directory holding event segments and owner diagnostics
    pub fn session_dir(&self, record_id: &str) -> PathBuf {
        self.sessions_dir().join(urlencoding::encode(record_id).as_ref())
    }

    /// Path of event segment `n` for a session
    pub fn segment_path(&self, record_id: &str, index: u32) -> PathBuf {
        self.session_dir(record_id)
            .join(format!("stream.{}.ndjson", index))
    }

    /// Diagnostic log of the detached queue owner
    pub fn owner_log_path(&self, record_id: &str) -> PathBuf {
        self.session_dir(record_id).join("owner.log")
    }

    /// Stable queue key for a record id
    pub fn queue_key(record_id: &str) -> String {
        let digest = Sha256::digest(record_id.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..QUEUE_KEY_LEN].to_string()
    }

    pub fn lock_path(&self, record_id: &str) -> PathBuf {
        self.queues_dir()
            .join(format!("{}.lock", Self::queue_key(record_id)))
    }

    /// Queue owner socket path (UNIX socket; the named-pipe substitution
    /// point on Windows)
    pub fn socket_path(&self, record_id: &str) -> PathBuf {
        self.queues_dir()
            .join(format!("{}.sock", Self::queue_key(record_id)))
    }

    /// Create the directory skeleton
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.sessions_dir()).await?;
        tokio::fs::create_dir_all(self.queues_dir()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_key_is_stable_and_short() {
        let a = StorePaths::queue_key("record-1");
        let b = StorePaths::queue_key("record-1");
        let c = StorePaths::queue_key("record-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_layout() {
        let paths = StorePaths::with_root("/tmp/acpx-home");
        let record_path = paths.record_path("abc-123");
        assert!(record_path.ends_with("sessions/abc-123.json"));

        let segment = paths.segment_path("abc-123", 3);
        assert!(segment.ends_with("sessions/abc-123/stream.3.ndjson"));

        let lock = paths.lock_path("abc-123");
        let sock = paths.socket_path("abc-123");
        assert_eq!(lock.extension().unwrap(), "lock");
        assert_eq!(sock.extension().unwrap(), "sock");
        assert_eq!(lock.file_stem(), sock.file_stem());
    }

    #[test]
    fn test_record_path_encodes_unsafe_chars() {
        let paths = StorePaths::with_root("/tmp/acpx-home");
        let record_path = paths.record_path("weird/id");
        let name = record_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(!name.contains('/'));
        assert!(name.contains("%2F"));
    }
}
