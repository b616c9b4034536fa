//! Session record store
//!
//! CRUD over the flat directory of JSON session records. Listing is
//! tolerant: malformed files are skipped with a warning instead of
//! failing the scan. Writes go through a temp file and an atomic rename
//! so a record file is never missing or half-written between updates.

use std::path::{Path, PathBuf};

use acpx_core::error::{detail, AcpxError, Result};
use acpx_core::SessionRecord;

use crate::paths::StorePaths;

/// Query for [`SessionStore::find_session`] and the directory walk
#[derive(Debug, Clone)]
pub struct SessionKey<'a> {
    pub agent_command: &'a str,
    pub cwd: &'a Path,
    pub name: Option<&'a str>,
    pub include_closed: bool,
}

/// The persistence store for session records
#[derive(Debug, Clone)]
pub struct SessionStore {
    paths: StorePaths,
}

impl SessionStore {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Load one record by its file path, if it parses
    async fn load_record(&self, path: &Path) -> Option<SessionRecord> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!("skipping unreadable record {}: {}", path.display(), err);
                return None;
            }
        };
        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("skipping malformed record {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Scan the sessions directory, parsing tolerantly
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let dir = self.paths.sessions_dir();
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // A store that was never written to has no sessions.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = self.load_record(&path).await {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(records)
    }

    pub async fn list_sessions_for_agent(&self, agent_command: &str) -> Result<Vec<SessionRecord>> {
        let mut records = self.list_sessions().await?;
        records.retain(|record| record.agent_command == agent_command);
        Ok(records)
    }

    /// Resolve a session by id
    ///
    /// Accepts an exact `acpxRecordId` or `acpSessionId`; falls back to a
    /// suffix match over both. An ambiguous suffix fails rather than
    /// guessing.
    pub async fn resolve_session_record(&self, id: &str) -> Result<SessionRecord> {
        let records = self.list_sessions().await?;

        if let Some(exact) = records.iter().find(|record| {
            record.acpx_record_id.to_string() == id || record.acp_session_id == id
        }) {
            return Ok(exact.clone());
        }

        let suffix_matches: Vec<&SessionRecord> = records
            .iter()
            .filter(|record| {
                record.acpx_record_id.to_string().ends_with(id)
                    || record.acp_session_id.ends_with(id)
            })
            .collect();

        match suffix_matches.len() {
            0 => Err(AcpxError::no_session(format!("no session matches '{}'", id))),
            1 => Ok(suffix_matches[0].clone()),
            n => Err(AcpxError::no_session(format!(
                "session id '{}' is ambiguous ({} matches)",
                id, n
            ))
            .with_detail(detail::SESSION_AMBIGUOUS)),
        }
    }

    /// Exact match on `(agentCommand, normalized cwd, name)`
    pub async fn find_session(&self, key: &SessionKey<'_>) -> Result<Option<SessionRecord>> {
        let cwd = normalize_cwd(key.cwd);
        let records = self.list_sessions().await?;
        Ok(records
            .into_iter()
            .filter(|record| key.include_closed || !record.closed)
            .find(|record| record.matches_key(key.agent_command, &cwd, key.name)))
    }

    /// Walk from `cwd` up to and including `boundary`, returning the
    /// nearest matching session
    ///
    /// The boundary is typically the enclosing repository root; when
    /// `None`, only `cwd` itself is considered.
    pub async fn find_session_by_directory_walk(
        &self,
        key: &SessionKey<'_>,
        boundary: Option<&Path>,
    ) -> Result<Option<SessionRecord>> {
        let start = normalize_cwd(key.cwd);
        let boundary = boundary.map(normalize_cwd);
        let records = self.list_sessions().await?;

        let mut dir: Option<&Path> = Some(start.as_path());
        while let Some(current) = dir {
            if let Some(found) = records
                .iter()
                .filter(|record| key.include_closed || !record.closed)
                .find(|record| record.matches_key(key.agent_command, current, key.name))
            {
                return Ok(Some(found.clone()));
            }
            if boundary.as_deref() == Some(current) {
                break;
            }
            dir = current.parent();
        }
        Ok(None)
    }

    /// Write a record atomically: temp file next to the target, then
    /// rename over it
    pub async fn write_session_record(&self, record: &SessionRecord) -> Result<()> {
        self.paths.ensure_dirs().await?;
        let path = self
            .paths
            .record_path(&record.acpx_record_id.to_string());
        let tmp = temp_sibling(&path);
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &json).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Remove a record file and its session directory
    ///
    /// Only used by tests and explicit destructive maintenance; the
    /// normal close path marks the record closed and leaves it on disk.
    pub async fn remove_session(&self, record_id: &str) -> Result<()> {
        let _ = tokio::fs::remove_file(self.paths.record_path(record_id)).await;
        let _ = tokio::fs::remove_dir_all(self.paths.session_dir(record_id)).await;
        Ok(())
    }
}

/// Canonicalize when possible; a cwd that no longer exists is used as-is
fn normalize_cwd(cwd: &Path) -> PathBuf {
    cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let name = format!(
        "{}.{}.{}.tmp",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id(),
        millis
    );
    path.with_file_name(name)
}

/// Find the enclosing repository root: the nearest ancestor containing a
/// `.git` directory or file. Used only as a walk boundary, never required.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = normalize_cwd(start);
    let mut dir: Option<&Path> = Some(start.as_path());
    while let Some(current) = dir {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SessionStore {
        SessionStore::new(StorePaths::with_root(temp.path()))
    }

    #[tokio::test]
    async fn test_write_then_list() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let record = SessionRecord::new("mock-agent", "/tmp/work");
        store.write_session_record(&record).await.unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].acpx_record_id, record.acpx_record_id);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let record = SessionRecord::new("mock-agent", "/tmp/work");
        store.write_session_record(&record).await.unwrap();
        store.write_session_record(&record).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(store.paths().sessions_dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{:?}", names);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let record = SessionRecord::new("mock-agent", "/tmp/work");
        store.write_session_record(&record).await.unwrap();

        tokio::fs::write(store.paths().sessions_dir().join("broken.json"), b"{nope")
            .await
            .unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_exact_and_suffix() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut record = SessionRecord::new("mock-agent", "/tmp/work");
        record.acp_session_id = "session-alpha-0001".to_string();
        store.write_session_record(&record).await.unwrap();

        let by_record_id = store
            .resolve_session_record(&record.acpx_record_id.to_string())
            .await
            .unwrap();
        assert_eq!(by_record_id.acpx_record_id, record.acpx_record_id);

        let by_session_id = store
            .resolve_session_record("session-alpha-0001")
            .await
            .unwrap();
        assert_eq!(by_session_id.acpx_record_id, record.acpx_record_id);

        let by_suffix = store.resolve_session_record("alpha-0001").await.unwrap();
        assert_eq!(by_suffix.acpx_record_id, record.acpx_record_id);
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_suffix_fails() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut a = SessionRecord::new("mock-agent", "/tmp/a");
        a.acp_session_id = "run-11".to_string();
        let mut b = SessionRecord::new("mock-agent", "/tmp/b");
        b.acp_session_id = "other-11".to_string();
        store.write_session_record(&a).await.unwrap();
        store.write_session_record(&b).await.unwrap();

        let err = store.resolve_session_record("11").await.unwrap_err();
        assert_eq!(err.detail_code.as_deref(), Some(detail::SESSION_AMBIGUOUS));
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let err = store.resolve_session_record("nope").await.unwrap_err();
        assert_eq!(err.code, acpx_core::ErrorCode::NoSession);
    }

    #[tokio::test]
    async fn test_find_session_skips_closed() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let cwd = temp.path().join("work");
        tokio::fs::create_dir_all(&cwd).await.unwrap();
        let cwd = cwd.canonicalize().unwrap();

        let mut record = SessionRecord::new("mock-agent", &cwd);
        record.mark_closed();
        store.write_session_record(&record).await.unwrap();

        let key = SessionKey {
            agent_command: "mock-agent",
            cwd: &cwd,
            name: None,
            include_closed: false,
        };
        assert!(store.find_session(&key).await.unwrap().is_none());

        let with_closed = SessionKey {
            include_closed: true,
            ..key
        };
        assert!(store.find_session(&with_closed).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_directory_walk_finds_nearest() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let root = temp.path().join("repo");
        let nested = root.join("src").join("deep");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        let root = root.canonicalize().unwrap();
        let nested = nested.canonicalize().unwrap();

        let record = SessionRecord::new("mock-agent", &root);
        store.write_session_record(&record).await.unwrap();

        let key = SessionKey {
            agent_command: "mock-agent",
            cwd: &nested,
            name: None,
            include_closed: false,
        };
        let found = store
            .find_session_by_directory_walk(&key, Some(&root))
            .await
            .unwrap();
        assert_eq!(found.unwrap().acpx_record_id, record.acpx_record_id);

        // A boundary above the record's cwd stops the walk before it.
        let shallow = root.join("src");
        let bounded = store
            .find_session_by_directory_walk(&key, Some(&shallow))
            .await
            .unwrap();
        assert!(bounded.is_none());
    }

    #[tokio::test]
    async fn test_find_repo_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("repo");
        let nested = root.join("a").join("b");
        tokio::fs::create_dir_all(root.join(".git")).await.unwrap();
        tokio::fs::create_dir_all(&nested).await.unwrap();

        let found = find_repo_root(&nested).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());

        let outside = TempDir::new().unwrap();
        assert!(find_repo_root(outside.path()).is_none());
    }
}
