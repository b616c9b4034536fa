//! Rolling NDJSON event log
//!
//! Each session directory holds `stream.<n>.ndjson` segments mirroring
//! the JSON-RPC exchange with the agent, one message per line. The
//! writer seals the active segment before a write would push it over
//! `maxSegmentBytes` and drops the oldest segment once the retained
//! count exceeds `maxSegments`. A writer never fails the caller: open
//! failures degrade it to drop-with-error mode and later errors are
//! recorded in the manifest.

use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use acpx_core::jsonrpc::is_response;
use acpx_core::record::EventLogManifest;
use acpx_core::SessionRecord;

use crate::paths::StorePaths;

/// Append-only writer over a session's active event segment
pub struct EventWriter {
    paths: StorePaths,
    record_id: String,
    manifest: EventLogManifest,
    last_seq: u64,
    last_request_id: Option<u64>,
    file: Option<tokio::fs::File>,
    first_index: u32,
    current_index: u32,
    current_len: u64,
    degraded: bool,
}

impl EventWriter {
    /// Open the active segment for a session, creating it if needed
    ///
    /// Never fails: when the segment cannot be created the writer comes
    /// back degraded and every append is a no-op with the error recorded.
    pub async fn open(paths: StorePaths, record: &SessionRecord) -> Self {
        let record_id = record.acpx_record_id.to_string();
        let mut writer = Self {
            paths,
            record_id,
            manifest: record.event_log.clone(),
            last_seq: record.last_seq,
            last_request_id: record.last_request_id,
            file: None,
            first_index: 0,
            current_index: 0,
            current_len: 0,
            degraded: false,
        };

        if let Err(err) = writer.open_active_segment().await {
            tracing::error!(
                "event log for {} unavailable, dropping events: {}",
                writer.record_id,
                err
            );
            writer.manifest.last_write_error = Some(err.to_string());
            writer.degraded = true;
        }
        writer
    }

    async fn open_active_segment(&mut self) -> std::io::Result<()> {
        let dir = self.paths.session_dir(&self.record_id);
        tokio::fs::create_dir_all(&dir).await?;

        let (first, last, count) = scan_segments(&dir).await?;
        self.first_index = first;
        self.current_index = last;
        self.manifest.segment_count = count.max(1);

        let path = self.paths.segment_path(&self.record_id, self.current_index);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        self.current_len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        self.manifest.active_path = Some(path);
        self.file = Some(file);
        Ok(())
    }

    /// True when the writer dropped into no-op mode
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn last_request_id(&self) -> Option<u64> {
        self.last_request_id
    }

    pub fn manifest(&self) -> &EventLogManifest {
        &self.manifest
    }

    /// Append one JSON-RPC message as an NDJSON line
    ///
    /// Rotation is evaluated before the write. Every append bumps
    /// `lastSeq`; responses also update `lastRequestId`.
    pub async fn append_message(&mut self, message: &Value) {
        if self.degraded {
            return;
        }

        let mut line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(err) => {
                self.manifest.last_write_error = Some(err.to_string());
                return;
            }
        };
        line.push('\n');

        if self.current_len > 0
            && self.current_len + line.len() as u64 > self.manifest.max_segment_bytes
        {
            if let Err(err) = self.rotate().await {
                // Keep appending to the current segment; the oversize is
                // preferable to losing the frame.
                tracing::warn!("event log rotation failed: {}", err);
                self.manifest.last_write_error = Some(err.to_string());
            }
        }

        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return,
        };
        match file.write_all(line.as_bytes()).await {
            Ok(()) => {
                self.current_len += line.len() as u64;
                self.last_seq += 1;
                self.manifest.last_write_at = Some(Utc::now());
                if is_response(message) {
                    if let Some(id) = message.get("id").and_then(Value::as_u64) {
                        self.last_request_id = Some(id);
                    }
                }
            }
            Err(err) => {
                tracing::error!("event log write failed, dropping further events: {}", err);
                self.manifest.last_write_error = Some(err.to_string());
                self.degraded = true;
            }
        }
    }

    /// Seal the active segment, open the next, prune the oldest
    async fn rotate(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
        }

        self.current_index += 1;
        let path = self.paths.segment_path(&self.record_id, self.current_index);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        self.file = Some(file);
        self.current_len = 0;
        self.manifest.segment_count += 1;
        self.manifest.active_path = Some(path);

        while self.manifest.segment_count > self.manifest.max_segments {
            let victim = self.paths.segment_path(&self.record_id, self.first_index);
            if let Err(err) = tokio::fs::remove_file(&victim).await {
                tracing::warn!("failed to drop old segment {}: {}", victim.display(), err);
            }
            self.first_index += 1;
            self.manifest.segment_count -= 1;
        }
        Ok(())
    }

    /// Flush and, when `checkpoint`, fold the manifest back into the record
    pub async fn close(mut self, checkpoint: Option<&mut SessionRecord>) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
        }
        if let Some(record) = checkpoint {
            self.checkpoint_into(record);
        }
    }

    /// Update a record with the writer's current bookkeeping
    pub fn checkpoint_into(&self, record: &mut SessionRecord) {
        record.event_log = self.manifest.clone();
        record.last_seq = self.last_seq;
        record.last_request_id = self.last_request_id;
        record.updated_at = Utc::now();
    }
}

/// Scan for `stream.<n>.ndjson` files; returns (first, last, count)
async fn scan_segments(dir: &std::path::Path) -> std::io::Result<(u32, u32, u32)> {
    let mut indices: Vec<u32> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(index) = name
            .strip_prefix("stream.")
            .and_then(|rest| rest.strip_suffix(".ndjson"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            indices.push(index);
        }
    }
    if indices.is_empty() {
        return Ok((0, 0, 0));
    }
    indices.sort_unstable();
    Ok((
        indices[0],
        indices[indices.len() - 1],
        indices.len() as u32,
    ))
}
