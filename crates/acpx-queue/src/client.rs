//! Queue client
//!
//! The CLI side of the queue socket: detect a running owner through its
//! lock file, connect, submit one request, and stream the replies back.
//! When no owner is reachable the warm path spawns a detached owner and
//! retries with a small backoff.

use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    unix::{OwnedReadHalf, OwnedWriteHalf},
    UnixStream,
};

use acpx_core::error::{detail, AcpxError, Result};
use acpx_core::queue_wire::{PromptOutcome, QueueReply, QueueRequest};
use acpx_store::StorePaths;

use crate::lease::{clean_stale, read_lock};

/// Deadline for the owner's `accepted` frame
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to retry connecting while the owner PID is alive
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(2);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Attempts and backoff after spawning a fresh owner
const SPAWN_RETRY_ATTEMPTS: usize = 25;
const SPAWN_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Outcome of a prompt submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Accepted; the caller chose not to wait for completion
    Queued {
        request_id: String,
        session_id: String,
    },
    Completed(PromptOutcome),
}

/// Outcome of a control request
#[derive(Debug)]
pub enum ControlOutcome {
    Cancel(bool),
    ConfigOptions(Vec<Value>),
    /// The operation succeeded with no payload (set_mode)
    Applied,
}

/// Callback receiving non-terminal streamed replies
pub type ReplyCallback<'a> = &'a mut (dyn FnMut(&QueueReply) + Send);

/// Connect to a running owner, or report that none exists
///
/// A lock with a dead PID is cleaned up on the way.
async fn connect_owner(paths: &StorePaths, record_id: &str) -> Result<Option<UnixStream>> {
    let lock_path = paths.lock_path(record_id);
    let socket_path = paths.socket_path(record_id);

    let Some(info) = read_lock(&lock_path) else {
        return Ok(None);
    };
    if !acpx_acp::pid_alive(info.pid) {
        clean_stale(&lock_path, &socket_path);
        return Ok(None);
    }

    // The owner may still be between lock creation and socket bind;
    // retry briefly while its PID stays alive.
    let deadline = tokio::time::Instant::now() + CONNECT_RETRY_WINDOW;
    loop {
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => return Ok(Some(stream)),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                if !acpx_acp::pid_alive(info.pid) {
                    clean_stale(&lock_path, &socket_path);
                    return Ok(None);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(AcpxError::queue(format!(
                        "owner pid {} alive but socket unreachable",
                        info.pid
                    ))
                    .with_detail(detail::QUEUE_OWNER_UNREACHABLE)
                    .with_retryable(true));
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn before_ack_error(reason: &str) -> AcpxError {
    AcpxError::queue(format!("queue connection lost before ack: {}", reason))
        .with_detail(detail::QUEUE_DISCONNECTED_BEFORE_ACK)
        .with_retryable(true)
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<QueueReply>> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => Ok(None),
        Ok(_) => {
            let reply: QueueReply = serde_json::from_str(line.trim()).map_err(|e| {
                AcpxError::queue(format!("unparseable owner reply: {}", e))
            })?;
            Ok(Some(reply))
        }
        Err(err) => Err(err.into()),
    }
}

/// Send the request and wait for the matching `accepted`
async fn send_and_ack(
    stream: UnixStream,
    request: &QueueRequest,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf, String)> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let first = tokio::time::timeout(ACK_TIMEOUT, read_reply(&mut reader))
        .await
        .map_err(|_| before_ack_error("timed out"))??;

    match first {
        Some(QueueReply::Accepted {
            request_id,
            session_id,
        }) if request_id == request.request_id() => Ok((reader, writer, session_id)),
        Some(QueueReply::Error { error, .. }) => Err(error),
        Some(other) => Err(before_ack_error(&format!(
            "unexpected first reply: {}",
            other.request_id()
        ))),
        None => Err(before_ack_error("connection closed")),
    }
}

/// Submit a prompt to a running owner; `Ok(None)` means no owner
pub async fn try_submit_prompt(
    paths: &StorePaths,
    record_id: &str,
    request: &QueueRequest,
    on_reply: ReplyCallback<'_>,
) -> Result<Option<SubmitOutcome>> {
    let wait_for_completion = match request {
        QueueRequest::SubmitPrompt {
            wait_for_completion,
            ..
        } => *wait_for_completion,
        _ => {
            return Err(AcpxError::usage(
                "try_submit_prompt requires a submit_prompt request",
            ))
        }
    };

    let Some(stream) = connect_owner(paths, record_id).await? else {
        return Ok(None);
    };
    let (mut reader, _writer, session_id) = send_and_ack(stream, request).await?;

    if !wait_for_completion {
        return Ok(Some(SubmitOutcome::Queued {
            request_id: request.request_id().to_string(),
            session_id,
        }));
    }

    loop {
        match read_reply(&mut reader).await? {
            Some(QueueReply::TaskResult { result, .. }) => {
                return Ok(Some(SubmitOutcome::Completed(result)));
            }
            Some(QueueReply::Error { error, .. }) => return Err(error),
            Some(reply) => on_reply(&reply),
            None => {
                return Err(AcpxError::queue("owner connection closed before result")
                    .with_retryable(true));
            }
        }
    }
}

/// Submit a control request (cancel / set_mode / set_config_option)
pub async fn try_control(
    paths: &StorePaths,
    record_id: &str,
    request: &QueueRequest,
) -> Result<Option<ControlOutcome>> {
    if matches!(request, QueueRequest::SubmitPrompt { .. }) {
        return Err(AcpxError::usage("try_control cannot submit prompts"));
    }

    let Some(stream) = connect_owner(paths, record_id).await? else {
        return Ok(None);
    };
    let (mut reader, _writer, _session_id) = send_and_ack(stream, request).await?;

    loop {
        match read_reply(&mut reader).await? {
            Some(QueueReply::CancelResult { cancelled, .. }) => {
                return Ok(Some(ControlOutcome::Cancel(cancelled)));
            }
            Some(QueueReply::ConfigOptions { config_options, .. }) => {
                return Ok(Some(ControlOutcome::ConfigOptions(config_options)));
            }
            Some(QueueReply::Error { error, .. }) => return Err(error),
            Some(other) => {
                tracing::debug!("ignoring control reply {:?}", other.request_id());
            }
            // set_mode success: ack then clean close.
            None => return Ok(Some(ControlOutcome::Applied)),
        }
    }
}

/// The warm path: use the running owner, spawning one when needed
///
/// `spawn_owner` launches the detached owner process; it is only invoked
/// when no owner is reachable, and the submission is retried with
/// backoff until the new owner answers.
pub async fn submit_prompt_or_spawn(
    paths: &StorePaths,
    record_id: &str,
    request: &QueueRequest,
    spawn_owner: &dyn Fn() -> Result<()>,
    on_reply: ReplyCallback<'_>,
) -> Result<SubmitOutcome> {
    if let Some(outcome) = try_submit_prompt(paths, record_id, request, on_reply).await? {
        return Ok(outcome);
    }

    tracing::debug!("no queue owner for {}, spawning one", record_id);
    spawn_owner()?;

    for attempt in 0..SPAWN_RETRY_ATTEMPTS {
        tokio::time::sleep(SPAWN_RETRY_BACKOFF).await;
        if let Some(outcome) = try_submit_prompt(paths, record_id, request, on_reply).await? {
            return Ok(outcome);
        }
        tracing::trace!("owner not reachable yet (attempt {})", attempt + 1);
    }

    Err(AcpxError::queue("queue owner did not become reachable")
        .with_detail(detail::QUEUE_OWNER_UNREACHABLE)
        .with_retryable(true))
}
