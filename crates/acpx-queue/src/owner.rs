//! Queue owner
//!
//! The single process per session that owns the agent subprocess and
//! serializes prompt turns against it. The owner listens on the lease
//! socket, acknowledges every request before acting on it, runs prompts
//! one at a time through a single-consumer loop, dispatches control
//! requests inline through the turn controller, and drains itself when
//! the idle TTL expires.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::mpsc;

use acpx_core::error::{detail, AcpxError, Result};
use acpx_core::permission::{NonInteractivePolicy, PermissionMode};
use acpx_core::queue_wire::{PromptOutcome, QueueReply, QueueRequest};
use acpx_core::ttl;

use crate::lease::QueueLease;
use crate::turn::TurnController;

/// One queued prompt submission
pub struct PromptTask {
    pub request_id: String,
    pub message: String,
    pub permission_mode: PermissionMode,
    pub non_interactive_permissions: Option<NonInteractivePolicy>,
    pub timeout_ms: Option<u64>,
    pub reply: ReplySender,
}

/// Channel back to the submitting client's socket
///
/// Sends never fail loudly: a client that disconnected early (fire and
/// forget submissions) just stops receiving.
#[derive(Clone)]
pub struct ReplySender {
    tx: mpsc::UnboundedSender<QueueReply>,
}

impl ReplySender {
    pub fn send(&self, reply: QueueReply) {
        if self.tx.send(reply).is_err() {
            tracing::debug!("task socket listener gone, dropping reply");
        }
    }
}

/// The operations the owner delegates to its runtime
///
/// The owner crate knows nothing about the ACP client; the facade wires
/// these callbacks to it at construction time.
#[async_trait]
pub trait OwnerHandler: Send + Sync + 'static {
    /// Run one prompt turn, streaming updates through `task.reply`
    async fn run_prompt(&self, task: &PromptTask) -> Result<PromptOutcome>;
    /// Cancel the active prompt; returns whether the cancel took effect
    async fn cancel_prompt(&self) -> Result<bool>;
    async fn set_mode(&self, mode_id: &str, timeout_ms: Option<u64>) -> Result<()>;
    async fn set_config_option(
        &self,
        config_id: &str,
        value: &Value,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<Value>>;
    /// Final cleanup: close the agent, persist the record
    async fn shutdown(&self);
}

struct ConnCtx {
    session_id: String,
    task_tx: mpsc::UnboundedSender<PromptTask>,
    handler: Arc<dyn OwnerHandler>,
    turn: Arc<TurnController>,
}

/// The per-session queue owner loop
pub struct QueueOwner {
    lease: QueueLease,
    session_id: String,
    handler: Arc<dyn OwnerHandler>,
    turn: Arc<TurnController>,
    ttl_ms: u64,
}

impl QueueOwner {
    /// Build an owner over an acquired lease
    ///
    /// `ttl_ms` must already be normalized (see
    /// [`acpx_core::ttl::normalize_idle_ttl`]); `0` keeps the owner
    /// alive forever.
    pub fn new(
        lease: QueueLease,
        session_id: String,
        handler: Arc<dyn OwnerHandler>,
        turn: Arc<TurnController>,
        ttl_ms: u64,
    ) -> Self {
        Self {
            lease,
            session_id,
            handler,
            turn,
            ttl_ms,
        }
    }

    /// Listen, serve, drain; returns once the owner has shut down
    pub async fn run(self) -> Result<()> {
        let listener = UnixListener::bind(&self.lease.socket_path).map_err(|e| {
            AcpxError::queue(format!(
                "failed to bind owner socket {}: {}",
                self.lease.socket_path.display(),
                e
            ))
        })?;
        tracing::info!(
            "queue owner listening on {} (ttl {} ms)",
            self.lease.socket_path.display(),
            self.ttl_ms
        );

        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<PromptTask>();
        let ctx = Arc::new(ConnCtx {
            session_id: self.session_id.clone(),
            task_tx,
            handler: Arc::clone(&self.handler),
            turn: Arc::clone(&self.turn),
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&ctx)));

        let mut first_window = true;
        loop {
            let wait_ms = if first_window {
                ttl::first_task_wait_ms(self.ttl_ms)
            } else {
                self.ttl_ms
            };

            let next = if wait_ms == 0 {
                task_rx.recv().await
            } else {
                match tokio::time::timeout(Duration::from_millis(wait_ms), task_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::info!("idle TTL expired, shutting down");
                        break;
                    }
                }
            };

            let Some(task) = next else { break };
            first_window = false;
            self.process_task(task).await;
        }

        // Graceful shutdown: refuse new work, drain what is queued,
        // close the agent, give the lease back.
        self.turn.begin_closing();
        accept_task.abort();
        task_rx.close();
        while let Ok(task) = task_rx.try_recv() {
            task.reply.send(QueueReply::Error {
                request_id: task.request_id.clone(),
                error: shutting_down_error(),
            });
        }
        self.handler.shutdown().await;
        self.lease.release();
        tracing::info!("queue owner stopped");
        Ok(())
    }

    async fn process_task(&self, task: PromptTask) {
        if !self.turn.begin_turn() {
            task.reply.send(QueueReply::Error {
                request_id: task.request_id.clone(),
                error: AcpxError::queue("queue owner busy").with_retryable(true),
            });
            return;
        }

        tracing::debug!("running prompt task {}", task.request_id);
        let outcome = self.handler.run_prompt(&task).await;
        self.turn.end_turn();

        match outcome {
            Ok(result) => {
                task.reply.send(QueueReply::Done {
                    request_id: task.request_id.clone(),
                    stop_reason: result.stop_reason.clone(),
                });
                task.reply.send(QueueReply::TaskResult {
                    request_id: task.request_id.clone(),
                    result,
                });
            }
            Err(error) => {
                tracing::warn!("prompt task {} failed: {}", task.request_id, error);
                task.reply.send(QueueReply::Error {
                    request_id: task.request_id.clone(),
                    error,
                });
            }
        }
    }
}

fn shutting_down_error() -> AcpxError {
    AcpxError::queue("queue owner is shutting down")
        .with_detail(detail::QUEUE_OWNER_SHUTTING_DOWN)
        .with_retryable(true)
}

fn closing_error() -> AcpxError {
    AcpxError::queue("queue owner is closing").with_detail(detail::QUEUE_OWNER_CLOSING)
}

async fn accept_loop(listener: UnixListener, ctx: Arc<ConnCtx>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(serve_connection(stream, Arc::clone(&ctx)));
            }
            Err(err) => {
                tracing::warn!("owner accept failed: {}", err);
                break;
            }
        }
    }
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &QueueReply) -> std::io::Result<()> {
    let mut line = serde_json::to_string(reply).expect("replies always serialize");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Serve one client connection: one request, acknowledged, then replies
/// until the terminal frame
async fn serve_connection(stream: UnixStream, ctx: Arc<ConnCtx>) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    let request: QueueRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(err) => {
            let reply = QueueReply::Error {
                request_id: String::new(),
                error: AcpxError::queue(format!("invalid queue request payload: {}", err))
                    .with_detail(detail::QUEUE_REQUEST_PAYLOAD_INVALID_JSON),
            };
            let _ = write_reply(&mut writer, &reply).await;
            return;
        }
    };

    let request_id = request.request_id().to_string();
    // Ack before enqueue so enqueue order matches ack order.
    let accepted = QueueReply::Accepted {
        request_id: request_id.clone(),
        session_id: ctx.session_id.clone(),
    };
    if write_reply(&mut writer, &accepted).await.is_err() {
        return;
    }

    match request {
        QueueRequest::SubmitPrompt {
            request_id,
            message,
            permission_mode,
            non_interactive_permissions,
            timeout_ms,
            wait_for_completion: _,
            suppress_sdk_console_errors: _,
        } => {
            let (tx, mut rx) = mpsc::unbounded_channel::<QueueReply>();
            let task = PromptTask {
                request_id: request_id.clone(),
                message,
                permission_mode,
                non_interactive_permissions,
                timeout_ms,
                reply: ReplySender { tx },
            };
            if ctx.task_tx.send(task).is_err() {
                let _ = write_reply(
                    &mut writer,
                    &QueueReply::Error {
                        request_id,
                        error: shutting_down_error(),
                    },
                )
                .await;
                return;
            }

            while let Some(reply) = rx.recv().await {
                let terminal = reply.is_terminal();
                if write_reply(&mut writer, &reply).await.is_err() {
                    // Client went away; the task keeps running, replies drop.
                    break;
                }
                if terminal {
                    break;
                }
            }
        }
        QueueRequest::CancelPrompt { request_id } => {
            let cancelled = if ctx.turn.is_closing() {
                false
            } else {
                ctx.handler.cancel_prompt().await.unwrap_or(false)
            };
            let _ = write_reply(
                &mut writer,
                &QueueReply::CancelResult {
                    request_id,
                    cancelled,
                },
            )
            .await;
        }
        QueueRequest::SetMode {
            request_id,
            mode_id,
            timeout_ms,
        } => {
            let reply = if ctx.turn.is_closing() {
                Some(QueueReply::Error {
                    request_id,
                    error: closing_error(),
                })
            } else {
                match ctx.handler.set_mode(&mode_id, timeout_ms).await {
                    // Success carries no payload: ack then clean close.
                    Ok(()) => None,
                    Err(error) => Some(QueueReply::Error { request_id, error }),
                }
            };
            if let Some(reply) = reply {
                let _ = write_reply(&mut writer, &reply).await;
            }
        }
        QueueRequest::SetConfigOption {
            request_id,
            config_id,
            value,
            timeout_ms,
        } => {
            let reply = if ctx.turn.is_closing() {
                QueueReply::Error {
                    request_id,
                    error: closing_error(),
                }
            } else {
                match ctx.handler.set_config_option(&config_id, &value, timeout_ms).await {
                    Ok(config_options) => QueueReply::ConfigOptions {
                        request_id,
                        config_options,
                    },
                    Err(error) => QueueReply::Error { request_id, error },
                }
            };
            let _ = write_reply(&mut writer, &reply).await;
        }
    }
}
