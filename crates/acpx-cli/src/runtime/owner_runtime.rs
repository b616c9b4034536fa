//! Owner-side runtime
//!
//! The [`OwnerHandler`] implementation a detached queue owner runs: it
//! lazily starts the ACP client on the first task, keeps it warm across
//! tasks, mirrors every wire frame into the event log, forwards updates
//! to the submitting client's socket, and folds lifecycle changes back
//! into the session record.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use acpx_acp::{AcpClient, ClientEvent, ClientOptions, PermissionConfig, ResumeSession};
use acpx_core::acp::{ContentBlock, SessionUpdate};
use acpx_core::error::Result;
use acpx_core::permission::NonInteractivePolicy;
use acpx_core::queue_wire::{PromptOutcome, QueueReply};
use acpx_core::record::EventLogManifest;
use acpx_core::SessionRecord;
use acpx_queue::{ActiveController, Lifecycle, OwnerHandler, PromptTask, ReplySender, TurnController};
use acpx_store::{EventWriter, SessionStore};

/// Bounded wait for a cancel to settle the active prompt
const CANCEL_WAIT: Duration = Duration::from_secs(5);

/// Grace period when shutting the agent down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum LogCmd {
    Append(Value),
    Checkpoint(oneshot::Sender<(EventLogManifest, u64, Option<u64>)>),
}

/// The task currently allowed to receive streamed events
struct CurrentTask {
    request_id: String,
    reply: ReplySender,
    agent_text: String,
}

/// Cancel view handed (weakly) to the turn controller
struct PromptCancel {
    client: Arc<AcpClient>,
}

impl ActiveController for PromptCancel {
    fn request_cancel(&self) {
        self.client.request_cancel_active_prompt();
    }
}

struct ActiveClient {
    client: Arc<AcpClient>,
    // Keeps the turn controller's weak reference alive.
    controller: Arc<PromptCancel>,
    log_tx: mpsc::UnboundedSender<LogCmd>,
    log_task: tokio::task::JoinHandle<()>,
    /// `session/load` failure surfaced on the next prompt outcome
    pending_load_error: Option<String>,
}

/// Everything a queue owner needs to serve one session
pub struct OwnerRuntime {
    store: SessionStore,
    turn: Arc<TurnController>,
    record: tokio::sync::Mutex<SessionRecord>,
    active: tokio::sync::Mutex<Option<ActiveClient>>,
    current_task: Arc<std::sync::Mutex<Option<CurrentTask>>>,
}

impl OwnerRuntime {
    pub fn new(store: SessionStore, record: SessionRecord, turn: Arc<TurnController>) -> Self {
        Self {
            store,
            turn,
            record: tokio::sync::Mutex::new(record),
            active: tokio::sync::Mutex::new(None),
            current_task: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    async fn persist(&self) {
        let record = self.record.lock().await.clone();
        if let Err(err) = self.store.write_session_record(&record).await {
            tracing::warn!("failed to persist session record: {}", err);
        }
    }

    /// Start the agent client on first use and keep it for later tasks
    async fn ensure_client(&self) -> Result<Arc<AcpClient>> {
        let mut active = self.active.lock().await;
        if let Some(active) = active.as_ref() {
            return Ok(Arc::clone(&active.client));
        }

        let (record_snapshot, resume) = {
            let record = self.record.lock().await;
            let resume = if record.protocol_version.is_some() {
                Some(ResumeSession {
                    acp_session_id: record.acp_session_id.clone(),
                    agent_session_id: record.agent_session_id.clone(),
                })
            } else {
                // Never initialized: there is nothing the agent could load.
                None
            };
            (record.clone(), resume)
        };

        // The event pump must exist before the first frame flows.
        let (log_tx, log_rx) = mpsc::unbounded_channel::<LogCmd>();
        let writer = EventWriter::open(self.store.paths().clone(), &record_snapshot).await;
        let log_task = tokio::spawn(log_pump(writer, log_rx));

        let sink_log_tx = log_tx.clone();
        let sink_current = Arc::clone(&self.current_task);
        let sink: acpx_acp::EventSink = Arc::new(move |event| match event {
            ClientEvent::Frame(frame) => {
                let _ = sink_log_tx.send(LogCmd::Append(frame));
            }
            ClientEvent::Update(notification) => {
                let mut guard = sink_current.lock().unwrap();
                if let Some(task) = guard.as_mut() {
                    if let SessionUpdate::AgentMessageChunk { content } = &notification.update {
                        if let Some(text) = content.as_text() {
                            task.agent_text.push_str(text);
                        }
                    }
                    task.reply.send(QueueReply::SessionUpdate {
                        request_id: task.request_id.clone(),
                        notification,
                    });
                }
            }
            ClientEvent::Operation(operation) => {
                let guard = sink_current.lock().unwrap();
                if let Some(task) = guard.as_ref() {
                    task.reply.send(QueueReply::ClientOperation {
                        request_id: task.request_id.clone(),
                        operation,
                    });
                }
            }
        });

        let client = AcpClient::start(
            ClientOptions {
                agent_command: record_snapshot.agent_command.clone(),
                cwd: record_snapshot.cwd.clone(),
                permission: PermissionConfig::default(),
                request_timeout: None,
            },
            sink,
        )
        .await?;

        let init = client.initialize().await?;
        let connect = client.connect_session(resume).await?;

        {
            let mut record = self.record.lock().await;
            record.protocol_version = Some(init.protocol_version);
            record.agent_capabilities = Some(init.agent_capabilities.clone());
            record.acp_session_id = connect.session_id.clone();
            if connect.agent_session_id.is_some() {
                record.agent_session_id = connect.agent_session_id.clone();
            }
            if let Some(snapshot) = client.lifecycle_snapshot() {
                if let Some(pid) = snapshot.pid {
                    record.record_agent_started(pid);
                }
            }
            record.touch();
        }
        self.persist().await;

        let client = Arc::new(client);
        let controller = Arc::new(PromptCancel {
            client: Arc::clone(&client),
        });
        self.turn.attach_active_controller(
            Arc::downgrade(&controller) as std::sync::Weak<dyn ActiveController>
        );

        *active = Some(ActiveClient {
            client: Arc::clone(&client),
            controller,
            log_tx,
            log_task,
            pending_load_error: connect.load_error,
        });
        Ok(client)
    }

    /// Fold the event-log state into the record
    async fn checkpoint_log(&self) {
        let log_tx = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(active) => active.log_tx.clone(),
                None => return,
            }
        };
        let (tx, rx) = oneshot::channel();
        if log_tx.send(LogCmd::Checkpoint(tx)).is_err() {
            return;
        }
        if let Ok((manifest, last_seq, last_request_id)) = rx.await {
            let mut record = self.record.lock().await;
            record.event_log = manifest;
            record.last_seq = last_seq;
            record.last_request_id = last_request_id;
        }
    }

    fn take_pending_load_error(active: &mut Option<ActiveClient>) -> Option<String> {
        active.as_mut().and_then(|a| a.pending_load_error.take())
    }

    /// Close the live client and drain the event pump
    ///
    /// The pump only ends once every sender is gone, including the one
    /// captured by the client's sink, so the client Arc must be dropped
    /// before the pump task is awaited.
    async fn teardown_active(&self) {
        let active = self.active.lock().await.take();
        let Some(active) = active else { return };
        let ActiveClient {
            client,
            controller,
            log_tx,
            log_task,
            pending_load_error: _,
        } = active;

        self.turn.clear_active_controller();
        drop(controller);

        if let Some(exit) = client.close(SHUTDOWN_GRACE).await {
            let mut record = self.record.lock().await;
            record.record_agent_exit(&exit);
        }

        // Checkpoint behind every queued append, then end the pump.
        let (tx, rx) = oneshot::channel();
        if log_tx.send(LogCmd::Checkpoint(tx)).is_ok() {
            if let Ok((manifest, last_seq, last_request_id)) = rx.await {
                let mut record = self.record.lock().await;
                record.event_log = manifest;
                record.last_seq = last_seq;
                record.last_request_id = last_request_id;
            }
        }
        drop(log_tx);
        drop(client);
        if tokio::time::timeout(Duration::from_secs(5), log_task)
            .await
            .is_err()
        {
            tracing::warn!("event log pump did not drain in time");
        }
    }
}

async fn log_pump(mut writer: EventWriter, mut rx: mpsc::UnboundedReceiver<LogCmd>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCmd::Append(frame) => writer.append_message(&frame).await,
            LogCmd::Checkpoint(tx) => {
                let _ = tx.send((
                    writer.manifest().clone(),
                    writer.last_seq(),
                    writer.last_request_id(),
                ));
            }
        }
    }
}

#[async_trait]
impl OwnerHandler for OwnerRuntime {
    async fn run_prompt(&self, task: &PromptTask) -> Result<PromptOutcome> {
        let client = self.ensure_client().await?;

        // Each submission carries its own permission behavior; the owner
        // itself never has a TTY.
        client.set_permission_config(PermissionConfig {
            mode: task.permission_mode,
            non_interactive: task
                .non_interactive_permissions
                .unwrap_or(NonInteractivePolicy::Deny),
            interactive: false,
        });

        *self.current_task.lock().unwrap() = Some(CurrentTask {
            request_id: task.request_id.clone(),
            reply: task.reply.clone(),
            agent_text: String::new(),
        });
        let current = Arc::clone(&self.current_task);
        let _clear = scopeguard::guard((), move |_| {
            *current.lock().unwrap() = None;
        });

        {
            let mut record = self.record.lock().await;
            record.push_user_message(vec![ContentBlock::text(&task.message)]);
            record.mark_prompt_started();
        }

        // The starting -> active transition happens once the prompt frame
        // is actually on the wire; a cancel pending from the starting
        // window is applied exactly there.
        let watcher_turn = Arc::clone(&self.turn);
        let watcher_client = Arc::clone(&client);
        let activation = tokio::spawn(async move {
            for _ in 0..400 {
                if watcher_client.prompt_in_flight() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            watcher_turn.mark_prompt_active();
        });

        let timeout = task.timeout_ms.map(Duration::from_millis);
        let result = client.prompt(&task.message, timeout).await;
        activation.abort();

        let agent_text = self
            .current_task
            .lock()
            .unwrap()
            .as_mut()
            .map(|t| std::mem::take(&mut t.agent_text))
            .unwrap_or_default();

        // Leave the record valid on disk whichever way the turn ended.
        self.checkpoint_log().await;
        {
            let mut record = self.record.lock().await;
            if !agent_text.is_empty() {
                record.push_agent_message(vec![ContentBlock::text(agent_text)]);
            }
            record.mark_prompt_finished();
            if let Some(snapshot) = client.lifecycle_snapshot() {
                record.pid = snapshot.pid;
                if let Some(exit) = snapshot.last_exit {
                    record.record_agent_exit(&exit);
                }
            }
        }
        self.persist().await;

        let prompt_result = match result {
            Ok(prompt_result) => prompt_result,
            Err(error) => {
                // A dead agent cannot serve the next task; tear the
                // client down so the following prompt restarts it.
                if error.detail_code.as_deref()
                    == Some(acpx_core::error::detail::AGENT_DISCONNECTED)
                {
                    drop(client);
                    self.teardown_active().await;
                    self.persist().await;
                }
                return Err(error);
            }
        };
        let load_error = Self::take_pending_load_error(&mut *self.active.lock().await);
        Ok(PromptOutcome {
            stop_reason: prompt_result.stop_reason,
            load_error,
            permission_stats: client.permission_stats(),
        })
    }

    async fn cancel_prompt(&self) -> Result<bool> {
        match self.turn.lifecycle() {
            Lifecycle::Active => {
                let client = self
                    .active
                    .lock()
                    .await
                    .as_ref()
                    .map(|active| Arc::clone(&active.client));
                match client {
                    Some(client) => Ok(client.cancel_active_prompt(CANCEL_WAIT).await),
                    None => Ok(false),
                }
            }
            // Accepted now, applied at the starting -> active transition.
            Lifecycle::Starting => Ok(self.turn.request_cancel()),
            Lifecycle::Idle | Lifecycle::Closing => Ok(false),
        }
    }

    async fn set_mode(&self, mode_id: &str, timeout_ms: Option<u64>) -> Result<()> {
        let client = self.ensure_client().await?;
        client
            .set_session_mode(mode_id, timeout_ms.map(Duration::from_millis))
            .await?;
        {
            let mut record = self.record.lock().await;
            record.touch();
        }
        self.persist().await;
        Ok(())
    }

    async fn set_config_option(
        &self,
        config_id: &str,
        value: &Value,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<Value>> {
        let client = self.ensure_client().await?;
        let config_options = client
            .set_session_config_option(
                config_id,
                value.clone(),
                timeout_ms.map(Duration::from_millis),
            )
            .await?;
        {
            let mut record = self.record.lock().await;
            record.touch();
        }
        self.persist().await;
        Ok(config_options)
    }

    async fn shutdown(&self) {
        self.teardown_active().await;
        {
            let mut record = self.record.lock().await;
            record.touch();
        }
        self.persist().await;
    }
}
