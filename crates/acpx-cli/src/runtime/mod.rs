//! Session runtime facade
//!
//! The user-level verbs behind the CLI: one-shot prompts, session
//! creation and lookup, the warm prompt path through the queue owner,
//! control operations with a direct-connection fallback, and close.

pub mod owner_runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use acpx_acp::{AcpClient, ClientEvent, ClientOptions, PermissionConfig, ResumeSession};
use acpx_core::error::{AcpxError, Result};
use acpx_core::permission::{NonInteractivePolicy, PermissionMode, PermissionStats};
use acpx_core::queue_wire::{PromptOutcome, QueueReply, QueueRequest};
use acpx_core::ttl::normalize_idle_ttl;
use acpx_core::SessionRecord;
use serde_json::Value;

use crate::output::OutputSink;
use owner_runtime::OwnerRuntime;

/// Grace period for closing short-lived clients
const CLIENT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// How long close_session waits for the owner and agent to die
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// Which agent to talk to, and where
#[derive(Debug, Clone)]
pub struct AgentTarget {
    pub agent_command: String,
    pub cwd: PathBuf,
    pub name: Option<String>,
}

/// Per-prompt knobs
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub permission_mode: PermissionMode,
    pub non_interactive: Option<NonInteractivePolicy>,
    pub timeout_ms: Option<u64>,
    pub wait_for_completion: bool,
    /// Idle TTL handed to a freshly spawned owner (milliseconds)
    pub ttl_ms: Option<f64>,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            permission_mode: PermissionMode::default(),
            non_interactive: None,
            timeout_ms: None,
            wait_for_completion: true,
            ttl_ms: None,
        }
    }
}

/// What a warm-path submission produced
#[derive(Debug)]
pub enum SendOutcome {
    Completed(PromptOutcome),
    Queued { request_id: String },
}

/// The session runtime facade
#[derive(Clone)]
pub struct Runtime {
    store: acpx_store::SessionStore,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            store: acpx_store::SessionStore::new(acpx_store::StorePaths::discover()),
        }
    }

    pub fn with_paths(paths: acpx_store::StorePaths) -> Self {
        Self {
            store: acpx_store::SessionStore::new(paths),
        }
    }

    pub fn store(&self) -> &acpx_store::SessionStore {
        &self.store
    }

    /// One-shot prompt: fresh agent, fresh session, no queue owner, no
    /// persistence
    pub async fn run_once(
        &self,
        target: &AgentTarget,
        message: &str,
        settings: &PromptSettings,
        sink: &mut dyn OutputSink,
    ) -> Result<PromptOutcome> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let event_sink: acpx_acp::EventSink = Arc::new(move |event| {
            let _ = event_tx.send(event);
        });

        let client = AcpClient::start(
            ClientOptions {
                agent_command: target.agent_command.clone(),
                cwd: target.cwd.clone(),
                permission: PermissionConfig {
                    mode: settings.permission_mode,
                    non_interactive: settings.non_interactive.unwrap_or_default(),
                    interactive: stdin_is_tty(),
                },
                request_timeout: settings.timeout_ms.map(Duration::from_millis),
            },
            event_sink,
        )
        .await?;

        let result = async {
            client.initialize().await?;
            let connect = client.connect_session(None).await?;
            sink.set_context(&connect.session_id, "run-once");

            let prompt = client.prompt(message, settings.timeout_ms.map(Duration::from_millis));
            tokio::pin!(prompt);
            let prompt_result = loop {
                tokio::select! {
                    result = &mut prompt => break result,
                    Some(event) = event_rx.recv() => forward_event(sink, event),
                    _ = interrupt_signal() => {
                        client.cancel_active_prompt(Duration::from_secs(2)).await;
                        return Err(AcpxError::interrupted());
                    }
                }
            };
            // Drain whatever the reader produced before settling.
            while let Ok(event) = event_rx.try_recv() {
                forward_event(sink, event);
            }
            let prompt_result = prompt_result?;
            sink.on_done(&prompt_result.stop_reason);
            sink.flush();
            Ok(PromptOutcome {
                stop_reason: prompt_result.stop_reason,
                load_error: None,
                permission_stats: client.permission_stats(),
            })
        }
        .await;

        client.close(CLIENT_CLOSE_GRACE).await;
        result
    }

    /// Create and persist a fresh session; the owner is not started here
    pub async fn create_session(&self, target: &AgentTarget) -> Result<SessionRecord> {
        let key = acpx_store::SessionKey {
            agent_command: &target.agent_command,
            cwd: &target.cwd,
            name: target.name.as_deref(),
            include_closed: false,
        };
        if let Some(existing) = self.store.find_session(&key).await? {
            return Err(AcpxError::usage(format!(
                "session already exists for this agent and directory: {}",
                existing.acpx_record_id
            )));
        }

        let sink: acpx_acp::EventSink = Arc::new(|_| {});
        let client = AcpClient::start(
            ClientOptions {
                agent_command: target.agent_command.clone(),
                cwd: target.cwd.clone(),
                permission: PermissionConfig::default(),
                request_timeout: Some(Duration::from_secs(60)),
            },
            sink,
        )
        .await?;

        let result = async {
            let init = client.initialize().await?;
            let connect = client.connect_session(None).await?;

            let mut record = SessionRecord::new(&target.agent_command, &target.cwd)
                .with_name(target.name.clone());
            record.acp_session_id = connect.session_id;
            record.agent_session_id = connect.agent_session_id;
            record.protocol_version = Some(init.protocol_version);
            record.agent_capabilities = Some(init.agent_capabilities);
            self.store.write_session_record(&record).await?;
            Ok(record)
        }
        .await;

        client.close(CLIENT_CLOSE_GRACE).await;
        result
    }

    /// Find a session by walking from `cwd` up to the repository root,
    /// creating one when nothing matches
    pub async fn ensure_session(&self, target: &AgentTarget) -> Result<SessionRecord> {
        let boundary = acpx_store::find_repo_root(&target.cwd);
        let key = acpx_store::SessionKey {
            agent_command: &target.agent_command,
            cwd: &target.cwd,
            name: target.name.as_deref(),
            include_closed: false,
        };
        if let Some(found) = self
            .store
            .find_session_by_directory_walk(&key, boundary.as_deref())
            .await?
        {
            return Ok(found);
        }
        self.create_session(target).await
    }

    /// The warm prompt path: submit to the running owner, spawning one
    /// when none is reachable
    pub async fn send_session(
        &self,
        record: &SessionRecord,
        message: &str,
        settings: &PromptSettings,
        sink: &mut dyn OutputSink,
    ) -> Result<SendOutcome> {
        let record_id = record.acpx_record_id.to_string();
        let request_id = uuid::Uuid::new_v4().to_string();
        sink.set_context(&record.acp_session_id, &request_id);

        let request = QueueRequest::SubmitPrompt {
            request_id: request_id.clone(),
            message: message.to_string(),
            permission_mode: settings.permission_mode,
            non_interactive_permissions: settings.non_interactive,
            timeout_ms: settings.timeout_ms,
            wait_for_completion: settings.wait_for_completion,
            suppress_sdk_console_errors: None,
        };

        let ttl_ms = normalize_idle_ttl(settings.ttl_ms);
        let spawn_record_id = record_id.clone();
        let spawn_owner = move || -> Result<()> {
            let spec = acpx_queue::OwnerSpawnSpec::current_exe(&spawn_record_id, Some(ttl_ms))?;
            acpx_queue::spawn_detached_owner(&spec)?;
            Ok(())
        };

        let mut on_reply = |reply: &QueueReply| match reply {
            QueueReply::SessionUpdate { notification, .. } => sink.on_session_update(notification),
            QueueReply::ClientOperation { operation, .. } => sink.on_client_operation(operation),
            QueueReply::Done { stop_reason, .. } => sink.on_done(stop_reason),
            _ => {}
        };

        let outcome = acpx_queue::submit_prompt_or_spawn(
            self.store.paths(),
            &record_id,
            &request,
            &spawn_owner,
            &mut on_reply,
        )
        .await?;

        sink.flush();
        Ok(match outcome {
            acpx_queue::SubmitOutcome::Completed(result) => SendOutcome::Completed(result),
            acpx_queue::SubmitOutcome::Queued { request_id, .. } => {
                SendOutcome::Queued { request_id }
            }
        })
    }

    /// Cancel whatever prompt is active on the session's owner
    ///
    /// No owner means no active prompt: reports `false`.
    pub async fn cancel_session_prompt(&self, record: &SessionRecord) -> Result<bool> {
        let record_id = record.acpx_record_id.to_string();
        let request = QueueRequest::CancelPrompt {
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        match acpx_queue::try_control(self.store.paths(), &record_id, &request).await? {
            Some(acpx_queue::ControlOutcome::Cancel(cancelled)) => Ok(cancelled),
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    /// Set the session mode, preferring the running owner
    pub async fn set_session_mode(
        &self,
        record: &SessionRecord,
        mode_id: &str,
        timeout_ms: Option<u64>,
    ) -> Result<()> {
        let record_id = record.acpx_record_id.to_string();
        let request = QueueRequest::SetMode {
            request_id: uuid::Uuid::new_v4().to_string(),
            mode_id: mode_id.to_string(),
            timeout_ms,
        };
        match acpx_queue::try_control(self.store.paths(), &record_id, &request).await? {
            Some(_) => Ok(()),
            None => {
                let mode_id = mode_id.to_string();
                self.with_connected_session(record, |client| async move {
                    client
                        .set_session_mode(&mode_id, timeout_ms.map(Duration::from_millis))
                        .await
                })
                .await
            }
        }
    }

    /// Set a config option, preferring the running owner
    pub async fn set_session_config_option(
        &self,
        record: &SessionRecord,
        config_id: &str,
        value: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<Value>> {
        let record_id = record.acpx_record_id.to_string();
        let request = QueueRequest::SetConfigOption {
            request_id: uuid::Uuid::new_v4().to_string(),
            config_id: config_id.to_string(),
            value: value.clone(),
            timeout_ms,
        };
        match acpx_queue::try_control(self.store.paths(), &record_id, &request).await? {
            Some(acpx_queue::ControlOutcome::ConfigOptions(config_options)) => Ok(config_options),
            Some(_) => Ok(Vec::new()),
            None => {
                let config_id = config_id.to_string();
                self.with_connected_session(record, |client| async move {
                    client
                        .set_session_config_option(
                            &config_id,
                            value,
                            timeout_ms.map(Duration::from_millis),
                        )
                        .await
                })
                .await
            }
        }
    }

    /// Short-lived direct connection: start, load-or-new, perform the
    /// operation, disconnect
    async fn with_connected_session<F, Fut, T>(
        &self,
        record: &SessionRecord,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<AcpClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let sink: acpx_acp::EventSink = Arc::new(|_| {});
        let client = Arc::new(
            AcpClient::start(
                ClientOptions {
                    agent_command: record.agent_command.clone(),
                    cwd: record.cwd.clone(),
                    permission: PermissionConfig::default(),
                    request_timeout: Some(Duration::from_secs(60)),
                },
                sink,
            )
            .await?,
        );

        let result = async {
            client.initialize().await?;
            let connect = client
                .connect_session(Some(ResumeSession {
                    acp_session_id: record.acp_session_id.clone(),
                    agent_session_id: record.agent_session_id.clone(),
                }))
                .await?;

            let mut updated = record.clone();
            updated.acp_session_id = connect.session_id;
            if connect.agent_session_id.is_some() {
                updated.agent_session_id = connect.agent_session_id;
            }
            updated.touch();
            self.store.write_session_record(&updated).await?;

            op(Arc::clone(&client)).await
        }
        .await;

        client.close(CLIENT_CLOSE_GRACE).await;
        result
    }

    /// Close a session: stop its owner, kill a lingering agent, mark the
    /// record closed
    pub async fn close_session(&self, record: &SessionRecord) -> Result<()> {
        let record_id = record.acpx_record_id.to_string();
        let lock_path = self.store.paths().lock_path(&record_id);
        let socket_path = self.store.paths().socket_path(&record_id);

        if let Some(info) = acpx_queue::read_lock(&lock_path) {
            if acpx_acp::pid_alive(info.pid) {
                tracing::debug!("terminating queue owner pid {}", info.pid);
                acpx_acp::process::terminate_pid(info.pid);
                wait_for_death(info.pid, CLOSE_WAIT).await;
                if acpx_acp::pid_alive(info.pid) {
                    acpx_acp::process::kill_pid(info.pid);
                }
            }
            acpx_queue::lease::clean_stale(&lock_path, &socket_path);
        }

        // The owner normally reaps the agent; catch one it left behind.
        let mut updated = self.store.resolve_session_record(&record_id).await?;
        if let Some(pid) = updated.pid {
            if acpx_acp::pid_matches_command(pid, &updated.agent_command) {
                tracing::debug!("terminating agent pid {}", pid);
                acpx_acp::process::terminate_pid(pid);
                wait_for_death(pid, Duration::from_secs(2)).await;
                if acpx_acp::pid_alive(pid) {
                    acpx_acp::process::kill_pid(pid);
                }
            }
            updated.pid = None;
        }

        updated.mark_closed();
        self.store.write_session_record(&updated).await?;
        Ok(())
    }

    /// Entry point of the detached `queue-owner` process
    pub async fn run_owner(&self, record_id: &str, ttl_ms: Option<f64>) -> Result<()> {
        let record = self.store.resolve_session_record(record_id).await?;
        if record.closed {
            return Err(AcpxError::no_session(format!(
                "session {} is closed",
                record_id
            )));
        }

        let lease = match acpx_queue::acquire(self.store.paths(), &record.acpx_record_id.to_string())
            .await?
        {
            acpx_queue::Acquire::Acquired(lease) => lease,
            acpx_queue::Acquire::OwnerRunning(info) => {
                tracing::info!("owner already running (pid {}), exiting", info.pid);
                return Ok(());
            }
        };

        let turn = Arc::new(acpx_queue::TurnController::new());
        let handler = Arc::new(OwnerRuntime::new(
            self.store.clone(),
            record.clone(),
            Arc::clone(&turn),
        ));
        let owner = acpx_queue::QueueOwner::new(
            lease,
            record.acpx_record_id.to_string(),
            handler,
            turn,
            normalize_idle_ttl(ttl_ms),
        );
        owner.run().await
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_event(sink: &mut dyn OutputSink, event: ClientEvent) {
    match event {
        ClientEvent::Update(notification) => sink.on_session_update(&notification),
        ClientEvent::Operation(operation) => sink.on_client_operation(&operation),
        // Raw frames feed the event log, which run_once does not keep.
        ClientEvent::Frame(_) => {}
    }
}

fn stdin_is_tty() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

/// Resolve when the process is interrupted (SIGINT or SIGTERM)
///
/// Both signals share the interrupt path: cancel the active prompt
/// within a bounded wait, then exit 130.
pub(crate) async fn interrupt_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::warn!("cannot install SIGTERM handler: {}", err);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn wait_for_death(pid: u32, budget: Duration) {
    let deadline = tokio::time::Instant::now() + budget;
    while acpx_acp::pid_alive(pid) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Map a settled prompt to the process exit code
///
/// A turn where every permission request was denied exits non-zero even
/// though the prompt itself succeeded.
pub fn prompt_exit_code(stats: &PermissionStats) -> i32 {
    if stats.all_denied() {
        acpx_core::exit_code::PERMISSION_DENIED
    } else {
        acpx_core::exit_code::SUCCESS
    }
}
