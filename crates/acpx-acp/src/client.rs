//! ACP client
//!
//! The stream-oriented JSON-RPC client that drives one agent subprocess.
//! A dedicated reader task owns the agent's stdout and dispatches every
//! frame: responses complete pending outbound requests, `session/update`
//! notifications fan out to the caller's sink, and inbound `fs/*`,
//! `terminal/*` and permission requests are handled locally and answered
//! through the shared writer.
//!
//! Replay suppression: while a `session/load` is outstanding, inbound
//! `session/update` notifications are dropped before they reach either
//! the sink or the event mirror, so a resumed session never duplicates
//! its history.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use acpx_core::acp::{self, method};
use acpx_core::error::{AcpxError, Result};
use acpx_core::jsonrpc::{
    self, error_frame, notification_frame, request_frame, response_frame, JsonRpcMessage,
    RpcErrorObject,
};
use acpx_core::permission::PermissionStats;
use acpx_core::record::AgentExit;
use serde_json::Value;

use crate::fs::FsHandler;
use crate::permissions::{self, PermissionConfig, Resolution};
use crate::process::{AgentCommand, AgentProcess, LifecycleSnapshot};
use crate::rpc::{disconnected_error, PendingMap, RpcFailure};
use crate::terminal::TerminalRegistry;

/// Default grace period for agent shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one ACP client instance
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Verbatim agent command line
    pub agent_command: String,
    /// Working directory of the agent and root of the fs sandbox
    pub cwd: PathBuf,
    pub permission: PermissionConfig,
    /// Default timeout applied to outbound requests
    pub request_timeout: Option<Duration>,
}

/// Events the client pushes to its owner
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Raw wire frame, both directions, after replay suppression
    Frame(Value),
    /// A parsed, unsuppressed `session/update`
    Update(acp::SessionNotification),
    /// A local operation performed on the agent's behalf
    Operation(Value),
}

/// Sink receiving [`ClientEvent`]s; must not block
pub type EventSink = Arc<dyn Fn(ClientEvent) + Send + Sync>;

/// Stored ids used to resume a session
#[derive(Debug, Clone)]
pub struct ResumeSession {
    pub acp_session_id: String,
    pub agent_session_id: Option<String>,
}

/// How `connect_session` ended up attaching to the agent
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub session_id: String,
    pub agent_session_id: Option<String>,
    /// Original load failure when the session fell back to `session/new`
    pub load_error: Option<String>,
    pub created_new: bool,
}

struct ClientInner {
    writer: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    session_id: std::sync::Mutex<Option<String>>,
    negotiated: std::sync::Mutex<Option<acp::InitializeResult>>,
    suppress_updates: AtomicBool,
    sink: EventSink,
    permission: std::sync::Mutex<PermissionConfig>,
    stats: std::sync::Mutex<PermissionStats>,
    fs: FsHandler,
    terminals: TerminalRegistry,
    /// A client-side failure that must preempt the prompt result
    fatal: std::sync::Mutex<Option<AcpxError>>,
    prompt_active: AtomicBool,
    prompt_settled: tokio::sync::Notify,
}

impl ClientInner {
    fn emit_frame(&self, frame: &Value) {
        (self.sink)(ClientEvent::Frame(frame.clone()));
    }

    fn emit_operation(&self, operation: Value) {
        (self.sink)(ClientEvent::Operation(operation));
    }

    async fn write_frame(&self, frame: &Value) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(disconnected_error)?;
        writer.write_all(line.as_bytes()).await.map_err(|_| disconnected_error())?;
        writer.flush().await.map_err(|_| disconnected_error())?;
        Ok(())
    }

    async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> std::result::Result<Value, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = request_frame(id, method, params);
        let rx = self.pending.register(id);

        self.emit_frame(&frame);
        if let Err(err) = self.write_frame(&frame).await {
            self.pending.forget(id);
            return Err(RpcFailure::Transport(err));
        }

        let settle = async {
            match rx.await {
                Ok(outcome) => outcome.map_err(RpcFailure::Agent),
                Err(_) => Err(RpcFailure::Transport(disconnected_error())),
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, settle).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.forget(id);
                    Err(RpcFailure::Transport(AcpxError::timeout(format!(
                        "{} timed out after {:?}",
                        method, limit
                    ))))
                }
            },
            None => settle.await,
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let frame = notification_frame(method, params);
        self.emit_frame(&frame);
        self.write_frame(&frame).await
    }

    fn current_session_id(&self) -> Result<String> {
        self.session_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AcpxError::runtime("no session established on this client"))
    }

    fn set_fatal(&self, error: AcpxError) {
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    /// Dispatch one inbound request from the agent
    async fn handle_inbound(
        self: &Arc<Self>,
        request_method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcErrorObject> {
        let params = params.unwrap_or(Value::Null);
        match request_method {
            method::SESSION_REQUEST_PERMISSION => {
                let params: acp::RequestPermissionParams = parse_params(params)?;
                self.handle_permission(params).await
            }
            method::FS_READ_TEXT_FILE => {
                let params: acp::ReadTextFileParams = parse_params(params)?;
                self.fs.read_text_file(params).await
            }
            method::FS_WRITE_TEXT_FILE => {
                let params: acp::WriteTextFileParams = parse_params(params)?;
                let path = params.path.clone();
                let result = self.fs.write_text_file(params).await?;
                self.emit_operation(serde_json::json!({
                    "type": "fs_write",
                    "path": path,
                }));
                Ok(result)
            }
            method::TERMINAL_CREATE => {
                let params: acp::CreateTerminalParams = parse_params(params)?;
                self.handle_terminal_create(params).await
            }
            method::TERMINAL_OUTPUT => {
                let params: acp::TerminalIdParams = parse_params(params)?;
                self.terminals.output(&params.terminal_id)
            }
            method::TERMINAL_WAIT_FOR_EXIT => {
                let params: acp::TerminalIdParams = parse_params(params)?;
                self.terminals.wait_for_exit(&params.terminal_id).await
            }
            method::TERMINAL_KILL => {
                let params: acp::TerminalIdParams = parse_params(params)?;
                self.terminals.kill(&params.terminal_id)
            }
            method::TERMINAL_RELEASE => {
                let params: acp::TerminalIdParams = parse_params(params)?;
                self.terminals.release(&params.terminal_id)
            }
            unknown => Err(RpcErrorObject {
                code: jsonrpc::codes::METHOD_NOT_FOUND,
                message: format!("method not supported: {}", unknown),
                data: None,
            }),
        }
    }

    async fn handle_permission(
        self: &Arc<Self>,
        params: acp::RequestPermissionParams,
    ) -> std::result::Result<Value, RpcErrorObject> {
        // Counters accumulate into a local copy so the shared stats are
        // never held across the interactive await.
        let config = *self.permission.lock().unwrap();
        let mut local = PermissionStats::default();
        let resolution = permissions::resolve(
            &config,
            &params,
            &mut local,
            Box::new(|label| {
                Box::pin(async move {
                    tokio::task::spawn_blocking(move || permissions::ask_on_tty(&label))
                        .await
                        .unwrap_or(false)
                })
            }),
        )
        .await;
        self.stats.lock().unwrap().absorb(&local);

        self.emit_operation(serde_json::json!({
            "type": "permission_decision",
            "toolCallId": params.tool_call.tool_call_id,
            "resolution": match &resolution {
                Resolution::Outcome(acp::PermissionOutcome::Selected { option_id }) => {
                    serde_json::json!({"selected": option_id})
                }
                Resolution::Outcome(acp::PermissionOutcome::Cancelled) => {
                    serde_json::json!("cancelled")
                }
                Resolution::PromptUnavailable => serde_json::json!("prompt_unavailable"),
            },
        }));

        match resolution {
            Resolution::Outcome(outcome) => {
                serde_json::to_value(acp::RequestPermissionResult { outcome }).map_err(|e| {
                    RpcErrorObject {
                        code: jsonrpc::codes::INTERNAL_ERROR,
                        message: e.to_string(),
                        data: None,
                    }
                })
            }
            Resolution::PromptUnavailable => {
                self.set_fatal(AcpxError::permission_prompt_unavailable(
                    "interactive permission prompt required but unavailable",
                ));
                self.spawn_cancel();
                Err(RpcErrorObject {
                    code: jsonrpc::codes::INTERNAL_ERROR,
                    message: "permission prompt unavailable".to_string(),
                    data: None,
                })
            }
        }
    }

    async fn handle_terminal_create(
        self: &Arc<Self>,
        params: acp::CreateTerminalParams,
    ) -> std::result::Result<Value, RpcErrorObject> {
        use acpx_core::permission::{decide, PermissionDecision, ToolKind};

        let config = *self.permission.lock().unwrap();
        let decision = decide(
            config.mode,
            ToolKind::Execute,
            config.interactive,
            config.non_interactive,
        );
        let command_line = if params.args.is_empty() {
            params.command.clone()
        } else {
            format!("{} {}", params.command, params.args.join(" "))
        };
        match decision {
            PermissionDecision::SelectAllow => {}
            PermissionDecision::AskUser => {
                let label = format!("run `{}`", command_line);
                let allowed =
                    tokio::task::spawn_blocking(move || permissions::ask_on_tty(&label))
                        .await
                        .unwrap_or(false);
                if !allowed {
                    return Err(RpcErrorObject {
                        code: jsonrpc::codes::INVALID_PARAMS,
                        message: format!("command execution denied: {}", command_line),
                        data: None,
                    });
                }
            }
            PermissionDecision::SelectReject => {
                return Err(RpcErrorObject {
                    code: jsonrpc::codes::INVALID_PARAMS,
                    message: format!("command execution denied: {}", command_line),
                    data: None,
                });
            }
            PermissionDecision::Fail => {
                self.set_fatal(AcpxError::permission_prompt_unavailable(
                    "interactive permission prompt required but unavailable",
                ));
                self.spawn_cancel();
                return Err(RpcErrorObject {
                    code: jsonrpc::codes::INTERNAL_ERROR,
                    message: "permission prompt unavailable".to_string(),
                    data: None,
                });
            }
        }

        let result = self.terminals.create(params).await?;
        self.emit_operation(serde_json::json!({
            "type": "terminal_create",
            "command": command_line,
            "terminalId": result.get("terminalId"),
        }));
        Ok(result)
    }

    /// Fire a `session/cancel` without waiting
    fn spawn_cancel(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(session_id) = inner.current_session_id() {
                let params = serde_json::to_value(acp::CancelParams { session_id })
                    .unwrap_or(Value::Null);
                let _ = inner.send_notification(method::SESSION_CANCEL, params).await;
            }
        });
    }
}

/// Reader task: classify and dispatch every line of agent stdout
async fn reader_loop(inner: Arc<ClientInner>, mut reader: BufReader<ChildStdout>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("agent stdout read failed: {}", err);
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let raw: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("dropping unparseable agent line: {}", err);
                continue;
            }
        };
        let message = match JsonRpcMessage::from_value(&raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("dropping invalid agent frame: {}", err);
                continue;
            }
        };

        match message {
            JsonRpcMessage::Response { id, result } => {
                inner.emit_frame(&raw);
                match id.as_u64() {
                    Some(id) => inner.pending.complete(id, Ok(result)),
                    None => tracing::warn!("response with unusable id {:?}", id),
                }
            }
            JsonRpcMessage::ErrorResponse { id, error } => {
                inner.emit_frame(&raw);
                if let Some(id) = id.and_then(|id| id.as_u64()) {
                    inner.pending.complete(id, Err(error));
                } else {
                    tracing::warn!("agent error without id: {}", error.message);
                }
            }
            JsonRpcMessage::Notification { method: m, params } => {
                if m == method::SESSION_UPDATE {
                    if inner.suppress_updates.load(Ordering::SeqCst) {
                        tracing::trace!("suppressing replay session/update");
                        continue;
                    }
                    inner.emit_frame(&raw);
                    match serde_json::from_value::<acp::SessionNotification>(
                        params.unwrap_or(Value::Null),
                    ) {
                        Ok(notification) => (inner.sink)(ClientEvent::Update(notification)),
                        Err(err) => tracing::warn!("unparseable session/update: {}", err),
                    }
                } else {
                    inner.emit_frame(&raw);
                    tracing::debug!("ignoring agent notification: {}", m);
                }
            }
            JsonRpcMessage::Request { id, method: m, params } => {
                inner.emit_frame(&raw);
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let frame = match inner.handle_inbound(&m, params).await {
                        Ok(result) => response_frame(&id, result),
                        Err(error) => {
                            let mut frame =
                                error_frame(Some(&id), error.code, &error.message);
                            if let Some(data) = error.data {
                                frame["error"]["data"] = data;
                            }
                            frame
                        }
                    };
                    inner.emit_frame(&frame);
                    if let Err(err) = inner.write_frame(&frame).await {
                        tracing::warn!("failed to answer agent request {}: {}", m, err);
                    }
                });
            }
        }
    }

    tracing::debug!("agent stdout closed");
    inner.pending.fail_all("agent disconnected");
    inner.prompt_settled.notify_waiters();
}

/// One live connection to one agent subprocess
pub struct AcpClient {
    inner: Arc<ClientInner>,
    process: std::sync::Mutex<Option<AgentProcess>>,
    final_snapshot: std::sync::Mutex<Option<LifecycleSnapshot>>,
    reader_task: tokio::task::JoinHandle<()>,
    options: ClientOptions,
}

impl AcpClient {
    /// Spawn the agent and start the reader task
    pub async fn start(options: ClientOptions, sink: EventSink) -> Result<Self> {
        let command = AgentCommand::parse(&options.agent_command)?;
        let (process, stdin, stdout) = AgentProcess::spawn(&command, &options.cwd).await?;

        let inner = Arc::new(ClientInner {
            writer: tokio::sync::Mutex::new(Some(stdin)),
            pending: PendingMap::default(),
            next_id: AtomicU64::new(1),
            session_id: std::sync::Mutex::new(None),
            negotiated: std::sync::Mutex::new(None),
            suppress_updates: AtomicBool::new(false),
            sink,
            permission: std::sync::Mutex::new(options.permission),
            stats: std::sync::Mutex::new(PermissionStats::default()),
            fs: FsHandler::new(&options.cwd),
            terminals: TerminalRegistry::new(&options.cwd),
            fatal: std::sync::Mutex::new(None),
            prompt_active: AtomicBool::new(false),
            prompt_settled: tokio::sync::Notify::new(),
        });

        let reader_task = tokio::spawn(reader_loop(Arc::clone(&inner), stdout));

        Ok(Self {
            inner,
            process: std::sync::Mutex::new(Some(process)),
            final_snapshot: std::sync::Mutex::new(None),
            reader_task,
            options,
        })
    }

    /// Negotiate protocol version and capabilities
    pub async fn initialize(&self) -> Result<acp::InitializeResult> {
        let params = serde_json::to_value(acp::InitializeParams {
            protocol_version: acp::PROTOCOL_VERSION,
            client_capabilities: acp::ClientCapabilities::full(),
        })?;
        let value = self
            .inner
            .send_request(method::INITIALIZE, params, self.options.request_timeout)
            .await
            .map_err(|f| f.into_acpx(method::INITIALIZE))?;
        let result: acp::InitializeResult = serde_json::from_value(value)?;
        *self.inner.negotiated.lock().unwrap() = Some(result.clone());
        tracing::info!(
            "initialized agent: protocol v{}, loadSession={}",
            result.protocol_version,
            result.agent_capabilities.load_session
        );
        Ok(result)
    }

    /// Whether the agent advertises `session/load`
    pub fn supports_load(&self) -> bool {
        self.inner
            .negotiated
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.agent_capabilities.load_session)
            .unwrap_or(false)
    }

    pub fn negotiated(&self) -> Option<acp::InitializeResult> {
        self.inner.negotiated.lock().unwrap().clone()
    }

    /// Attach to a session: load the stored one when possible, fall back
    /// to `session/new` when the agent lost it
    ///
    /// While the load is outstanding, `session/update` notifications are
    /// suppressed so resumed history is not replayed into the output or
    /// the event log.
    pub async fn connect_session(&self, resume: Option<ResumeSession>) -> Result<ConnectOutcome> {
        if let Some(resume) = resume {
            if self.supports_load() {
                return self.load_or_create(resume).await;
            }
            tracing::debug!("agent does not support session/load, creating a new session");
        }
        self.create_session().await
    }

    async fn load_or_create(&self, resume: ResumeSession) -> Result<ConnectOutcome> {
        let params = serde_json::to_value(acp::LoadSessionParams {
            session_id: resume.acp_session_id.clone(),
            agent_session_id: resume.agent_session_id.clone(),
            cwd: self.options.cwd.clone(),
            suppress_replay_updates: true,
        })?;

        self.inner.suppress_updates.store(true, Ordering::SeqCst);
        let outcome = self
            .inner
            .send_request(method::SESSION_LOAD, params, self.options.request_timeout)
            .await;
        self.inner.suppress_updates.store(false, Ordering::SeqCst);

        match outcome {
            Ok(value) => {
                let result: acp::LoadSessionResult = serde_json::from_value(value)?;
                let session_id = result.session_id.unwrap_or(resume.acp_session_id);
                // The load response owns the agent-session namespace; keep
                // the stored id only when the agent stays silent.
                let agent_session_id = result.agent_session_id.or(resume.agent_session_id);
                *self.inner.session_id.lock().unwrap() = Some(session_id.clone());
                Ok(ConnectOutcome {
                    session_id,
                    agent_session_id,
                    load_error: None,
                    created_new: false,
                })
            }
            Err(RpcFailure::Agent(error)) if acp::is_session_not_found(&error) => {
                tracing::info!(
                    "stored session not found ({}), creating a new one",
                    error.message
                );
                let mut outcome = self.create_session().await?;
                outcome.load_error = Some(error.message);
                Ok(outcome)
            }
            Err(failure) => Err(failure.into_acpx(method::SESSION_LOAD)),
        }
    }

    async fn create_session(&self) -> Result<ConnectOutcome> {
        let params = serde_json::to_value(acp::NewSessionParams {
            cwd: self.options.cwd.clone(),
            mcp_servers: Vec::new(),
        })?;
        let value = self
            .inner
            .send_request(method::SESSION_NEW, params, self.options.request_timeout)
            .await
            .map_err(|f| f.into_acpx(method::SESSION_NEW))?;
        let result: acp::NewSessionResult = serde_json::from_value(value)?;
        *self.inner.session_id.lock().unwrap() = Some(result.session_id.clone());
        Ok(ConnectOutcome {
            session_id: result.session_id,
            agent_session_id: None,
            load_error: None,
            created_new: true,
        })
    }

    /// Run one prompt turn; updates stream through the sink while the
    /// request is outstanding
    ///
    /// `prompt_in_flight` turns true only once the request frame is on
    /// the wire, so a cancel observed as "active" always reaches the
    /// agent after the prompt it targets.
    pub async fn prompt(
        &self,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<acp::PromptResult> {
        let session_id = self.inner.current_session_id()?;
        let params = serde_json::to_value(acp::PromptParams {
            session_id,
            prompt: vec![acp::ContentBlock::text(text)],
        })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = request_frame(id, method::SESSION_PROMPT, params);
        let rx = self.inner.pending.register(id);
        self.inner.emit_frame(&frame);
        if let Err(err) = self.inner.write_frame(&frame).await {
            self.inner.pending.forget(id);
            return Err(err);
        }

        self.inner.prompt_active.store(true, Ordering::SeqCst);
        self.set_prompt_in_flight(true);
        let inner = Arc::clone(&self.inner);
        let _settle = scopeguard::guard((), move |_| {
            inner.prompt_active.store(false, Ordering::SeqCst);
            inner.prompt_settled.notify_waiters();
        });

        let settle = async {
            match rx.await {
                Ok(outcome) => outcome.map_err(RpcFailure::Agent),
                Err(_) => Err(RpcFailure::Transport(disconnected_error())),
            }
        };
        let outcome = match timeout.or(self.options.request_timeout) {
            Some(limit) => match tokio::time::timeout(limit, settle).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.pending.forget(id);
                    Err(RpcFailure::Transport(AcpxError::timeout(format!(
                        "session/prompt timed out after {:?}",
                        limit
                    ))))
                }
            },
            None => settle.await,
        };
        self.set_prompt_in_flight(false);

        // A client-side failure (e.g. an unavailable permission prompt)
        // preempts whatever the agent answered.
        if let Some(fatal) = self.inner.fatal.lock().unwrap().take() {
            return Err(fatal);
        }

        let value = outcome.map_err(|f| f.into_acpx(method::SESSION_PROMPT))?;
        let result: acp::PromptResult = serde_json::from_value(value)?;
        Ok(result)
    }

    /// True while a prompt is outstanding
    pub fn prompt_in_flight(&self) -> bool {
        self.inner.prompt_active.load(Ordering::SeqCst)
    }

    /// Send `session/cancel` and wait up to `wait` for the prompt future
    /// to settle; returns whether the cancel took effect
    pub async fn cancel_active_prompt(&self, wait: Duration) -> bool {
        let settled = self.inner.prompt_settled.notified();
        if !self.inner.prompt_active.load(Ordering::SeqCst) {
            return false;
        }
        if let Ok(session_id) = self.inner.current_session_id() {
            let params = serde_json::to_value(acp::CancelParams { session_id })
                .unwrap_or(Value::Null);
            if let Err(err) = self.inner.send_notification(method::SESSION_CANCEL, params).await {
                tracing::warn!("failed to send session/cancel: {}", err);
            }
        }
        let _ = tokio::time::timeout(wait, settled).await;
        !self.inner.prompt_active.load(Ordering::SeqCst)
    }

    /// Non-blocking cancel used from the control path
    pub fn request_cancel_active_prompt(&self) {
        if self.inner.prompt_active.load(Ordering::SeqCst) {
            self.inner.spawn_cancel();
        }
    }

    pub async fn set_session_mode(&self, mode_id: &str, timeout: Option<Duration>) -> Result<()> {
        let session_id = self.inner.current_session_id()?;
        let params = serde_json::to_value(acp::SetModeParams {
            session_id,
            mode_id: mode_id.to_string(),
        })?;
        self.inner
            .send_request(
                method::SESSION_SET_MODE,
                params,
                timeout.or(self.options.request_timeout),
            )
            .await
            .map_err(|f| f.into_acpx(method::SESSION_SET_MODE))?;
        Ok(())
    }

    pub async fn set_session_config_option(
        &self,
        config_id: &str,
        value: Value,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>> {
        let session_id = self.inner.current_session_id()?;
        let params = serde_json::to_value(acp::SetConfigOptionParams {
            session_id,
            config_id: config_id.to_string(),
            value,
        })?;
        let response = self
            .inner
            .send_request(
                method::SESSION_SET_CONFIG_OPTION,
                params,
                timeout.or(self.options.request_timeout),
            )
            .await
            .map_err(|f| f.into_acpx(method::SESSION_SET_CONFIG_OPTION))?;
        let result: acp::SetConfigOptionResult = serde_json::from_value(response)?;
        Ok(result.config_options)
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().unwrap().clone()
    }

    /// Replace the permission behavior for subsequent requests
    ///
    /// Each queued prompt carries its own permission mode; the owner
    /// applies it here before issuing the prompt.
    pub fn set_permission_config(&self, config: PermissionConfig) {
        *self.inner.permission.lock().unwrap() = config;
    }

    fn set_prompt_in_flight(&self, in_flight: bool) {
        if let Some(process) = self.process.lock().unwrap().as_ref() {
            process.set_prompt_in_flight(in_flight);
        }
    }

    pub fn lifecycle_snapshot(&self) -> Option<LifecycleSnapshot> {
        if let Some(process) = self.process.lock().unwrap().as_ref() {
            return Some(process.snapshot());
        }
        self.final_snapshot.lock().unwrap().clone()
    }

    pub fn permission_stats(&self) -> PermissionStats {
        *self.inner.stats.lock().unwrap()
    }

    /// Shut the client down: release terminals, close stdin, wait out the
    /// grace window, kill if needed. Safe to call once; later calls are
    /// no-ops returning `None`.
    pub async fn close(&self, grace: Duration) -> Option<AgentExit> {
        let process = self.process.lock().unwrap().take()?;
        self.inner.terminals.release_all();
        self.inner.writer.lock().await.take();
        let started_at = process.started_at();
        let exit = process.shutdown(grace).await;
        self.reader_task.abort();
        *self.final_snapshot.lock().unwrap() = Some(LifecycleSnapshot {
            pid: None,
            started_at,
            last_exit: Some(exit.clone()),
        });
        Some(exit)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Value,
) -> std::result::Result<T, RpcErrorObject> {
    serde_json::from_value(params).map_err(|e| RpcErrorObject {
        code: jsonrpc::codes::INVALID_PARAMS,
        message: format!("invalid params: {}", e),
        data: None,
    })
}
