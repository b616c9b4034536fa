//! Embedded terminal handlers
//!
//! `terminal/*` requests run real subprocesses on behalf of the agent.
//! Output is captured into a bounded buffer that trims from the front on
//! overflow, re-aligned to a UTF-8 boundary so a snapshot never splits a
//! character. Terminals never outlive their client: release kills what is
//! still running, and client shutdown releases everything.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use acpx_core::acp::{
    CreateTerminalParams, CreateTerminalResult, TerminalExitStatus, TerminalOutputResult,
    WaitForExitResult,
};
use acpx_core::jsonrpc::{codes, RpcErrorObject};
use serde_json::Value;

/// Default cap on captured terminal output
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Grace window between the terminate signal and the kill escalation
const KILL_GRACE: Duration = Duration::from_millis(2_000);

/// Bounded output accumulator
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit: limit.max(4),
            truncated: false,
        }
    }

    /// Append bytes, trimming the front to stay within the limit
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            // Drop leading UTF-8 continuation bytes so the kept tail
            // starts on a character boundary.
            let skip = self
                .data
                .iter()
                .take_while(|b| (*b & 0xC0) == 0x80)
                .count();
            if skip > 0 {
                self.data.drain(..skip);
            }
            self.truncated = true;
        }
    }

    pub fn snapshot(&self) -> (String, bool) {
        (
            String::from_utf8_lossy(&self.data).into_owned(),
            self.truncated,
        )
    }
}

enum KillMode {
    Graceful,
    Force,
}

struct TerminalHandle {
    buffer: Arc<Mutex<OutputBuffer>>,
    exit_rx: watch::Receiver<Option<TerminalExitStatus>>,
    control_tx: mpsc::UnboundedSender<KillMode>,
}

/// Registry of live terminals for one client
pub struct TerminalRegistry {
    default_cwd: PathBuf,
    next_id: AtomicU64,
    inner: Mutex<HashMap<String, TerminalHandle>>,
}

fn invalid_params(message: impl Into<String>) -> RpcErrorObject {
    RpcErrorObject {
        code: codes::INVALID_PARAMS,
        message: message.into(),
        data: None,
    }
}

impl TerminalRegistry {
    pub fn new(default_cwd: impl Into<PathBuf>) -> Self {
        Self {
            default_cwd: default_cwd.into(),
            next_id: AtomicU64::new(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Handle `terminal/create`
    pub async fn create(&self, params: CreateTerminalParams) -> Result<Value, RpcErrorObject> {
        let cwd = params.cwd.clone().unwrap_or_else(|| self.default_cwd.clone());
        let limit = params
            .output_byte_limit
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_OUTPUT_LIMIT);

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &params.env {
            cmd.env(&var.name, &var.value);
        }

        let mut child = cmd.spawn().map_err(|e| RpcErrorObject {
            code: codes::INTERNAL_ERROR,
            message: format!("failed to spawn '{}': {}", params.command, e),
            data: None,
        })?;

        let pid = child.id();
        let buffer = Arc::new(Mutex::new(OutputBuffer::new(limit)));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            spawn_pump(stdout, buffer.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pump(stderr, buffer.clone());
        }
        tokio::spawn(monitor(child, pid, exit_tx, control_rx));

        let terminal_id = format!("term-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.lock().unwrap().insert(
            terminal_id.clone(),
            TerminalHandle {
                buffer,
                exit_rx,
                control_tx,
            },
        );

        tracing::debug!("terminal {} running '{}' (pid {:?})", terminal_id, params.command, pid);
        serde_json::to_value(CreateTerminalResult { terminal_id }).map_err(|e| RpcErrorObject {
            code: codes::INTERNAL_ERROR,
            message: e.to_string(),
            data: None,
        })
    }

    /// Handle `terminal/output`
    pub fn output(&self, terminal_id: &str) -> Result<Value, RpcErrorObject> {
        let inner = self.inner.lock().unwrap();
        let handle = inner
            .get(terminal_id)
            .ok_or_else(|| invalid_params(format!("unknown terminal id '{}'", terminal_id)))?;
        let (output, truncated) = handle.buffer.lock().unwrap().snapshot();
        let exit_status = handle.exit_rx.borrow().clone();
        serde_json::to_value(TerminalOutputResult {
            output,
            truncated,
            exit_status,
        })
        .map_err(|e| RpcErrorObject {
            code: codes::INTERNAL_ERROR,
            message: e.to_string(),
            data: None,
        })
    }

    /// Handle `terminal/wait_for_exit`: blocks until the child exits
    pub async fn wait_for_exit(&self, terminal_id: &str) -> Result<Value, RpcErrorObject> {
        let mut exit_rx = {
            let inner = self.inner.lock().unwrap();
            inner
                .get(terminal_id)
                .ok_or_else(|| invalid_params(format!("unknown terminal id '{}'", terminal_id)))?
                .exit_rx
                .clone()
        };

        let status = exit_rx
            .wait_for(|status| status.is_some())
            .await
            .map(|status| status.clone().unwrap_or_default())
            .unwrap_or_default();

        serde_json::to_value(WaitForExitResult {
            exit_code: status.exit_code,
            signal: status.signal,
        })
        .map_err(|e| RpcErrorObject {
            code: codes::INTERNAL_ERROR,
            message: e.to_string(),
            data: None,
        })
    }

    /// Handle `terminal/kill`: graceful terminate with kill escalation
    pub fn kill(&self, terminal_id: &str) -> Result<Value, RpcErrorObject> {
        let inner = self.inner.lock().unwrap();
        let handle = inner
            .get(terminal_id)
            .ok_or_else(|| invalid_params(format!("unknown terminal id '{}'", terminal_id)))?;
        let _ = handle.control_tx.send(KillMode::Graceful);
        Ok(serde_json::json!({}))
    }

    /// Handle `terminal/release`: kill if running, drop the registration
    pub fn release(&self, terminal_id: &str) -> Result<Value, RpcErrorObject> {
        let handle = self
            .inner
            .lock()
            .unwrap()
            .remove(terminal_id)
            .ok_or_else(|| invalid_params(format!("unknown terminal id '{}'", terminal_id)))?;
        let _ = handle.control_tx.send(KillMode::Force);
        Ok(serde_json::json!({}))
    }

    /// Release every outstanding terminal (client shutdown)
    pub fn release_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (id, handle) in inner.drain() {
            tracing::debug!("releasing terminal {}", id);
            let _ = handle.control_tx.send(KillMode::Force);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spawn_pump(
    mut stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    buffer: Arc<Mutex<OutputBuffer>>,
) {
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.lock().unwrap().push(&chunk[..n]),
            }
        }
    });
}

/// Own the child: record its exit, serve kill requests, escalate after
/// the grace window.
async fn monitor(
    mut child: tokio::process::Child,
    pid: Option<u32>,
    exit_tx: watch::Sender<Option<TerminalExitStatus>>,
    mut control_rx: mpsc::UnboundedReceiver<KillMode>,
) {
    let mut deadline: Option<tokio::time::Instant> = None;
    let mut control_open = true;
    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.ok();
                let _ = exit_tx.send(Some(TerminalExitStatus {
                    exit_code: status.as_ref().and_then(|s| s.code()),
                    signal: status.as_ref().and_then(signal_name),
                }));
                break;
            }
            _ = sleep_until_opt(deadline) => {
                let _ = child.start_kill();
                deadline = None;
            }
            msg = control_rx.recv(), if control_open => {
                match msg {
                    Some(KillMode::Graceful) => {
                        terminate(pid);
                        deadline = Some(tokio::time::Instant::now() + KILL_GRACE);
                    }
                    Some(KillMode::Force) | None => {
                        let _ = child.start_kill();
                        control_open = msg.is_some();
                    }
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

#[cfg(unix)]
fn signal_name(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| match sig {
        libc::SIGTERM => "SIGTERM".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        other => format!("signal {}", other),
    })
}

#[cfg(not(unix))]
fn signal_name(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use acpx_core::acp::EnvVariable;

    fn create_params(command: &str, args: &[&str]) -> CreateTerminalParams {
        CreateTerminalParams {
            session_id: "s".to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            cwd: None,
            output_byte_limit: None,
        }
    }

    #[test]
    fn test_buffer_keeps_tail() {
        let mut buffer = OutputBuffer::new(8);
        buffer.push(b"0123456789abcdef");
        let (output, truncated) = buffer.snapshot();
        assert_eq!(output, "89abcdef");
        assert!(truncated);
    }

    #[test]
    fn test_buffer_trims_to_utf8_boundary() {
        let mut buffer = OutputBuffer::new(8);
        // Each 'é' is two bytes; force an overflow cutting mid-character.
        buffer.push("ééééééé".as_bytes());
        let (output, _) = buffer.snapshot();
        assert!(!output.contains('\u{FFFD}'));
        assert!(output.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_buffer_no_truncation_under_limit() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.push(b"short");
        let (output, truncated) = buffer.snapshot();
        assert_eq!(output, "short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_create_and_wait() {
        let registry = TerminalRegistry::new(std::env::temp_dir());
        let created = registry
            .create(create_params("echo", &["terminal-output"]))
            .await
            .unwrap();
        let terminal_id = created["terminalId"].as_str().unwrap().to_string();

        let exited = registry.wait_for_exit(&terminal_id).await.unwrap();
        assert_eq!(exited["exitCode"], 0);

        // Give the pumps a moment to drain the pipes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let output = registry.output(&terminal_id).unwrap();
        assert!(output["output"].as_str().unwrap().contains("terminal-output"));
        assert_eq!(output["truncated"], false);
        assert!(output["exitStatus"]["exitCode"].is_number());
    }

    #[tokio::test]
    async fn test_env_merge() {
        let registry = TerminalRegistry::new(std::env::temp_dir());
        let mut params = create_params("sh", &["-c", "echo $ACPX_TEST_VAR"]);
        params.env.push(EnvVariable {
            name: "ACPX_TEST_VAR".to_string(),
            value: "merged".to_string(),
        });
        let created = registry.create(params).await.unwrap();
        let terminal_id = created["terminalId"].as_str().unwrap().to_string();
        registry.wait_for_exit(&terminal_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let output = registry.output(&terminal_id).unwrap();
        assert!(output["output"].as_str().unwrap().contains("merged"));
    }

    #[tokio::test]
    async fn test_kill_long_running() {
        let registry = TerminalRegistry::new(std::env::temp_dir());
        let created = registry.create(create_params("sleep", &["30"])).await.unwrap();
        let terminal_id = created["terminalId"].as_str().unwrap().to_string();

        registry.kill(&terminal_id).unwrap();
        let exited = tokio::time::timeout(
            Duration::from_secs(5),
            registry.wait_for_exit(&terminal_id),
        )
        .await
        .expect("kill must settle the wait")
        .unwrap();
        assert!(exited["exitCode"].is_null() || exited["exitCode"] != 0);
    }

    #[tokio::test]
    async fn test_release_removes_registration() {
        let registry = TerminalRegistry::new(std::env::temp_dir());
        let created = registry.create(create_params("sleep", &["30"])).await.unwrap();
        let terminal_id = created["terminalId"].as_str().unwrap().to_string();

        registry.release(&terminal_id).unwrap();
        assert!(registry.output(&terminal_id).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_terminal_id() {
        let registry = TerminalRegistry::new(std::env::temp_dir());
        let err = registry.output("term-404").unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }
}
