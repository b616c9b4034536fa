//! Agent subprocess adapter
//!
//! Spawns the configured agent command with piped stdio, forwards its
//! stderr to the diagnostic log, and tracks lifecycle: PID, start time
//! and the post-mortem of the last exit. Shutdown is staged: close stdin,
//! wait out a grace period, then kill.

use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use acpx_core::error::{AcpxError, Result};
use acpx_core::record::{AgentExit, ExitReason};

/// A parsed agent command line
///
/// The first whitespace-separated word is the executable, the rest are
/// arguments, verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| AcpxError::usage("agent command is empty"))?
            .to_string();
        Ok(Self {
            program,
            args: words.map(str::to_string).collect(),
        })
    }
}

/// Mutable lifecycle state shared with the exit-watcher task
#[derive(Debug, Default)]
struct LifecycleState {
    last_exit: Option<AgentExit>,
    prompt_in_flight: bool,
}

/// Point-in-time view of the agent subprocess
#[derive(Debug, Clone)]
pub struct LifecycleSnapshot {
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_exit: Option<AgentExit>,
}

/// A spawned agent subprocess with its stdio taken
pub struct AgentProcess {
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    state: Arc<Mutex<LifecycleState>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
}

impl AgentProcess {
    /// Spawn the agent in `cwd`, returning the process plus its stdin
    /// writer and buffered stdout reader
    pub async fn spawn(
        command: &AgentCommand,
        cwd: &std::path::Path,
    ) -> Result<(Self, ChildStdin, BufReader<ChildStdout>)> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AcpxError::runtime(format!("failed to spawn agent '{}': {}", command.program, e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AcpxError::runtime("agent exited before it could be observed"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AcpxError::runtime("failed to capture agent stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AcpxError::runtime("failed to capture agent stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AcpxError::runtime("failed to capture agent stderr"))?;

        // Forward agent stderr to the diagnostic log, line by line.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!("agent stderr: {}", line);
            }
        });

        tracing::info!("spawned agent '{}' (pid {})", command.program, pid);

        Ok((
            Self {
                child,
                pid,
                started_at: Utc::now(),
                state: Arc::new(Mutex::new(LifecycleState::default())),
                stderr_task: Some(stderr_task),
            },
            stdin,
            BufReader::new(stdout),
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Flag that a prompt is in flight so an unexpected exit can be
    /// recorded as such
    pub fn set_prompt_in_flight(&self, in_flight: bool) {
        self.state.lock().unwrap().prompt_in_flight = in_flight;
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let state = self.state.lock().unwrap();
        LifecycleSnapshot {
            pid: if state.last_exit.is_none() {
                Some(self.pid)
            } else {
                None
            },
            started_at: self.started_at,
            last_exit: state.last_exit.clone(),
        }
    }

    /// Non-blocking probe: has the agent exited on its own?
    pub fn try_record_exit(&mut self) -> Option<AgentExit> {
        if let Ok(Some(status)) = self.child.try_wait() {
            let exit = self.exit_from_status(status, ExitReason::ProcessExit);
            self.state.lock().unwrap().last_exit = Some(exit.clone());
            return Some(exit);
        }
        None
    }

    fn exit_from_status(&self, status: std::process::ExitStatus, reason: ExitReason) -> AgentExit {
        let prompt_in_flight = self.state.lock().unwrap().prompt_in_flight;
        let reason = match reason {
            ExitReason::ProcessExit if !status.success() && prompt_in_flight => ExitReason::Crashed,
            other => other,
        };
        AgentExit {
            exit_code: status.code(),
            signal: exit_signal_name(&status),
            exited_at: Utc::now(),
            reason,
            unexpected_during_prompt: prompt_in_flight,
        }
    }

    /// Staged shutdown: the caller has already closed stdin (dropping the
    /// writer requests a clean agent exit); wait out `grace`, then kill.
    pub async fn shutdown(mut self, grace: Duration) -> AgentExit {
        if let Some(task) = self.stderr_task.take() {
            // Let the drain finish on its own; it ends when the pipe closes.
            drop(task);
        }

        let exit = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => self.exit_from_status(status, ExitReason::ProcessExit),
            Ok(Err(err)) => {
                tracing::warn!("failed to await agent exit: {}", err);
                AgentExit {
                    exit_code: None,
                    signal: None,
                    exited_at: Utc::now(),
                    reason: ExitReason::Crashed,
                    unexpected_during_prompt: false,
                }
            }
            Err(_) => {
                tracing::warn!("agent did not exit within {:?}, killing", grace);
                let _ = self.child.kill().await;
                let status = self.child.wait().await.ok();
                AgentExit {
                    exit_code: status.and_then(|s| s.code()),
                    signal: Some("SIGKILL".to_string()),
                    exited_at: Utc::now(),
                    reason: ExitReason::Killed,
                    unexpected_during_prompt: false,
                }
            }
        };
        self.state.lock().unwrap().last_exit = Some(exit.clone());
        exit
    }
}

#[cfg(unix)]
fn exit_signal_name(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| format!("signal {}", sig))
}

#[cfg(not(unix))]
fn exit_signal_name(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

/// Is a previously recorded PID still alive?
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // kill(0) probes for existence without signalling.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Ask a process to terminate (SIGTERM)
#[cfg(unix)]
pub fn terminate_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) {}

/// Kill a process outright (SIGKILL)
#[cfg(unix)]
pub fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) {}

/// Double-check a recorded PID against the command it is supposed to run
///
/// On Linux the executable basename must match the recorded command's;
/// elsewhere liveness alone has to do.
pub fn pid_matches_command(pid: u32, agent_command: &str) -> bool {
    if !pid_alive(pid) {
        return false;
    }
    #[cfg(target_os = "linux")]
    {
        let expected = match AgentCommand::parse(agent_command) {
            Ok(cmd) => basename(&cmd.program),
            Err(_) => return false,
        };
        match std::fs::read(format!("/proc/{}/cmdline", pid)) {
            Ok(raw) => {
                let argv0 = raw.split(|b| *b == 0).next().unwrap_or_default();
                basename(&String::from_utf8_lossy(argv0)) == expected
            }
            // Process vanished between the liveness probe and the read.
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = agent_command;
        true
    }
}

#[cfg(target_os = "linux")]
fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        let cmd = AgentCommand::parse("mock-agent --acp --flag value").unwrap();
        assert_eq!(cmd.program, "mock-agent");
        assert_eq!(cmd.args, vec!["--acp", "--flag", "value"]);

        let bare = AgentCommand::parse("agent").unwrap();
        assert!(bare.args.is_empty());

        assert!(AgentCommand::parse("   ").is_err());
    }

    #[test]
    fn test_pid_alive_self() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn test_pid_alive_bogus() {
        // PID 4000000 is above the default pid_max on Linux.
        assert!(!pid_alive(4_000_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pid_matches_command_checks_basename() {
        let pid = std::process::id();
        let exe = std::env::current_exe().unwrap();
        let own_command = format!("{} --ignored", exe.display());
        assert!(pid_matches_command(pid, &own_command));
        assert!(!pid_matches_command(pid, "definitely-not-this-binary"));
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let cmd = AgentCommand::parse("cat").unwrap();
        let dir = std::env::temp_dir();
        let (process, stdin, _stdout) = AgentProcess::spawn(&cmd, &dir).await.unwrap();
        assert!(pid_alive(process.pid()));

        // Dropping stdin closes cat's input and lets it exit cleanly.
        drop(stdin);
        let exit = process.shutdown(Duration::from_secs(5)).await;
        assert_eq!(exit.reason, ExitReason::ProcessExit);
        assert_eq!(exit.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_escalates_to_kill() {
        let cmd = AgentCommand::parse("sleep 30").unwrap();
        let dir = std::env::temp_dir();
        let (process, stdin, _stdout) = AgentProcess::spawn(&cmd, &dir).await.unwrap();
        drop(stdin);

        let exit = process.shutdown(Duration::from_millis(100)).await;
        assert_eq!(exit.reason, ExitReason::Killed);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_runtime_error() {
        let cmd = AgentCommand::parse("definitely-missing-binary-xyz").unwrap();
        let err = AgentProcess::spawn(&cmd, &std::env::temp_dir())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, acpx_core::ErrorCode::Runtime);
    }
}
