//! Command-line interface
//!
//! The CLI is deliberately thin: parse, resolve the session, call the
//! runtime facade, map the outcome to an exit code. All streaming goes
//! through the output sinks in [`crate::output`].

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use acpx_core::error::{exit_code, AcpxError, Result};
use acpx_core::permission::{NonInteractivePolicy, PermissionMode};
use acpx_core::SessionRecord;
use serde_json::Value;

use crate::output::{sink_for, OutputMode, OutputSink};
use crate::runtime::{prompt_exit_code, AgentTarget, PromptSettings, Runtime, SendOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "acpx",
    version,
    about = "Headless command-line client for ACP agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a one-shot prompt: fresh agent, no session persisted
    Run(RunArgs),
    /// Create a persistent session
    Create(CreateArgs),
    /// Send a prompt to a session through its queue owner
    Send(SendArgs),
    /// Cancel the active prompt of a session
    Cancel(SessionRefArgs),
    /// Change the session mode
    SetMode(SetModeArgs),
    /// Change a session config option
    SetConfig(SetConfigArgs),
    /// Close a session and stop its owner
    Close(SessionRefArgs),
    /// List known sessions
    List(ListArgs),
    /// Internal: run as a detached queue owner
    #[command(name = "queue-owner", hide = true)]
    QueueOwner(QueueOwnerArgs),
}

/// CLI spelling of [`PermissionMode`]
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum PermissionModeArg {
    ApproveAll,
    #[default]
    ApproveReads,
    DenyAll,
}

impl From<PermissionModeArg> for PermissionMode {
    fn from(arg: PermissionModeArg) -> Self {
        match arg {
            PermissionModeArg::ApproveAll => PermissionMode::ApproveAll,
            PermissionModeArg::ApproveReads => PermissionMode::ApproveReads,
            PermissionModeArg::DenyAll => PermissionMode::DenyAll,
        }
    }
}

/// CLI spelling of [`NonInteractivePolicy`]
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NonInteractiveArg {
    Deny,
    Fail,
}

impl From<NonInteractiveArg> for NonInteractivePolicy {
    fn from(arg: NonInteractiveArg) -> Self {
        match arg {
            NonInteractiveArg::Deny => NonInteractivePolicy::Deny,
            NonInteractiveArg::Fail => NonInteractivePolicy::Fail,
        }
    }
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Output rendering
    #[arg(long, value_enum, default_value_t)]
    pub output: OutputMode,
    /// How to answer agent permission requests
    #[arg(long, value_enum, default_value_t)]
    pub permission_mode: PermissionModeArg,
    /// Policy when a permission prompt is needed without a TTY
    #[arg(long, value_enum)]
    pub non_interactive_permissions: Option<NonInteractiveArg>,
    /// Per-operation timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Agent command line, e.g. "claude-code-acp"
    #[arg(long, env = "ACPX_AGENT")]
    pub agent: String,
    /// Working directory for the agent (defaults to the current one)
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    #[command(flatten)]
    pub stream: StreamArgs,
    /// The prompt text
    pub message: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    #[arg(long, env = "ACPX_AGENT")]
    pub agent: String,
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    /// Human tag, unique per agent command and directory
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Session id (record id, session id, or unique suffix); when
    /// omitted the session is resolved by directory walk
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long, env = "ACPX_AGENT")]
    pub agent: Option<String>,
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    #[arg(long)]
    pub name: Option<String>,
    /// Return as soon as the owner accepts the prompt
    #[arg(long)]
    pub no_wait: bool,
    /// Idle TTL for a freshly spawned owner, in milliseconds (0 keeps it
    /// alive forever)
    #[arg(long)]
    pub ttl_ms: Option<f64>,
    #[command(flatten)]
    pub stream: StreamArgs,
    pub message: String,
}

#[derive(Debug, Args)]
pub struct SessionRefArgs {
    #[arg(long)]
    pub session: String,
    #[arg(long, value_enum, default_value_t)]
    pub output: OutputMode,
}

#[derive(Debug, Args)]
pub struct SetModeArgs {
    #[arg(long)]
    pub session: String,
    pub mode: String,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SetConfigArgs {
    #[arg(long)]
    pub session: String,
    pub config_id: String,
    /// JSON value; bare words are treated as strings
    pub value: String,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only sessions for this agent command
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long, value_enum, default_value_t)]
    pub output: OutputMode,
}

#[derive(Debug, Args)]
pub struct QueueOwnerArgs {
    #[arg(long)]
    pub session: String,
    #[arg(long)]
    pub ttl_ms: Option<f64>,
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(cwd) => Ok(cwd),
        None => std::env::current_dir()
            .map_err(|e| AcpxError::usage(format!("cannot resolve current directory: {}", e))),
    }
}

fn settings_from(stream: &StreamArgs, wait: bool, ttl_ms: Option<f64>) -> PromptSettings {
    PromptSettings {
        permission_mode: stream.permission_mode.into(),
        non_interactive: stream.non_interactive_permissions.map(Into::into),
        timeout_ms: stream.timeout_ms,
        wait_for_completion: wait,
        ttl_ms,
    }
}

/// Run the parsed command, returning the process exit code
pub async fn execute(cli: Cli) -> i32 {
    let runtime = Runtime::new();
    match dispatch(&runtime, cli.command).await {
        Ok(code) => code,
        Err(error) => {
            if !error.output_already_emitted {
                eprintln!("error: {}", error);
            }
            error.exit_code()
        }
    }
}

async fn dispatch(runtime: &Runtime, command: Command) -> Result<i32> {
    match command {
        Command::Run(args) => {
            let mut sink = sink_for(args.stream.output);
            let target = AgentTarget {
                agent_command: args.agent.clone(),
                cwd: resolve_cwd(args.cwd)?,
                name: None,
            };
            let settings = settings_from(&args.stream, true, None);
            match runtime
                .run_once(&target, &args.message, &settings, sink.as_mut())
                .await
            {
                Ok(outcome) => Ok(prompt_exit_code(&outcome.permission_stats)),
                Err(error) => Err(rendered(sink.as_mut(), error)),
            }
        }
        Command::Create(args) => {
            let target = AgentTarget {
                agent_command: args.agent,
                cwd: resolve_cwd(args.cwd)?,
                name: args.name,
            };
            let record = runtime.create_session(&target).await?;
            println!("{}", record.acpx_record_id);
            Ok(exit_code::SUCCESS)
        }
        Command::Send(args) => send(runtime, args).await,
        Command::Cancel(args) => {
            let record = runtime.store().resolve_session_record(&args.session).await?;
            let cancelled = runtime.cancel_session_prompt(&record).await?;
            match args.output {
                OutputMode::Json => println!("{}", serde_json::json!({"cancelled": cancelled})),
                _ => println!("cancelled: {}", cancelled),
            }
            Ok(exit_code::SUCCESS)
        }
        Command::SetMode(args) => {
            let record = runtime.store().resolve_session_record(&args.session).await?;
            runtime
                .set_session_mode(&record, &args.mode, args.timeout_ms)
                .await?;
            Ok(exit_code::SUCCESS)
        }
        Command::SetConfig(args) => {
            let record = runtime.store().resolve_session_record(&args.session).await?;
            let value: Value = serde_json::from_str(&args.value)
                .unwrap_or_else(|_| Value::String(args.value.clone()));
            let config_options = runtime
                .set_session_config_option(&record, &args.config_id, value, args.timeout_ms)
                .await?;
            for option in config_options {
                println!("{}", option);
            }
            Ok(exit_code::SUCCESS)
        }
        Command::Close(args) => {
            let record = runtime.store().resolve_session_record(&args.session).await?;
            runtime.close_session(&record).await?;
            Ok(exit_code::SUCCESS)
        }
        Command::List(args) => {
            let records = match &args.agent {
                Some(agent) => runtime.store().list_sessions_for_agent(agent).await?,
                None => runtime.store().list_sessions().await?,
            };
            render_list(&records, args.output);
            Ok(exit_code::SUCCESS)
        }
        Command::QueueOwner(args) => {
            runtime.run_owner(&args.session, args.ttl_ms).await?;
            Ok(exit_code::SUCCESS)
        }
    }
}

async fn send(runtime: &Runtime, args: SendArgs) -> Result<i32> {
    let mut sink = sink_for(args.stream.output);

    let resolved = match &args.session {
        Some(session) => runtime.store().resolve_session_record(session).await,
        None => match args.agent.clone() {
            Some(agent) => {
                let target = AgentTarget {
                    agent_command: agent,
                    cwd: resolve_cwd(args.cwd.clone())?,
                    name: args.name.clone(),
                };
                runtime.ensure_session(&target).await
            }
            None => Err(AcpxError::usage("either --session or --agent is required")),
        },
    };
    let record = match resolved {
        Ok(record) => record,
        Err(error) => return Err(rendered(sink.as_mut(), error)),
    };
    if record.closed {
        return Err(rendered(
            sink.as_mut(),
            AcpxError::no_session(format!("session {} is closed", record.acpx_record_id))
                .with_detail(acpx_core::error::detail::SESSION_CLOSED),
        ));
    }

    let settings = settings_from(&args.stream, !args.no_wait, args.ttl_ms);

    let outcome = {
        let send = runtime.send_session(&record, &args.message, &settings, sink.as_mut());
        tokio::pin!(send);
        tokio::select! {
            outcome = &mut send => outcome,
            _ = crate::runtime::interrupt_signal() => {
                // Best effort: stop the active prompt before leaving.
                let _ = tokio::time::timeout(
                    std::time::Duration::from_secs(2),
                    runtime.cancel_session_prompt(&record),
                )
                .await;
                Err(AcpxError::interrupted())
            }
        }
    };

    match outcome {
        Ok(SendOutcome::Completed(result)) => Ok(prompt_exit_code(&result.permission_stats)),
        Ok(SendOutcome::Queued { request_id }) => {
            match args.stream.output {
                OutputMode::Json => println!(
                    "{}",
                    serde_json::json!({
                        "type": "queued",
                        "requestId": request_id,
                        "sessionId": record.acp_session_id,
                    })
                ),
                OutputMode::Text => println!("queued: {}", request_id),
                OutputMode::Quiet => {}
            }
            Ok(exit_code::SUCCESS)
        }
        Err(error) => Err(rendered(sink.as_mut(), error)),
    }
}

/// Render an error through the sink, then hand it back for exit mapping
fn rendered(sink: &mut dyn OutputSink, error: AcpxError) -> AcpxError {
    sink.on_error(&error);
    sink.flush();
    error.with_output_already_emitted()
}

fn render_list(records: &[SessionRecord], output: OutputMode) {
    match output {
        OutputMode::Json => {
            for record in records {
                println!(
                    "{}",
                    serde_json::json!({
                        "acpxRecordId": record.acpx_record_id,
                        "acpSessionId": record.acp_session_id,
                        "agentCommand": record.agent_command,
                        "cwd": record.cwd,
                        "name": record.name,
                        "lastUsedAt": record.last_used_at,
                        "closed": record.closed,
                    })
                );
            }
        }
        OutputMode::Quiet => {}
        OutputMode::Text => {
            for record in records {
                let closed = if record.closed { " (closed)" } else { "" };
                let name = record.name.as_deref().unwrap_or("-");
                println!(
                    "{}  {}  {}  {}{}",
                    record.acpx_record_id,
                    name,
                    record.agent_command,
                    record.cwd.display(),
                    closed
                );
            }
        }
    }
}
