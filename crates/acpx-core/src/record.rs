//! Session record model
//!
//! One JSON file per session in the acpx home directory. The record is
//! the durable identity of a conversation: which agent command owns it,
//! where it runs, the negotiated capabilities, the event-log manifest and
//! the conversation history itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::acp::{AgentCapabilities, ContentBlock};

/// Record format version
pub const RECORD_SCHEMA: &str = "acpx.session.v1";

/// Default cap on one event-log segment
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 8 * 1024 * 1024;
/// Default number of retained segments
pub const DEFAULT_MAX_SEGMENTS: u32 = 8;

/// Event-log bookkeeping stored inside the record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_path: Option<PathBuf>,
    #[serde(default)]
    pub segment_count: u32,
    pub max_segment_bytes: u64,
    pub max_segments: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_error: Option<String>,
}

impl Default for EventLogManifest {
    fn default() -> Self {
        Self {
            active_path: None,
            segment_count: 0,
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            max_segments: DEFAULT_MAX_SEGMENTS,
            last_write_at: None,
            last_write_error: None,
        }
    }
}

/// Why the agent subprocess went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProcessExit,
    Killed,
    Crashed,
}

/// Post-mortem of one agent subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    pub exited_at: DateTime<Utc>,
    pub reason: ExitReason,
    #[serde(default)]
    pub unexpected_during_prompt: bool,
}

/// One entry of the stored conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageEntry {
    User {
        content: Vec<ContentBlock>,
        timestamp: DateTime<Utc>,
    },
    Agent {
        content: Vec<ContentBlock>,
        timestamp: DateTime<Utc>,
    },
}

/// The persisted state of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub schema: String,
    /// Filesystem key; never changes
    pub acpx_record_id: Uuid,
    /// Logical session id callers address
    pub acp_session_id: String,
    /// Agent-internal id, when the agent exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    /// Verbatim shell command that spawns the agent
    pub agent_command: String,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_exit_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_exit_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_disconnect_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_capabilities: Option<AgentCapabilities>,

    #[serde(default)]
    pub event_log: EventLogManifest,
    #[serde(default)]
    pub last_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_id: Option<u64>,

    #[serde(default)]
    pub messages: Vec<MessageEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_token_usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token_usage: Option<Value>,
}

impl SessionRecord {
    /// Create a fresh record for an agent command rooted at `cwd`
    pub fn new(agent_command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        let record_id = Uuid::new_v4();
        Self {
            schema: RECORD_SCHEMA.to_string(),
            acpx_record_id: record_id,
            // Until the agent hands out a session id the logical id is the
            // record id itself; session/new replaces it.
            acp_session_id: record_id.to_string(),
            agent_session_id: None,
            agent_command: agent_command.into(),
            cwd: cwd.into(),
            name: None,
            created_at: now,
            last_used_at: now,
            last_prompt_at: None,
            closed_at: None,
            closed: false,
            pid: None,
            agent_started_at: None,
            last_agent_exit_code: None,
            last_agent_exit_signal: None,
            last_agent_exit_at: None,
            last_agent_disconnect_reason: None,
            protocol_version: None,
            agent_capabilities: None,
            event_log: EventLogManifest::default(),
            last_seq: 0,
            last_request_id: None,
            messages: Vec::new(),
            title: None,
            updated_at: now,
            cumulative_token_usage: None,
            request_token_usage: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Record that the session was touched; bumps `lastUsedAt` and
    /// `updated_at`.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_used_at = now;
        self.updated_at = now;
    }

    /// A prompt turn is starting
    pub fn mark_prompt_started(&mut self) {
        let now = Utc::now();
        self.last_prompt_at = Some(now);
        self.updated_at = now;
    }

    /// A prompt turn settled; after this `lastUsedAt >= lastPromptAt`
    pub fn mark_prompt_finished(&mut self) {
        self.touch();
    }

    pub fn mark_closed(&mut self) {
        let now = Utc::now();
        self.closed = true;
        self.closed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a live agent subprocess
    pub fn record_agent_started(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.agent_started_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Fold a subprocess post-mortem into the record
    pub fn record_agent_exit(&mut self, exit: &AgentExit) {
        self.pid = None;
        self.last_agent_exit_code = exit.exit_code;
        self.last_agent_exit_signal = exit.signal.clone();
        self.last_agent_exit_at = Some(exit.exited_at);
        self.last_agent_disconnect_reason = Some(
            match exit.reason {
                ExitReason::ProcessExit => "process_exit",
                ExitReason::Killed => "killed",
                ExitReason::Crashed => "crashed",
            }
            .to_string(),
        );
        self.updated_at = Utc::now();
    }

    /// Exact identity match on `(agentCommand, cwd, name)`
    pub fn matches_key(&self, agent_command: &str, cwd: &Path, name: Option<&str>) -> bool {
        self.agent_command == agent_command
            && self.cwd == cwd
            && self.name.as_deref() == name
    }

    pub fn push_user_message(&mut self, content: Vec<ContentBlock>) {
        self.messages.push(MessageEntry::User {
            content,
            timestamp: Utc::now(),
        });
    }

    pub fn push_agent_message(&mut self, content: Vec<ContentBlock>) {
        self.messages.push(MessageEntry::Agent {
            content,
            timestamp: Utc::now(),
        });
    }
}
