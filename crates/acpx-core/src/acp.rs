//! Typed ACP protocol surface
//!
//! Serde structs for the Agent Client Protocol methods acpx speaks. The
//! wire is JSON-RPC 2.0 (see [`crate::jsonrpc`]); these types cover only
//! the params/results the runtime interprets, and pass everything else
//! through untouched so the event log always mirrors the exact exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::jsonrpc::RpcErrorObject;

/// Protocol version acpx advertises on `initialize`
pub const PROTOCOL_VERSION: u16 = 1;

/// Method names, outbound (client -> agent)
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const SESSION_NEW: &str = "session/new";
    pub const SESSION_LOAD: &str = "session/load";
    pub const SESSION_PROMPT: &str = "session/prompt";
    pub const SESSION_CANCEL: &str = "session/cancel";
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    pub const SESSION_SET_CONFIG_OPTION: &str = "session/set_config_option";

    // Inbound (agent -> client)
    pub const SESSION_UPDATE: &str = "session/update";
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    pub const TERMINAL_CREATE: &str = "terminal/create";
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    pub const TERMINAL_KILL: &str = "terminal/kill";
    pub const TERMINAL_RELEASE: &str = "terminal/release";
}

// ---------------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: u16,
    pub client_capabilities: ClientCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    pub fs: FsCapabilities,
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    pub read_text_file: bool,
    pub write_text_file: bool,
}

impl Default for FsCapabilities {
    fn default() -> Self {
        Self {
            read_text_file: true,
            write_text_file: true,
        }
    }
}

impl ClientCapabilities {
    /// Full capability set: fs access plus embedded terminals
    pub fn full() -> Self {
        Self {
            fs: FsCapabilities::default(),
            terminal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: u16,
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_methods: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Value>,
}

/// Negotiated agent capabilities; unknown fields are preserved so the
/// session record stores whatever the agent advertised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub load_session: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// session/new, session/load
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    pub cwd: PathBuf,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    pub session_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub cwd: PathBuf,
    pub suppress_replay_updates: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// session/prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    pub session_id: String,
    pub prompt: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub stop_reason: StopReason,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Why a prompt turn ended
///
/// Tolerant of reasons this client does not know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    MaxTurnRequests,
    Refusal,
    Cancelled,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::MaxTurnRequests => "max_turn_requests",
            StopReason::Refusal => "refusal",
            StopReason::Cancelled => "cancelled",
            StopReason::Other(s) => s,
        }
    }
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "max_turn_requests" => StopReason::MaxTurnRequests,
            "refusal" => StopReason::Refusal,
            "cancelled" => StopReason::Cancelled,
            other => StopReason::Other(other.to_string()),
        }
    }
}

impl Serialize for StopReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StopReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(StopReason::from(s.as_str()))
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    pub session_id: String,
    pub mode_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfigOptionParams {
    pub session_id: String,
    pub config_id: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfigOptionResult {
    #[serde(default)]
    pub config_options: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Content blocks & session updates
// ---------------------------------------------------------------------------

/// One block of message content
///
/// Only text is interpreted; everything else rides through as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(untagged)]
    Other(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other(_) => None,
        }
    }
}

/// `session/update` notification params
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    pub session_id: String,
    pub update: SessionUpdate,
}

/// The payload of a `session/update`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    AgentMessageChunk {
        content: ContentBlock,
    },
    AgentThoughtChunk {
        content: ContentBlock,
    },
    UserMessageChunk {
        content: ContentBlock,
    },
    ToolCall(ToolCallUpdate),
    ToolCallUpdate(ToolCallUpdate),
    Plan {
        #[serde(default)]
        entries: Vec<Value>,
    },
    #[serde(untagged)]
    Other(Value),
}

/// Tool-call lifecycle fields; agents send sparse updates so everything
/// past the id is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// session/request_permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    pub session_id: String,
    pub tool_call: ToolCallUpdate,
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    pub kind: PermissionOptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

impl PermissionOptionKind {
    pub fn is_allow(&self) -> bool {
        matches!(
            self,
            PermissionOptionKind::AllowOnce | PermissionOptionKind::AllowAlways
        )
    }

    pub fn is_reject(&self) -> bool {
        !self.is_allow()
    }
}

/// The outcome the client selects for a permission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    Selected {
        #[serde(rename = "optionId")]
        option_id: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPermissionResult {
    pub outcome: PermissionOutcome,
}

// ---------------------------------------------------------------------------
// fs/* and terminal/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    pub session_id: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTextFileResult {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    pub session_id: String,
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalParams {
    pub session_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResult {
    pub terminal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalIdParams {
    pub session_id: String,
    pub terminal_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputResult {
    pub output: String,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<TerminalExitStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForExitResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent error classification
// ---------------------------------------------------------------------------

/// ACP error codes with meaning to the runtime
pub mod error_code {
    /// Authentication required
    pub const AUTH_REQUIRED: i64 = -32000;
    /// Resource not found
    pub const RESOURCE_NOT_FOUND: i64 = -32001;
    /// Session not found
    pub const SESSION_NOT_FOUND: i64 = -32002;
}

const SESSION_NOT_FOUND_PHRASES: &[&str] = &[
    "session not found",
    "unknown session",
    "no such session",
    "resource not found",
];

/// True when an agent error means the stored session is gone and the
/// load -> new fallback should run.
pub fn is_session_not_found(error: &RpcErrorObject) -> bool {
    if error.code == error_code::RESOURCE_NOT_FOUND || error.code == error_code::SESSION_NOT_FOUND {
        return true;
    }
    let message = error.message.to_lowercase();
    SESSION_NOT_FOUND_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// True when an agent error means authentication is required
///
/// Detection combines the code with message keywords and the data fields
/// agents attach (`methodId`, `methods`, `authRequired`).
pub fn is_auth_required(error: &RpcErrorObject) -> bool {
    if error.code != error_code::AUTH_REQUIRED {
        return false;
    }
    let message = error.message.to_lowercase();
    if message.contains("auth") || message.contains("login") || message.contains("unauthorized") {
        return true;
    }
    error
        .data
        .as_ref()
        .and_then(Value::as_object)
        .map(|data| {
            data.contains_key("methodId")
                || data.contains_key("methods")
                || data.contains_key("authRequired")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_reason_roundtrip() {
        for (reason, wire) in [
            (StopReason::EndTurn, "end_turn"),
            (StopReason::MaxTokens, "max_tokens"),
            (StopReason::Cancelled, "cancelled"),
            (StopReason::Refusal, "refusal"),
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", wire));
            let back: StopReason = serde_json::from_str(&json).unwrap();
            assert_eq!(back, reason);
        }

        let unknown: StopReason = serde_json::from_str("\"paused_for_review\"").unwrap();
        assert_eq!(unknown, StopReason::Other("paused_for_review".to_string()));
    }

    #[test]
    fn test_session_update_agent_chunk() {
        let params = json!({
            "sessionId": "s-1",
            "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": {"type": "text", "text": "hello"}
            }
        });
        let notification: SessionNotification = serde_json::from_value(params).unwrap();
        match notification.update {
            SessionUpdate::AgentMessageChunk { content } => {
                assert_eq!(content.as_text(), Some("hello"))
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_session_update_tool_call() {
        let params = json!({
            "sessionId": "s-1",
            "update": {
                "sessionUpdate": "tool_call",
                "toolCallId": "t-1",
                "title": "Read file",
                "kind": "read",
                "status": "pending"
            }
        });
        let notification: SessionNotification = serde_json::from_value(params).unwrap();
        match notification.update {
            SessionUpdate::ToolCall(tool_call) => {
                assert_eq!(tool_call.tool_call_id.as_deref(), Some("t-1"));
                assert_eq!(tool_call.kind.as_deref(), Some("read"));
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_session_update_unknown_passes_through() {
        let params = json!({
            "sessionId": "s-1",
            "update": {"sessionUpdate": "available_commands_update", "commands": []}
        });
        let notification: SessionNotification = serde_json::from_value(params).unwrap();
        assert!(matches!(notification.update, SessionUpdate::Other(_)));
    }

    #[test]
    fn test_content_block_passthrough() {
        let block: ContentBlock =
            serde_json::from_value(json!({"type": "image", "data": "...", "mimeType": "image/png"}))
                .unwrap();
        assert!(matches!(block, ContentBlock::Other(_)));

        let text: ContentBlock = serde_json::from_value(json!({"type": "text", "text": "hi"})).unwrap();
        assert_eq!(text.as_text(), Some("hi"));
    }

    #[test]
    fn test_permission_outcome_wire_shape() {
        let selected = PermissionOutcome::Selected {
            option_id: "allow-1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&selected).unwrap(),
            json!({"outcome": "selected", "optionId": "allow-1"})
        );
        assert_eq!(
            serde_json::to_value(&PermissionOutcome::Cancelled).unwrap(),
            json!({"outcome": "cancelled"})
        );
    }

    #[test]
    fn test_session_not_found_detection() {
        let by_code = RpcErrorObject {
            code: -32002,
            message: "gone".to_string(),
            data: None,
        };
        assert!(is_session_not_found(&by_code));

        let by_phrase = RpcErrorObject {
            code: -32603,
            message: "Unknown session: abc".to_string(),
            data: None,
        };
        assert!(is_session_not_found(&by_phrase));

        let unrelated = RpcErrorObject {
            code: -32603,
            message: "disk on fire".to_string(),
            data: None,
        };
        assert!(!is_session_not_found(&unrelated));
    }

    #[test]
    fn test_auth_required_detection() {
        let by_keyword = RpcErrorObject {
            code: -32000,
            message: "Authentication required".to_string(),
            data: None,
        };
        assert!(is_auth_required(&by_keyword));

        let by_data = RpcErrorObject {
            code: -32000,
            message: "please see data".to_string(),
            data: Some(json!({"methods": ["api_key"]})),
        };
        assert!(is_auth_required(&by_data));

        let wrong_code = RpcErrorObject {
            code: -32001,
            message: "auth required".to_string(),
            data: None,
        };
        assert!(!is_auth_required(&wrong_code));
    }

    #[test]
    fn test_load_session_params_wire_shape() {
        let params = LoadSessionParams {
            session_id: "acp-1".to_string(),
            agent_session_id: Some("provider-X".to_string()),
            cwd: PathBuf::from("/tmp/work"),
            suppress_replay_updates: true,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["sessionId"], "acp-1");
        assert_eq!(value["agentSessionId"], "provider-X");
        assert_eq!(value["suppressReplayUpdates"], true);
    }

    #[test]
    fn test_agent_capabilities_preserves_unknown_fields() {
        let caps: AgentCapabilities = serde_json::from_value(json!({
            "loadSession": true,
            "promptCapabilities": {"image": true}
        }))
        .unwrap();
        assert!(caps.load_session);
        assert!(caps.extra.contains_key("promptCapabilities"));
    }
}
