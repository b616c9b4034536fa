//! Error types shared across the acpx workspace
//!
//! Every error that can cross a process boundary (queue socket, CLI JSON
//! output) carries the same shape: a coarse code, an optional machine
//! detail code, the origin layer, a retryability hint and, when the agent
//! produced it, the nested ACP error payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for acpx operations
pub type Result<T> = std::result::Result<T, AcpxError>;

/// Process exit codes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const TIMEOUT: i32 = 3;
    pub const NO_SESSION: i32 = 4;
    pub const PERMISSION_DENIED: i32 = 5;
    pub const INTERRUPTED: i32 = 130;
}

/// Coarse error classification, stable on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Argument or request validation problems
    Usage,
    /// A bounded wait was exceeded
    Timeout,
    /// Missing session record, or the agent reported the session gone
    NoSession,
    /// A tool permission or terminal command was denied
    PermissionDenied,
    /// Interactive prompting was required but unavailable (policy = fail)
    PermissionPromptUnavailable,
    /// Everything else, including queue/IPC failures
    Runtime,
}

impl ErrorCode {
    /// Map the code to its process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::Usage => exit_code::USAGE,
            ErrorCode::Timeout => exit_code::TIMEOUT,
            ErrorCode::NoSession => exit_code::NO_SESSION,
            ErrorCode::PermissionDenied => exit_code::PERMISSION_DENIED,
            ErrorCode::PermissionPromptUnavailable => exit_code::PERMISSION_DENIED,
            ErrorCode::Runtime => exit_code::ERROR,
        }
    }
}

/// Which layer produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    Cli,
    Runtime,
    Queue,
    Agent,
}

/// Nested JSON-RPC error payload from the agent, preserved verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcpErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Well-known detail codes
pub mod detail {
    pub const QUEUE_REQUEST_PAYLOAD_INVALID_JSON: &str = "QUEUE_REQUEST_PAYLOAD_INVALID_JSON";
    pub const QUEUE_OWNER_SHUTTING_DOWN: &str = "QUEUE_OWNER_SHUTTING_DOWN";
    pub const QUEUE_DISCONNECTED_BEFORE_ACK: &str = "QUEUE_DISCONNECTED_BEFORE_ACK";
    pub const QUEUE_OWNER_UNREACHABLE: &str = "QUEUE_OWNER_UNREACHABLE";
    pub const QUEUE_OWNER_CLOSING: &str = "QUEUE_OWNER_CLOSING";
    pub const SESSION_AMBIGUOUS: &str = "SESSION_AMBIGUOUS";
    pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
    pub const AGENT_DISCONNECTED: &str = "AGENT_DISCONNECTED";
    pub const INTERRUPTED: &str = "INTERRUPTED";
}

/// The one error type that crosses acpx process boundaries
///
/// Serializes to the wire shape
/// `{code, detailCode?, origin, retryable?, message, acp?}`; the
/// `output_already_emitted` bit is caller-local and never serialized.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct AcpxError {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_code: Option<String>,
    pub origin: ErrorOrigin,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp: Option<AcpErrorPayload>,
    #[serde(skip)]
    pub output_already_emitted: bool,
}

impl AcpxError {
    pub fn new(code: ErrorCode, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            code,
            detail_code: None,
            origin,
            retryable: false,
            message: message.into(),
            acp: None,
            output_already_emitted: false,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Usage, ErrorOrigin::Cli, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, ErrorOrigin::Runtime, message)
    }

    pub fn no_session(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoSession, ErrorOrigin::Runtime, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, ErrorOrigin::Runtime, message)
    }

    pub fn permission_prompt_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PermissionPromptUnavailable,
            ErrorOrigin::Runtime,
            message,
        )
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Runtime, ErrorOrigin::Runtime, message)
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Runtime, ErrorOrigin::Queue, message)
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Runtime, ErrorOrigin::Agent, message)
    }

    /// Interrupt (SIGINT/SIGTERM) error, mapped to exit 130
    pub fn interrupted() -> Self {
        Self::new(ErrorCode::Runtime, ErrorOrigin::Cli, "interrupted")
            .with_detail(detail::INTERRUPTED)
    }

    pub fn with_detail(mut self, detail_code: impl Into<String>) -> Self {
        self.detail_code = Some(detail_code.into());
        self
    }

    pub fn with_origin(mut self, origin: ErrorOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_acp(mut self, acp: AcpErrorPayload) -> Self {
        self.acp = Some(acp);
        self
    }

    pub fn with_output_already_emitted(mut self) -> Self {
        self.output_already_emitted = true;
        self
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.detail_code.as_deref() == Some(detail::INTERRUPTED) {
            return exit_code::INTERRUPTED;
        }
        self.code.exit_code()
    }

    pub fn is_interrupted(&self) -> bool {
        self.detail_code.as_deref() == Some(detail::INTERRUPTED)
    }
}

impl From<std::io::Error> for AcpxError {
    fn from(err: std::io::Error) -> Self {
        AcpxError::runtime(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AcpxError {
    fn from(err: serde_json::Error) -> Self {
        AcpxError::runtime(format!("serialization error: {}", err))
    }
}
