//! Queue socket wire protocol
//!
//! Newline-delimited JSON frames between a CLI invocation and the queue
//! owner that holds the session's agent subprocess. Requests flow client
//! to owner; every reply is tagged with the `requestId` it answers, and
//! `result`/`error` is always the last frame on a task socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acp::{SessionNotification, StopReason};
use crate::error::AcpxError;
use crate::permission::{NonInteractivePolicy, PermissionMode, PermissionStats};

/// Client -> owner request frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueRequest {
    #[serde(rename_all = "camelCase")]
    SubmitPrompt {
        request_id: String,
        message: String,
        #[serde(default)]
        permission_mode: PermissionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        non_interactive_permissions: Option<NonInteractivePolicy>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        wait_for_completion: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suppress_sdk_console_errors: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    CancelPrompt { request_id: String },
    #[serde(rename_all = "camelCase")]
    SetMode {
        request_id: String,
        mode_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SetConfigOption {
        request_id: String,
        config_id: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

impl QueueRequest {
    pub fn request_id(&self) -> &str {
        match self {
            QueueRequest::SubmitPrompt { request_id, .. }
            | QueueRequest::CancelPrompt { request_id }
            | QueueRequest::SetMode { request_id, .. }
            | QueueRequest::SetConfigOption { request_id, .. } => request_id,
        }
    }
}

/// What a settled prompt turn reports back to the submitting client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOutcome {
    pub stop_reason: StopReason,
    /// Original `session/load` failure message when the turn fell back to
    /// a fresh session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    #[serde(default)]
    pub permission_stats: PermissionStats,
}

/// Owner -> client reply frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueReply {
    #[serde(rename_all = "camelCase")]
    Accepted {
        request_id: String,
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionUpdate {
        request_id: String,
        notification: SessionNotification,
    },
    #[serde(rename_all = "camelCase")]
    ClientOperation {
        request_id: String,
        operation: Value,
    },
    /// Raw ACP wire message mirror
    #[serde(rename_all = "camelCase")]
    Event { request_id: String, message: Value },
    #[serde(rename_all = "camelCase")]
    Done {
        request_id: String,
        stop_reason: StopReason,
    },
    #[serde(rename = "result", rename_all = "camelCase")]
    TaskResult {
        request_id: String,
        result: PromptOutcome,
    },
    #[serde(rename_all = "camelCase")]
    CancelResult {
        request_id: String,
        cancelled: bool,
    },
    #[serde(rename_all = "camelCase")]
    ConfigOptions {
        request_id: String,
        config_options: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: String,
        #[serde(flatten)]
        error: AcpxError,
    },
}

impl QueueReply {
    pub fn request_id(&self) -> &str {
        match self {
            QueueReply::Accepted { request_id, .. }
            | QueueReply::SessionUpdate { request_id, .. }
            | QueueReply::ClientOperation { request_id, .. }
            | QueueReply::Event { request_id, .. }
            | QueueReply::Done { request_id, .. }
            | QueueReply::TaskResult { request_id, .. }
            | QueueReply::CancelResult { request_id, .. }
            | QueueReply::ConfigOptions { request_id, .. }
            | QueueReply::Error { request_id, .. } => request_id,
        }
    }

    /// True when no further frame may follow on this task socket
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueReply::TaskResult { .. }
                | QueueReply::Error { .. }
                | QueueReply::CancelResult { .. }
                | QueueReply::ConfigOptions { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::detail;
    use serde_json::json;

    #[test]
    fn test_submit_prompt_wire_shape() {
        let request = QueueRequest::SubmitPrompt {
            request_id: "r-1".to_string(),
            message: "echo first".to_string(),
            permission_mode: PermissionMode::ApproveReads,
            non_interactive_permissions: Some(NonInteractivePolicy::Fail),
            timeout_ms: Some(30_000),
            wait_for_completion: true,
            suppress_sdk_console_errors: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "submit_prompt");
        assert_eq!(value["requestId"], "r-1");
        assert_eq!(value["permissionMode"], "approve-reads");
        assert_eq!(value["nonInteractivePermissions"], "fail");
        assert_eq!(value["waitForCompletion"], true);
    }

    #[test]
    fn test_reply_result_tag() {
        let reply = QueueReply::TaskResult {
            request_id: "r-1".to_string(),
            result: PromptOutcome {
                stop_reason: StopReason::EndTurn,
                load_error: None,
                permission_stats: PermissionStats::default(),
            },
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["result"]["stopReason"], "end_turn");
    }

    #[test]
    fn test_error_reply_flattens_wire_error() {
        let reply = QueueReply::Error {
            request_id: "r-9".to_string(),
            error: AcpxError::queue("shutting down")
                .with_detail(detail::QUEUE_OWNER_SHUTTING_DOWN)
                .with_retryable(true),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["requestId"], "r-9");
        assert_eq!(value["code"], "RUNTIME");
        assert_eq!(value["detailCode"], "QUEUE_OWNER_SHUTTING_DOWN");
        assert_eq!(value["origin"], "queue");
        assert_eq!(value["retryable"], true);

        let back: QueueReply = serde_json::from_value(value).unwrap();
        match back {
            QueueReply::Error { error, .. } => {
                assert_eq!(error.detail_code.as_deref(), Some(detail::QUEUE_OWNER_SHUTTING_DOWN));
                assert!(error.retryable);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminal_classification() {
        let done = QueueReply::Done {
            request_id: "r".to_string(),
            stop_reason: StopReason::EndTurn,
        };
        assert!(!done.is_terminal());

        let cancel = QueueReply::CancelResult {
            request_id: "r".to_string(),
            cancelled: false,
        };
        assert!(cancel.is_terminal());
    }

    #[test]
    fn test_request_parses_from_raw_json() {
        let request: QueueRequest = serde_json::from_value(json!({
            "type": "set_config_option",
            "requestId": "r-2",
            "configId": "model",
            "value": "fast",
        }))
        .unwrap();
        match request {
            QueueRequest::SetConfigOption { config_id, value, .. } => {
                assert_eq!(config_id, "model");
                assert_eq!(value, json!("fast"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
