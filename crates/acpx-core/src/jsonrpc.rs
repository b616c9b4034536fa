//! JSON-RPC 2.0 message model for line-delimited stdio framing
//!
//! Both sides of acpx speak newline-delimited JSON-RPC: the agent
//! subprocess on its stdio and the queue owner on its local socket. This
//! module classifies and validates raw frames without committing to a
//! method schema; typed ACP params live in [`crate::acp`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request id: number or string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) if *n >= 0 => Some(*n as u64),
            RequestId::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n as i64)
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified JSON-RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    ErrorResponse {
        id: Option<RequestId>,
        error: RpcErrorObject,
    },
}

/// Frame validation failures
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Line was not JSON at all
    Parse(String),
    /// JSON, but not a valid JSON-RPC 2.0 message
    Invalid(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Parse(msg) => write!(f, "unparseable frame: {}", msg),
            FrameError::Invalid(msg) => write!(f, "invalid JSON-RPC frame: {}", msg),
        }
    }
}

impl std::error::Error for FrameError {}

impl JsonRpcMessage {
    /// Parse one line into a classified message
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| FrameError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Classify and validate a decoded JSON value
    ///
    /// Rules: `jsonrpc == "2.0"`; either (method, optional id) or
    /// (id, result XOR error); `error.code` must be a finite number and
    /// `error.message` a non-empty string.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FrameError::Invalid("not an object".to_string()))?;

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some("2.0") => {}
            _ => return Err(FrameError::Invalid("jsonrpc must be \"2.0\"".to_string())),
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value::<RequestId>(v.clone())
                    .map_err(|_| FrameError::Invalid("id must be a number or string".to_string()))?,
            ),
        };

        if let Some(method) = obj.get("method") {
            let method = method
                .as_str()
                .ok_or_else(|| FrameError::Invalid("method must be a string".to_string()))?
                .to_string();
            let params = obj.get("params").cloned();
            return Ok(match id {
                Some(id) => JsonRpcMessage::Request { id, method, params },
                None => JsonRpcMessage::Notification { method, params },
            });
        }

        let result = obj.get("result");
        let error = obj.get("error");
        match (result, error) {
            (Some(result), None) => {
                let id = id.ok_or_else(|| {
                    FrameError::Invalid("response missing id".to_string())
                })?;
                Ok(JsonRpcMessage::Response {
                    id,
                    result: result.clone(),
                })
            }
            (None, Some(error)) => {
                let error = validate_error_object(error)?;
                Ok(JsonRpcMessage::ErrorResponse { id, error })
            }
            (Some(_), Some(_)) => Err(FrameError::Invalid(
                "response carries both result and error".to_string(),
            )),
            (None, None) => Err(FrameError::Invalid(
                "message has neither method nor result/error".to_string(),
            )),
        }
    }
}

fn validate_error_object(value: &Value) -> Result<RpcErrorObject, FrameError> {
    let obj = value
        .as_object()
        .ok_or_else(|| FrameError::Invalid("error must be an object".to_string()))?;

    let code = match obj.get("code") {
        Some(Value::Number(n)) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(FrameError::Invalid("error.code must be finite".to_string()));
            }
            n.as_i64().unwrap_or(f as i64)
        }
        _ => return Err(FrameError::Invalid("error.code must be a number".to_string())),
    };

    let message = match obj.get("message").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            return Err(FrameError::Invalid(
                "error.message must be a non-empty string".to_string(),
            ))
        }
    };

    Ok(RpcErrorObject {
        code,
        message,
        data: obj.get("data").cloned(),
    })
}

/// Build an outbound request frame
pub fn request_frame(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build an outbound notification frame
pub fn notification_frame(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Build a response frame for an inbound request
pub fn response_frame(id: &RequestId, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error-response frame for an inbound request
pub fn error_frame(id: Option<&RequestId>, code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// True when the frame is a response (result or error with an id)
///
/// The event writer uses this to update `lastRequestId`.
pub fn is_response(value: &Value) -> bool {
    value.get("id").map(|id| !id.is_null()).unwrap_or(false)
        && value.get("method").is_none()
        && (value.get("result").is_some() || value.get("error").is_some())
}

/// Standard JSON-RPC error codes used on the queue socket
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let msg = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .unwrap();
        match msg {
            JsonRpcMessage::Request { id, method, params } => {
                assert_eq!(id, RequestId::Number(1));
                assert_eq!(method, "initialize");
                assert!(params.is_some());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let msg =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","method":"session/update","params":{}}"#)
                .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification { .. }));
    }

    #[test]
    fn test_parse_response() {
        let msg =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"a-1","result":{"ok":true}}"#).unwrap();
        match msg {
            JsonRpcMessage::Response { id, .. } => {
                assert_eq!(id, RequestId::String("a-1".to_string()))
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let msg = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32002,"message":"session not found"}}"#,
        )
        .unwrap();
        match msg {
            JsonRpcMessage::ErrorResponse { error, .. } => {
                assert_eq!(error.code, -32002);
                assert_eq!(error.message, "session not found");
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert!(JsonRpcMessage::parse(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).is_err());
        assert!(JsonRpcMessage::parse(r#"{"id":1,"method":"x"}"#).is_err());
    }

    #[test]
    fn test_rejects_result_and_error() {
        let v = json!({"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"m"}});
        assert!(JsonRpcMessage::from_value(&v).is_err());
    }

    #[test]
    fn test_rejects_empty_error_message() {
        let v = json!({"jsonrpc":"2.0","id":1,"error":{"code":1,"message":""}});
        assert!(JsonRpcMessage::from_value(&v).is_err());
    }

    #[test]
    fn test_rejects_non_finite_error_code() {
        // serde_json cannot represent NaN/Infinity literals, but a missing
        // or non-numeric code must still fail validation.
        let v = json!({"jsonrpc":"2.0","id":1,"error":{"code":"boom","message":"m"}});
        assert!(JsonRpcMessage::from_value(&v).is_err());
    }

    #[test]
    fn test_unparseable_line() {
        assert!(matches!(
            JsonRpcMessage::parse("{not json"),
            Err(FrameError::Parse(_))
        ));
    }

    #[test]
    fn test_is_response() {
        assert!(is_response(&json!({"jsonrpc":"2.0","id":1,"result":{}})));
        assert!(is_response(
            &json!({"jsonrpc":"2.0","id":1,"error":{"code":1,"message":"m"}})
        ));
        assert!(!is_response(
            &json!({"jsonrpc":"2.0","method":"session/update","params":{}})
        ));
        assert!(!is_response(
            &json!({"jsonrpc":"2.0","id":1,"method":"session/prompt","params":{}})
        ));
    }

    #[test]
    fn test_frame_builders_roundtrip() {
        let req = request_frame(7, "session/prompt", json!({"x": 1}));
        match JsonRpcMessage::from_value(&req).unwrap() {
            JsonRpcMessage::Request { id, method, .. } => {
                assert_eq!(id, RequestId::Number(7));
                assert_eq!(method, "session/prompt");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = error_frame(Some(&RequestId::Number(7)), codes::PARSE_ERROR, "bad");
        match JsonRpcMessage::from_value(&err).unwrap() {
            JsonRpcMessage::ErrorResponse { error, .. } => {
                assert_eq!(error.code, codes::PARSE_ERROR)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
