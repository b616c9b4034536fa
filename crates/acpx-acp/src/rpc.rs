//! Small JSON-RPC plumbing shared by the ACP client
//!
//! The client multiplexes many outstanding requests over one stdio pipe;
//! this module holds the pending-request map and the failure type that
//! distinguishes an agent's negative response from a broken transport.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use acpx_core::error::{detail, AcpErrorPayload, AcpxError, ErrorCode};
use acpx_core::jsonrpc::RpcErrorObject;
use serde_json::Value;

/// How an outbound request can fail
#[derive(Debug)]
pub enum RpcFailure {
    /// The agent answered with a JSON-RPC error
    Agent(RpcErrorObject),
    /// The transport broke or the wait timed out
    Transport(AcpxError),
}

impl RpcFailure {
    /// Convert into the wire error shape, preserving the ACP payload
    pub fn into_acpx(self, context: &str) -> AcpxError {
        match self {
            RpcFailure::Agent(error) => {
                let code = if acpx_core::acp::is_session_not_found(&error) {
                    ErrorCode::NoSession
                } else {
                    ErrorCode::Runtime
                };
                let message = if acpx_core::acp::is_auth_required(&error) {
                    format!("{}: agent requires authentication: {}", context, error.message)
                } else {
                    format!("{}: {}", context, error.message)
                };
                AcpxError::new(code, acpx_core::ErrorOrigin::Agent, message).with_acp(
                    AcpErrorPayload {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    },
                )
            }
            RpcFailure::Transport(error) => error,
        }
    }
}

type PendingSender = oneshot::Sender<Result<Value, RpcErrorObject>>;

/// Outstanding requests indexed by id
#[derive(Default)]
pub struct PendingMap {
    inner: Mutex<HashMap<u64, PendingSender>>,
}

impl PendingMap {
    pub fn register(&self, id: u64) -> oneshot::Receiver<Result<Value, RpcErrorObject>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(id, tx);
        rx
    }

    pub fn forget(&self, id: u64) {
        self.inner.lock().unwrap().remove(&id);
    }

    /// Complete one request; unknown ids are dropped with a warning
    pub fn complete(&self, id: u64, outcome: Result<Value, RpcErrorObject>) {
        match self.inner.lock().unwrap().remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!("response for unknown request id {}", id),
        }
    }

    /// Fail every outstanding request, used when the agent disconnects
    pub fn fail_all(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        for (_, tx) in inner.drain() {
            let _ = tx.send(Err(RpcErrorObject {
                code: acpx_core::jsonrpc::codes::INTERNAL_ERROR,
                message: reason.to_string(),
                data: None,
            }));
        }
    }
}

/// The transport-side error for an agent that went away mid-call
pub fn disconnected_error() -> AcpxError {
    AcpxError::agent("agent disconnected").with_detail(detail::AGENT_DISCONNECTED)
}
