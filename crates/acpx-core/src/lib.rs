//! # acpx-core - shared types for the acpx runtime
//!
//! Everything that crosses a crate or process boundary lives here: the
//! error taxonomy and exit codes, the JSON-RPC message model, the typed
//! ACP protocol surface, the queue socket wire protocol, the session
//! record model and small pure policies (permission table, TTL
//! normalization).

pub mod acp;
pub mod error;
pub mod jsonrpc;
pub mod permission;
pub mod queue_wire;
pub mod record;
pub mod ttl;

pub use error::{exit_code, AcpErrorPayload, AcpxError, ErrorCode, ErrorOrigin, Result};
pub use record::{AgentExit, EventLogManifest, ExitReason, MessageEntry, SessionRecord};
