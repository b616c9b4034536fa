//! # acpx-acp - Agent Client Protocol integration
//!
//! Spawning and driving ACP-compatible agents over line-delimited
//! JSON-RPC on their stdio. This crate handles the wire protocol and the
//! local tool surface (permissions, fs, terminals); queueing and
//! persistence live in `acpx-queue` and `acpx-store`.

pub mod client;
pub mod fs;
pub mod permissions;
pub mod process;
pub mod rpc;
pub mod terminal;

pub use client::{
    AcpClient, ClientEvent, ClientOptions, ConnectOutcome, EventSink, ResumeSession,
    DEFAULT_SHUTDOWN_GRACE,
};
pub use fs::FsHandler;
pub use permissions::{ask_on_tty, PermissionConfig, Resolution};
pub use process::{pid_alive, pid_matches_command, AgentCommand, AgentProcess, LifecycleSnapshot};
pub use terminal::{OutputBuffer, TerminalRegistry, DEFAULT_OUTPUT_LIMIT};
