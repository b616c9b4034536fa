//! # acpx-store - session persistence
//!
//! The flat directory of JSON session records, the per-session rolling
//! NDJSON event log, and the on-disk layout both share (including the
//! queue lock/socket paths derived from a session's record id).

pub mod event_log;
pub mod paths;
pub mod store;

pub use event_log::EventWriter;
pub use paths::StorePaths;
pub use store::{find_repo_root, SessionKey, SessionStore};
