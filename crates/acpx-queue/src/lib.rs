//! # acpx-queue - per-session queue ownership
//!
//! Exactly one owner process per session holds the agent subprocess and
//! serializes prompt turns. This crate provides the lease (exclusive
//! lock + socket path), the owner loop, the client that submits work
//! over the socket, the turn controller, and detached owner spawning.

pub mod client;
pub mod lease;
pub mod owner;
pub mod spawn;
pub mod turn;

pub use client::{
    submit_prompt_or_spawn, try_control, try_submit_prompt, ControlOutcome, SubmitOutcome,
    ACK_TIMEOUT,
};
pub use lease::{acquire, read_lock, Acquire, LockInfo, QueueLease};
pub use owner::{OwnerHandler, PromptTask, QueueOwner, ReplySender};
pub use spawn::{spawn_detached_owner, OwnerSpawnSpec};
pub use turn::{ActiveController, Lifecycle, TurnController};
