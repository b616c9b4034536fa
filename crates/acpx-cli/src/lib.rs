//! # acpx-cli - the user-facing surface of acpx
//!
//! The runtime facade (`runtime`), the output sinks (`output`) and the
//! clap command tree (`cli`). The binary in `main.rs` is a thin wrapper
//! over [`cli::execute`].

pub mod cli;
pub mod output;
pub mod runtime;

pub use output::{sink_for, OutputMode, OutputSink};
pub use runtime::{AgentTarget, PromptSettings, Runtime, SendOutcome};
