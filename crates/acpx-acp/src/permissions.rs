//! Applying the permission decision table to agent requests
//!
//! [`acpx_core::permission::decide`] fixes the policy; this module maps
//! the resulting decision onto the option list the agent offered and,
//! for the interactive branch, asks the user on the controlling TTY.

use acpx_core::acp::{
    PermissionOption, PermissionOutcome, RequestPermissionParams,
};
use acpx_core::permission::{
    decide, infer_tool_kind, NonInteractivePolicy, PermissionDecision, PermissionMode,
    PermissionStats,
};

/// Permission behavior for one client instance
#[derive(Debug, Clone, Copy)]
pub struct PermissionConfig {
    pub mode: PermissionMode,
    pub non_interactive: NonInteractivePolicy,
    /// Whether a controlling TTY is available for y/N prompts
    pub interactive: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            mode: PermissionMode::default(),
            non_interactive: NonInteractivePolicy::default(),
            interactive: false,
        }
    }
}

/// How a permission request resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Outcome(PermissionOutcome),
    /// Interactive prompting was required but unavailable (policy = fail)
    PromptUnavailable,
}

fn first_allow(options: &[PermissionOption]) -> Option<&PermissionOption> {
    options.iter().find(|option| option.kind.is_allow())
}

fn first_reject(options: &[PermissionOption]) -> Option<&PermissionOption> {
    options.iter().find(|option| option.kind.is_reject())
}

fn select_allow(options: &[PermissionOption]) -> PermissionOutcome {
    match first_allow(options).or_else(|| options.first()) {
        Some(option) => PermissionOutcome::Selected {
            option_id: option.option_id.clone(),
        },
        None => PermissionOutcome::Cancelled,
    }
}

fn select_reject(options: &[PermissionOption]) -> PermissionOutcome {
    match first_reject(options) {
        Some(option) => PermissionOutcome::Selected {
            option_id: option.option_id.clone(),
        },
        None => PermissionOutcome::Cancelled,
    }
}

/// The interactive y/N prompt, abstracted so tests can script answers
/// and production can push the blocking TTY read onto a blocking thread.
pub type AskFn = Box<dyn FnOnce(String) -> futures::future::BoxFuture<'static, bool> + Send>;

/// Resolve one `session/request_permission`, updating the stats
///
/// `ask` performs the interactive y/N prompt; production wraps
/// [`ask_on_tty`] in `spawn_blocking`, tests substitute a closure.
pub async fn resolve(
    config: &PermissionConfig,
    params: &RequestPermissionParams,
    stats: &mut PermissionStats,
    ask: AskFn,
) -> Resolution {
    stats.requested += 1;

    let title = params.tool_call.title.as_deref();
    let kind = infer_tool_kind(params.tool_call.kind.as_deref(), title);
    let decision = decide(config.mode, kind, config.interactive, config.non_interactive);

    let outcome = match decision {
        PermissionDecision::SelectAllow => select_allow(&params.options),
        PermissionDecision::SelectReject => select_reject(&params.options),
        PermissionDecision::AskUser => {
            let label = title.unwrap_or("tool call").to_string();
            if ask(label).await {
                select_allow(&params.options)
            } else {
                select_reject(&params.options)
            }
        }
        PermissionDecision::Fail => {
            stats.cancelled += 1;
            return Resolution::PromptUnavailable;
        }
    };

    match &outcome {
        PermissionOutcome::Selected { option_id } => {
            let approved = params
                .options
                .iter()
                .find(|option| &option.option_id == option_id)
                .map(|option| option.kind.is_allow())
                .unwrap_or(false);
            if approved {
                stats.approved += 1;
            } else {
                stats.denied += 1;
            }
        }
        PermissionOutcome::Cancelled => stats.cancelled += 1,
    }

    Resolution::Outcome(outcome)
}

/// Blocking y/N prompt on the controlling TTY
///
/// Prints to stderr so stdout stays clean for formatter output; an empty
/// or unreadable answer counts as "no".
pub fn ask_on_tty(title: &str) -> bool {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "agent requests permission: {} - allow? [y/N] ", title);
    let _ = stderr.flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
}
