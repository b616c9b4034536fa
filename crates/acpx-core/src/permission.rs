//! Permission policy as data
//!
//! The five inputs of a permission decision (mode, inferred tool kind,
//! interactive TTY, non-interactive policy) fully determine the outcome,
//! so the decision is a pure lookup here; applying it to the agent's
//! option list happens in the ACP client.

use serde::{Deserialize, Serialize};

/// How the client answers `session/request_permission`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    ApproveAll,
    #[default]
    ApproveReads,
    DenyAll,
}

/// What to do when a non-read tool needs approval but no TTY is attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonInteractivePolicy {
    #[default]
    Deny,
    Fail,
}

/// Per-client-lifetime permission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStats {
    pub requested: u64,
    pub approved: u64,
    pub denied: u64,
    pub cancelled: u64,
}

impl PermissionStats {
    /// True when at least one request arrived and none were approved
    pub fn all_denied(&self) -> bool {
        self.requested > 0 && self.approved == 0
    }

    /// Add another set of counters into this one
    pub fn absorb(&mut self, other: &PermissionStats) {
        self.requested += other.requested;
        self.approved += other.approved;
        self.denied += other.denied;
        self.cancelled += other.cancelled;
    }
}

/// Tool-call classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Execute,
    Fetch,
    Think,
    Search,
    Other,
}

impl ToolKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "read" => Some(ToolKind::Read),
            "edit" => Some(ToolKind::Edit),
            "delete" => Some(ToolKind::Delete),
            "move" => Some(ToolKind::Move),
            "execute" => Some(ToolKind::Execute),
            "fetch" => Some(ToolKind::Fetch),
            "think" => Some(ToolKind::Think),
            "search" => Some(ToolKind::Search),
            "other" => Some(ToolKind::Other),
            _ => None,
        }
    }

    /// Kinds auto-approved under `approve-reads`
    pub fn is_read_like(&self) -> bool {
        matches!(self, ToolKind::Read | ToolKind::Search)
    }
}

/// Keyword map for inferring a tool kind from its title when the request
/// does not carry one.
const TITLE_KEYWORDS: &[(&str, ToolKind)] = &[
    ("read", ToolKind::Read),
    ("cat", ToolKind::Read),
    ("write", ToolKind::Edit),
    ("edit", ToolKind::Edit),
    ("patch", ToolKind::Edit),
    ("delete", ToolKind::Delete),
    ("remove", ToolKind::Delete),
    ("move", ToolKind::Move),
    ("rename", ToolKind::Move),
    ("run", ToolKind::Execute),
    ("execute", ToolKind::Execute),
    ("bash", ToolKind::Execute),
    ("fetch", ToolKind::Fetch),
    ("http", ToolKind::Fetch),
    ("url", ToolKind::Fetch),
    ("think", ToolKind::Think),
    ("search", ToolKind::Search),
    ("find", ToolKind::Search),
    ("grep", ToolKind::Search),
];

/// Infer a tool kind from an explicit wire kind or, failing that, the
/// tool title. First keyword hit wins; no hit means [`ToolKind::Other`].
pub fn infer_tool_kind(wire_kind: Option<&str>, title: Option<&str>) -> ToolKind {
    if let Some(kind) = wire_kind.and_then(ToolKind::from_wire) {
        return kind;
    }
    let title = match title {
        Some(t) => t.to_lowercase(),
        None => return ToolKind::Other,
    };
    for (keyword, kind) in TITLE_KEYWORDS {
        if title.contains(keyword) {
            return *kind;
        }
    }
    ToolKind::Other
}

/// What the client should do with a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Select the first allow option (fall back to the first option)
    SelectAllow,
    /// Select the first reject option (fall back to cancelled)
    SelectReject,
    /// Ask the user y/N on the controlling TTY
    AskUser,
    /// Fail the request with `PERMISSION_PROMPT_UNAVAILABLE`
    Fail,
}

/// The decision table: mode x tool kind x TTY x policy, first match wins.
pub fn decide(
    mode: PermissionMode,
    kind: ToolKind,
    interactive: bool,
    policy: NonInteractivePolicy,
) -> PermissionDecision {
    match (mode, kind.is_read_like(), interactive, policy) {
        (PermissionMode::ApproveAll, _, _, _) => PermissionDecision::SelectAllow,
        (PermissionMode::DenyAll, _, _, _) => PermissionDecision::SelectReject,
        (PermissionMode::ApproveReads, true, _, _) => PermissionDecision::SelectAllow,
        (PermissionMode::ApproveReads, false, true, _) => PermissionDecision::AskUser,
        (PermissionMode::ApproveReads, false, false, NonInteractivePolicy::Deny) => {
            PermissionDecision::SelectReject
        }
        (PermissionMode::ApproveReads, false, false, NonInteractivePolicy::Fail) => {
            PermissionDecision::Fail
        }
    }
}
