//! Integration tests driving the ACP client against the mock agent
//!
//! Each test spawns a real subprocess (the `mock-acp-agent` binary) and
//! exercises the full handshake, prompt streaming, cancellation,
//! load-vs-new fallback and replay suppression paths.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use acpx_acp::{AcpClient, ClientEvent, ClientOptions, PermissionConfig, ResumeSession};
use acpx_core::acp::{SessionUpdate, StopReason};
use acpx_core::permission::{NonInteractivePolicy, PermissionMode};
use acpx_core::ErrorCode;

fn mock_agent_command(flags: &str) -> String {
    let exe = env!("CARGO_BIN_EXE_mock-acp-agent");
    if flags.is_empty() {
        exe.to_string()
    } else {
        format!("{} {}", exe, flags)
    }
}

#[derive(Clone, Default)]
struct Collected {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl Collected {
    fn sink(&self) -> acpx_acp::EventSink {
        let events = self.events.clone();
        Arc::new(move |event| events.lock().unwrap().push(event))
    }

    fn chunks(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Update(notification) => match &notification.update {
                    SessionUpdate::AgentMessageChunk { content } => {
                        content.as_text().map(str::to_string)
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn frame_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, ClientEvent::Frame(_)))
            .count()
    }
}

fn options(flags: &str, mode: PermissionMode, policy: NonInteractivePolicy) -> ClientOptions {
    ClientOptions {
        agent_command: mock_agent_command(flags),
        cwd: std::env::temp_dir(),
        permission: PermissionConfig {
            mode,
            non_interactive: policy,
            interactive: false,
        },
        request_timeout: Some(Duration::from_secs(10)),
    }
}

async fn started(flags: &str) -> (AcpClient, Collected) {
    let collected = Collected::default();
    let client = AcpClient::start(
        options(flags, PermissionMode::ApproveAll, NonInteractivePolicy::Deny),
        collected.sink(),
    )
    .await
    .expect("client start");
    (client, collected)
}

#[tokio::test]
async fn test_handshake_and_prompt_streams_chunks() {
    let (client, collected) = started("").await;

    let init = client.initialize().await.unwrap();
    assert_eq!(init.protocol_version, 1);
    assert!(client.supports_load());

    let outcome = client.connect_session(None).await.unwrap();
    assert!(outcome.created_new);
    assert!(outcome.session_id.starts_with("mock-session-"));

    let result = client.prompt("echo first", None).await.unwrap();
    assert_eq!(result.stop_reason, StopReason::EndTurn);
    assert_eq!(collected.chunks(), vec!["first".to_string()]);

    // The event mirror saw at least the three request/response pairs
    // plus the update notification.
    assert!(collected.frame_count() >= 7);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_resume_via_load_reconciles_agent_session_id() {
    let (client, collected) = started("--agent-session provider-X").await;
    client.initialize().await.unwrap();

    let outcome = client
        .connect_session(Some(ResumeSession {
            acp_session_id: "resume-1".to_string(),
            agent_session_id: Some("stale-provider".to_string()),
        }))
        .await
        .unwrap();

    assert!(!outcome.created_new);
    assert_eq!(outcome.session_id, "resume-1");
    assert_eq!(outcome.agent_session_id.as_deref(), Some("provider-X"));
    assert!(outcome.load_error.is_none());

    let result = client.prompt("echo hello", None).await.unwrap();
    assert_eq!(result.stop_reason, StopReason::EndTurn);
    assert_eq!(collected.chunks(), vec!["hello".to_string()]);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_load_fallback_creates_new_session() {
    let (client, _collected) = started("--load-behavior not_found").await;
    client.initialize().await.unwrap();

    let outcome = client
        .connect_session(Some(ResumeSession {
            acp_session_id: "gone-session".to_string(),
            agent_session_id: None,
        }))
        .await
        .unwrap();

    assert!(outcome.created_new);
    assert!(outcome.session_id.starts_with("mock-session-"));
    assert!(outcome
        .load_error
        .as_deref()
        .unwrap()
        .contains("session not found"));

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_replay_updates_are_suppressed() {
    let (client, collected) = started("--replay REPLAY").await;
    client.initialize().await.unwrap();

    client
        .connect_session(Some(ResumeSession {
            acp_session_id: "resume-2".to_string(),
            agent_session_id: None,
        }))
        .await
        .unwrap();

    client.prompt("echo FRESH", None).await.unwrap();

    let chunks = collected.chunks();
    assert_eq!(chunks, vec!["FRESH".to_string()]);

    // The suppressed replay frame must not appear in the mirror either.
    let frames = collected.events.lock().unwrap();
    for event in frames.iter() {
        if let ClientEvent::Frame(frame) = event {
            assert!(!frame.to_string().contains("REPLAY"), "leaked: {}", frame);
        }
    }
    drop(frames);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_cancel_active_prompt() {
    let (client, _collected) = started("").await;
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    let client = Arc::new(client);
    let prompt_client = client.clone();
    let prompt_task =
        tokio::spawn(async move { prompt_client.prompt("sleep 5000", None).await });

    // Let the prompt reach the agent before cancelling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let cancelled = client.cancel_active_prompt(Duration::from_secs(2)).await;
    assert!(cancelled);

    let result = prompt_task.await.unwrap().unwrap();
    assert_eq!(result.stop_reason, StopReason::Cancelled);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_cancel_without_active_prompt_is_noop() {
    let (client, _collected) = started("").await;
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    assert!(!client.cancel_active_prompt(Duration::from_millis(100)).await);
    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_permission_approve_all_selects_allow() {
    let (client, collected) = started("").await;
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    let result = client.prompt("permission Edit main.rs", None).await.unwrap();
    assert_eq!(result.stop_reason, StopReason::EndTurn);
    assert_eq!(collected.chunks(), vec!["selected:allow-once".to_string()]);

    let stats = client.permission_stats();
    assert_eq!(stats.requested, 1);
    assert_eq!(stats.approved, 1);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_permission_deny_all_selects_reject() {
    let collected = Collected::default();
    let client = AcpClient::start(
        options("", PermissionMode::DenyAll, NonInteractivePolicy::Deny),
        collected.sink(),
    )
    .await
    .unwrap();
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    client.prompt("permission Edit main.rs", None).await.unwrap();
    assert_eq!(collected.chunks(), vec!["selected:reject-once".to_string()]);

    let stats = client.permission_stats();
    assert!(stats.all_denied());

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_permission_prompt_unavailable_fails_prompt() {
    let collected = Collected::default();
    let client = AcpClient::start(
        options("", PermissionMode::ApproveReads, NonInteractivePolicy::Fail),
        collected.sink(),
    )
    .await
    .unwrap();
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    let err = client
        .prompt("permission Write secrets.txt", None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionPromptUnavailable);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_set_mode_and_config_option() {
    let (client, _collected) = started("").await;
    client.initialize().await.unwrap();
    client.connect_session(None).await.unwrap();

    client.set_session_mode("plan", None).await.unwrap();

    let config_options = client
        .set_session_config_option("model", serde_json::json!("fast"), None)
        .await
        .unwrap();
    assert_eq!(config_options.len(), 1);
    assert_eq!(config_options[0]["configId"], "model");
    assert_eq!(config_options[0]["value"], "fast");

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_agent_without_load_capability_creates_new() {
    let (client, _collected) = started("--no-load-session").await;
    client.initialize().await.unwrap();
    assert!(!client.supports_load());

    let outcome = client
        .connect_session(Some(ResumeSession {
            acp_session_id: "resume-3".to_string(),
            agent_session_id: None,
        }))
        .await
        .unwrap();
    assert!(outcome.created_new);

    client.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_lifecycle_snapshot_reports_pid() {
    let (client, _collected) = started("").await;
    let snapshot = client.lifecycle_snapshot().expect("live snapshot");
    let pid = snapshot.pid.expect("agent pid");
    assert!(acpx_acp::pid_alive(pid));

    client.close(Duration::from_secs(5)).await;
    assert!(!acpx_acp::pid_alive(pid));
}
