//! Mock ACP agent for integration testing
//!
//! A stdio agent speaking newline-delimited JSON-RPC, scripted through
//! command-line flags and the prompt text itself:
//!
//! - `echo <text>`          stream `<text>` as one agent chunk, end_turn
//! - `sleep <ms>`           wait, honoring `session/cancel` (stops with
//!                          `cancelled`)
//! - `permission <title>`   ask `session/request_permission` for a tool
//!                          titled `<title>`, echo the outcome
//!
//! Flags: `--load-behavior ok|not_found`, `--replay <text>` (emit a
//! replay update during `session/load`), `--agent-session <id>`,
//! `--no-load-session` (drop the capability).

use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Config {
    load_behavior: String,
    replay_text: Option<String>,
    agent_session_id: String,
    load_session: bool,
}

impl Config {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut config = Self {
            load_behavior: "ok".to_string(),
            replay_text: None,
            agent_session_id: "provider-mock".to_string(),
            load_session: true,
        };
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--load-behavior" => {
                    if let Some(value) = iter.next() {
                        config.load_behavior = value.clone();
                    }
                }
                "--replay" => config.replay_text = iter.next().cloned(),
                "--agent-session" => {
                    if let Some(value) = iter.next() {
                        config.agent_session_id = value.clone();
                    }
                }
                "--no-load-session" => config.load_session = false,
                _ => {}
            }
        }
        config
    }
}

struct Agent {
    config: Config,
    session_id: Option<String>,
    next_request_id: u64,
    incoming: mpsc::Receiver<Value>,
}

fn write_line(value: &Value) {
    let mut stdout = std::io::stdout();
    let line = serde_json::to_string(value).expect("serialize frame");
    writeln!(stdout, "{}", line).expect("write frame");
    stdout.flush().expect("flush stdout");
}

fn result_frame(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_frame(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

impl Agent {
    fn session_update(&self, update: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": {
                "sessionId": self.session_id.clone().unwrap_or_default(),
                "update": update,
            }
        })
    }

    fn emit_chunk(&self, text: &str) {
        write_line(&self.session_update(json!({
            "sessionUpdate": "agent_message_chunk",
            "content": {"type": "text", "text": text},
        })));
    }

    fn handle(&mut self, message: Value) {
        // Responses to our own outbound requests can drift here when the
        // matching wait loop already gave up; drop them.
        let method = match message.get("method").and_then(Value::as_str) {
            Some(method) => method.to_string(),
            None => return,
        };
        let method = method.as_str();
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "initialize" => {
                write_line(&result_frame(
                    &id,
                    json!({
                        "protocolVersion": 1,
                        "agentCapabilities": {"loadSession": self.config.load_session},
                    }),
                ));
            }
            "session/new" => {
                let session_id = format!("mock-session-{}", std::process::id());
                self.session_id = Some(session_id.clone());
                write_line(&result_frame(&id, json!({"sessionId": session_id})));
            }
            "session/load" => {
                if self.config.load_behavior == "not_found" {
                    write_line(&error_frame(&id, -32002, "session not found"));
                    return;
                }
                let session_id = params
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .unwrap_or("loaded-session")
                    .to_string();
                self.session_id = Some(session_id.clone());
                // Replay history arrives while the load is outstanding;
                // a compliant client suppresses it.
                if let Some(replay) = self.config.replay_text.clone() {
                    self.emit_chunk(&replay);
                }
                write_line(&result_frame(
                    &id,
                    json!({
                        "sessionId": session_id,
                        "agentSessionId": self.config.agent_session_id,
                    }),
                ));
            }
            "session/prompt" => self.handle_prompt(&id, &params),
            "session/set_mode" => {
                write_line(&result_frame(&id, json!({})));
            }
            "session/set_config_option" => {
                write_line(&result_frame(
                    &id,
                    json!({
                        "configOptions": [{
                            "configId": params.get("configId"),
                            "value": params.get("value"),
                        }]
                    }),
                ));
            }
            "session/cancel" => {
                // Only meaningful while a prompt is being served; handled
                // inside handle_prompt's wait loop.
            }
            other => {
                if !id.is_null() {
                    write_line(&error_frame(&id, -32601, &format!("unknown method {}", other)));
                }
            }
        }
    }

    fn prompt_text(params: &Value) -> String {
        params
            .get("prompt")
            .and_then(Value::as_array)
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find_map(|block| block.get("text").and_then(Value::as_str))
            })
            .unwrap_or_default()
            .to_string()
    }

    fn handle_prompt(&mut self, id: &Value, params: &Value) {
        let text = Self::prompt_text(params);
        let mut words = text.split_whitespace();
        match words.next() {
            Some("echo") => {
                let rest: Vec<&str> = words.collect();
                self.emit_chunk(&rest.join(" "));
                write_line(&result_frame(id, json!({"stopReason": "end_turn"})));
            }
            Some("sleep") => {
                let total_ms: u64 = words.next().and_then(|w| w.parse().ok()).unwrap_or(1000);
                let deadline = std::time::Instant::now() + Duration::from_millis(total_ms);
                loop {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        write_line(&result_frame(id, json!({"stopReason": "end_turn"})));
                        return;
                    }
                    match self.incoming.recv_timeout(deadline - now) {
                        Ok(message) => {
                            let method =
                                message.get("method").and_then(Value::as_str).unwrap_or("");
                            if method == "session/cancel" {
                                write_line(&result_frame(id, json!({"stopReason": "cancelled"})));
                                return;
                            }
                            // Anything else waits its turn behind this prompt.
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
            Some("permission") => {
                let title: Vec<&str> = words.collect();
                let request_id = format!("perm-{}", self.next_request_id);
                self.next_request_id += 1;
                write_line(&json!({
                    "jsonrpc": "2.0",
                    "id": request_id,
                    "method": "session/request_permission",
                    "params": {
                        "sessionId": self.session_id.clone().unwrap_or_default(),
                        "toolCall": {"toolCallId": "tool-1", "title": title.join(" ")},
                        "options": [
                            {"optionId": "allow-once", "name": "Allow", "kind": "allow_once"},
                            {"optionId": "reject-once", "name": "Reject", "kind": "reject_once"},
                        ],
                    }
                }));

                // Wait for the client's answer (or an error) to our request.
                loop {
                    match self.incoming.recv_timeout(Duration::from_secs(10)) {
                        Ok(message) => {
                            if message.get("id").and_then(Value::as_str) == Some(&request_id) {
                                if let Some(error) = message.get("error") {
                                    let text = error
                                        .get("message")
                                        .and_then(Value::as_str)
                                        .unwrap_or("error")
                                        .to_string();
                                    self.emit_chunk(&format!("permission-error:{}", text));
                                } else {
                                    let outcome = &message["result"]["outcome"];
                                    let text = match outcome.get("outcome").and_then(Value::as_str)
                                    {
                                        Some("selected") => format!(
                                            "selected:{}",
                                            outcome
                                                .get("optionId")
                                                .and_then(Value::as_str)
                                                .unwrap_or("?")
                                        ),
                                        _ => "cancelled".to_string(),
                                    };
                                    self.emit_chunk(&text);
                                }
                                write_line(&result_frame(id, json!({"stopReason": "end_turn"})));
                                return;
                            }
                            if message.get("method").and_then(Value::as_str)
                                == Some("session/cancel")
                            {
                                write_line(&result_frame(id, json!({"stopReason": "cancelled"})));
                                return;
                            }
                        }
                        Err(_) => {
                            write_line(&result_frame(id, json!({"stopReason": "cancelled"})));
                            return;
                        }
                    }
                }
            }
            _ => {
                self.emit_chunk("ok");
                write_line(&result_frame(id, json!({"stopReason": "end_turn"})));
            }
        }
    }
}

fn main() {
    let config = Config::from_args();
    let (tx, rx) = mpsc::channel::<Value>();

    // Reader thread: every stdin line becomes a queued message so prompt
    // handlers can watch for session/cancel while they work.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => {
                    if tx.send(value).is_err() {
                        break;
                    }
                }
                Err(err) => eprintln!("mock agent: unparseable line: {}", err),
            }
        }
    });

    let mut agent = Agent {
        config,
        session_id: None,
        next_request_id: 1,
        incoming: rx,
    };

    loop {
        let message = match agent.incoming.recv() {
            Ok(message) => message,
            Err(_) => break,
        };
        agent.handle(message);
    }
}
