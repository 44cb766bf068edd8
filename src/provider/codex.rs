//! Exec-per-call provider client for Codex (spec.md §4.6): a fresh child
//! per request, its own headless event vocabulary (spec.md §6), and
//! process-group kill on stream cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::{Result, SupervisorError};
use crate::protocol::TokenUsage;
use crate::ring_buffer::{lossy_channel, LossyReceiver};
use crate::session::args::{build_codex_args, CodexArgsConfig, CodexResume};
use crate::session::spawn;

use super::classify::{DefaultRetryClassifier, RetryClassifier};
use super::{Capabilities, CompletionRequest, CompletionResult, ProviderClient, StreamEvent, ToolCallRecord};

/// Bytes of stderr retained for attaching to a failed turn's error message
/// (spec.md §4.2 step 1: "the first 500 bytes are later attached").
const DEFAULT_STDERR_CAPTURE_BYTES: usize = 500;

#[derive(Clone)]
pub struct CodexProviderConfig {
    pub program: String,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub base_args: CodexArgsConfig,
    pub retry_classifier: Arc<dyn RetryClassifier>,
    pub stderr_capture_bytes: usize,
}

impl Default for CodexProviderConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            cwd: None,
            env: HashMap::new(),
            base_args: CodexArgsConfig::default(),
            retry_classifier: Arc::new(DefaultRetryClassifier),
            stderr_capture_bytes: DEFAULT_STDERR_CAPTURE_BYTES,
        }
    }
}

pub struct CodexProvider {
    config: CodexProviderConfig,
}

impl CodexProvider {
    pub fn new(config: CodexProviderConfig) -> Self {
        Self { config }
    }

    fn args_for(&self, request: &CompletionRequest) -> Vec<String> {
        let mut cfg = self.config.base_args.clone();
        cfg.prompt = Some(request.prompt.clone());
        if let Some(model) = &request.model {
            cfg.model = Some(model.clone());
        }
        if let Some(sid) = &request.session_id {
            cfg.resume = CodexResume::Session(sid.clone());
        }
        build_codex_args(&cfg)
    }

    async fn spawn_turn(&self, request: &CompletionRequest) -> Result<Child> {
        let args = self.args_for(request);
        let env = spawn::merge_env(&self.config.env);
        spawn::spawn_grouped(&self.config.program, &args, self.config.cwd.as_deref(), &env)
    }
}

/// One decoded Codex headless event, collapsed across the canonical
/// `thread.*`/`turn.*`/`item.*` vocabulary and its legacy aliases
/// (spec.md §6).
#[derive(Debug, Clone)]
enum CodexEvent {
    TextDelta(String),
    ToolCall { id: String, name: String, input: Value },
    Usage(TokenUsage),
    Done { usage: Option<TokenUsage> },
    Failed { message: String },
    /// `thread.started`, `turn.started`, `session`, a `reasoning` item, or
    /// anything else this layer has no use for.
    Ignored,
}

fn parse_codex_line(line: &str) -> Option<CodexEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let v: Value = serde_json::from_str(trimmed).ok()?;
    let type_tag = v.get("type").and_then(Value::as_str)?;

    match type_tag {
        "thread.started" | "turn.started" | "session" => Some(CodexEvent::Ignored),
        "turn.completed" | "done" | "complete" | "end" | "result" => {
            let usage = v
                .get("usage")
                .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
            Some(CodexEvent::Done { usage })
        }
        "turn.failed" | "error" => {
            let message = v
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| v.get("error").and_then(Value::as_str))
                .unwrap_or("codex turn failed")
                .to_string();
            Some(CodexEvent::Failed { message })
        }
        "usage" => {
            serde_json::from_value::<TokenUsage>(v.clone()).ok().map(CodexEvent::Usage)
        }
        "item.started" | "item.updated" | "item.completed" => {
            let item = v.get("item").unwrap_or(&v);
            parse_codex_item(item)
        }
        "content" | "text" | "assistant" | "message" => {
            let text = item_text(&v);
            if text.is_empty() {
                Some(CodexEvent::Ignored)
            } else {
                Some(CodexEvent::TextDelta(text))
            }
        }
        "tool_call" => Some(parse_tool_call(&v)),
        _ => None,
    }
}

fn parse_codex_item(item: &Value) -> Option<CodexEvent> {
    let item_type = item.get("item_type").or_else(|| item.get("type")).and_then(Value::as_str);
    match item_type {
        Some("agent_message") => {
            let text = item_text(item);
            if text.is_empty() {
                Some(CodexEvent::Ignored)
            } else {
                Some(CodexEvent::TextDelta(text))
            }
        }
        Some("reasoning") => Some(CodexEvent::Ignored),
        Some("tool_call") | Some("function_call") => Some(parse_tool_call(item)),
        _ => Some(CodexEvent::Ignored),
    }
}

fn item_text(v: &Value) -> String {
    v.get("delta")
        .or_else(|| v.get("text"))
        .or_else(|| v.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn parse_tool_call(v: &Value) -> CodexEvent {
    let id = v.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let name = v.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let input = v
        .get("input")
        .or_else(|| v.get("arguments"))
        .cloned()
        .unwrap_or(Value::Null);
    CodexEvent::ToolCall { id, name, input }
}

/// Drain `stderr` into a capped buffer, stopping further appends once the
/// capture limit is reached (spec.md §4.2 step 1).
fn spawn_stderr_capture(stderr: tokio::process::ChildStderr, cap: usize) -> Arc<Mutex<String>> {
    let captured = Arc::new(Mutex::new(String::new()));
    let out = captured.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "codex_stderr", "{line}");
            let mut buf = out.lock().await;
            if buf.len() < cap {
                buf.push_str(&line);
                buf.push('\n');
            }
        }
    });
    captured
}

fn classify_failure(
    classifier: &dyn RetryClassifier,
    message: &str,
    stderr: &str,
) -> SupervisorError {
    let full = if stderr.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {stderr}")
    };
    if classifier.is_retryable(stderr) || classifier.is_retryable(message) {
        SupervisorError::transient(full).retryable(true)
    } else {
        SupervisorError::upstream(full)
    }
}

#[async_trait]
impl ProviderClient for CodexProvider {
    fn provider(&self) -> &'static str {
        "codex"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tools: true,
            mcp: false,
            sessions: true,
            images: true,
            native_tool_names: vec!["shell".to_string(), "apply_patch".to_string()],
            context_file_name: Some("AGENTS.md".to_string()),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        let mut child = self.spawn_turn(&request).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn("codex child stdout was not piped"))?;
        let stderr_capture = child
            .stderr
            .take()
            .map(|s| spawn_stderr_capture(s, self.config.stderr_capture_bytes));

        let mut lines = BufReader::new(stdout).lines();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;
        let mut failed: Option<String> = None;

        while let Ok(Some(line)) = lines.next_line().await {
            match parse_codex_line(&line) {
                Some(CodexEvent::TextDelta(d)) => text.push_str(&d),
                Some(CodexEvent::ToolCall { id, name, input }) => {
                    tool_calls.push(ToolCallRecord { id, name, input })
                }
                Some(CodexEvent::Usage(u)) => usage = Some(u),
                Some(CodexEvent::Done { usage: u }) => {
                    if u.is_some() {
                        usage = u;
                    }
                    break;
                }
                Some(CodexEvent::Failed { message }) => {
                    failed = Some(message);
                    break;
                }
                Some(CodexEvent::Ignored) | None => {}
            }
        }

        let status = child.wait().await.map_err(SupervisorError::from)?;
        let stderr_snippet = match stderr_capture {
            Some(buf) => buf.lock().await.clone(),
            None => String::new(),
        };

        if let Some(message) = failed {
            return Err(classify_failure(self.config.retry_classifier.as_ref(), &message, &stderr_snippet));
        }
        if !status.success() {
            return Err(classify_failure(
                self.config.retry_classifier.as_ref(),
                &format!("codex exited with {status}"),
                &stderr_snippet,
            ));
        }

        Ok(CompletionResult {
            text,
            tool_calls,
            usage,
            cost_usd: None,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: Arc<Notify>,
    ) -> Result<LossyReceiver<StreamEvent>> {
        let mut child = self.spawn_turn(&request).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn("codex child stdout was not piped"))?;
        let stderr_capture = child
            .stderr
            .take()
            .map(|s| spawn_stderr_capture(s, self.config.stderr_capture_bytes));
        let classifier = self.config.retry_classifier.clone();
        let pid = child.id();

        let (tx, rx) = lossy_channel(256);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.notified() => {
                        #[cfg(unix)]
                        let _ = spawn::kill_group(pid, libc::SIGKILL);
                        let _ = child.kill().await;
                        tx.push(StreamEvent::Error("cancelled".to_string()));
                        return;
                    }
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else {
                            break;
                        };
                        match parse_codex_line(&line) {
                            Some(CodexEvent::TextDelta(d)) => tx.push(StreamEvent::TextDelta(d)),
                            Some(CodexEvent::ToolCall { id, name, input }) => {
                                tx.push(StreamEvent::ToolCall(ToolCallRecord { id, name, input }))
                            }
                            Some(CodexEvent::Done { usage }) => {
                                tx.push(StreamEvent::Done { usage, cost_usd: None });
                                let _ = child.wait().await;
                                return;
                            }
                            Some(CodexEvent::Failed { message }) => {
                                let stderr_snippet = match &stderr_capture {
                                    Some(buf) => buf.lock().await.clone(),
                                    None => String::new(),
                                };
                                let err = classify_failure(classifier.as_ref(), &message, &stderr_snippet);
                                tx.push(StreamEvent::Error(err.to_string()));
                                let _ = child.wait().await;
                                return;
                            }
                            Some(CodexEvent::Usage(_)) | Some(CodexEvent::Ignored) | None => {}
                        }
                    }
                }
            }
            tx.push(StreamEvent::Done { usage: None, cost_usd: None });
            let _ = child.wait().await;
        });
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        // Exec-per-call: no persistent resources to release.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_message_item_delta() {
        let line = r#"{"type":"item.updated","item":{"item_type":"agent_message","delta":"Hi"}}"#;
        match parse_codex_line(line) {
            Some(CodexEvent::TextDelta(d)) => assert_eq!(d, "Hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_legacy_tool_call_alias() {
        let line = r#"{"type":"tool_call","id":"t1","name":"shell","input":{"cmd":"ls"}}"#;
        match parse_codex_line(line) {
            Some(CodexEvent::ToolCall { id, name, .. }) => {
                assert_eq!(id, "t1");
                assert_eq!(name, "shell");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ignores_reasoning_items() {
        let line = r#"{"type":"item.completed","item":{"item_type":"reasoning","text":"thinking..."}}"#;
        assert!(matches!(parse_codex_line(line), Some(CodexEvent::Ignored)));
    }

    #[test]
    fn turn_failed_carries_message() {
        let line = r#"{"type":"turn.failed","message":"rate limit exceeded"}"#;
        match parse_codex_line(line) {
            Some(CodexEvent::Failed { message }) => assert_eq!(message, "rate limit exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_returns_none() {
        assert!(parse_codex_line(r#"{"type":"something_else"}"#).is_none());
    }

    #[test]
    fn classify_failure_marks_retryable_on_rate_limit() {
        let classifier = DefaultRetryClassifier;
        let err = classify_failure(&classifier, "turn failed", "rate limit hit");
        assert!(err.is_retryable());
        assert_eq!(err.kind(), crate::error::ErrorKind::Transient);
    }

    #[test]
    fn classify_failure_non_retryable_without_match() {
        let classifier = DefaultRetryClassifier;
        let err = classify_failure(&classifier, "turn failed", "invalid argument");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
    }
}
