//! Long-lived-session provider client for the Claude family (spec.md
//! §4.6): one child per conversation, many turns per child, via
//! [`crate::session::SessionManager`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::ring_buffer::{lossy_channel, LossyReceiver};
use crate::session::args::{build_claude_args, ClaudeArgsConfig, ClaudeResume};
use crate::session::{ManagerConfig, Session, SessionConfig, SessionManager};

use super::{Capabilities, CompletionRequest, CompletionResult, ProviderClient, StreamEvent, ToolCallRecord};

#[derive(Debug, Clone)]
pub struct ClaudeProviderConfig {
    pub program: String,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    /// Applied to every spawned session; `resume` is overwritten per-call
    /// from `CompletionRequest::session_id`.
    pub base_args: ClaudeArgsConfig,
    pub manager: ManagerConfig,
}

impl Default for ClaudeProviderConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            cwd: None,
            env: HashMap::new(),
            base_args: ClaudeArgsConfig::default(),
            manager: ManagerConfig::default(),
        }
    }
}

pub struct ClaudeProvider {
    config: ClaudeProviderConfig,
    manager: Arc<SessionManager>,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeProviderConfig) -> Self {
        let manager = SessionManager::new(config.manager.clone());
        Self { config, manager }
    }

    fn session_config(&self, session_id: &str, resumed: bool) -> SessionConfig {
        let mut args_cfg = self.config.base_args.clone();
        args_cfg.resume = if resumed {
            ClaudeResume::Resume(session_id.to_string())
        } else {
            ClaudeResume::SessionId(session_id.to_string())
        };
        SessionConfig {
            program: self.config.program.clone(),
            args: build_claude_args(&args_cfg),
            cwd: self.config.cwd.clone(),
            env: self.config.env.clone(),
            ..Default::default()
        }
    }

    /// Get the existing Active session for `session_id`, or spawn a fresh
    /// one (resuming if one already exists but is no longer Active).
    async fn ensure_session(&self, session_id: Option<&str>) -> Result<Arc<Session>> {
        match session_id {
            Some(id) => {
                if let Some(session) = self.manager.get(id).await {
                    return Ok(session);
                }
                let config = self.session_config(id, true);
                self.manager.create(id.to_string(), config).await
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let config = self.session_config(&id, false);
                self.manager.create(id, config).await
            }
        }
    }
}

/// Drive one turn on an already-active session to its terminal `result`
/// event, aggregating assistant text, tool calls, usage, and cost.
async fn run_turn(session: &Session, prompt: &str) -> Result<CompletionResult> {
    session.send(prompt).await?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    let mut cost_usd = None;

    loop {
        let event = session
            .recv()
            .await
            .ok_or_else(|| SupervisorError::io("session output channel closed before a result event"))?;

        if event.is_assistant() {
            text.push_str(&event.text());
            for tc in event.tool_calls() {
                tool_calls.push(ToolCallRecord {
                    id: tc.id.to_string(),
                    name: tc.name.to_string(),
                    input: tc.input.clone(),
                });
            }
            if let Some(u) = event.usage() {
                usage = Some(*u);
            }
        } else if event.is_result() {
            cost_usd = event.result_cost_usd();
            if text.is_empty() {
                text = event.text();
            }
            break;
        }
    }

    Ok(CompletionResult {
        text,
        tool_calls,
        usage,
        cost_usd,
    })
}

#[async_trait]
impl ProviderClient for ClaudeProvider {
    fn provider(&self) -> &'static str {
        "claude"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tools: true,
            mcp: true,
            sessions: true,
            images: true,
            native_tool_names: vec![
                "Read".to_string(),
                "Write".to_string(),
                "Edit".to_string(),
                "Bash".to_string(),
                "Glob".to_string(),
                "Grep".to_string(),
                "WebFetch".to_string(),
                "WebSearch".to_string(),
            ],
            context_file_name: Some("CLAUDE.md".to_string()),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        let session = self.ensure_session(request.session_id.as_deref()).await?;
        session.wait_for_init(std::time::Duration::from_secs(30)).await?;
        run_turn(&session, &request.prompt).await
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: Arc<Notify>,
    ) -> Result<LossyReceiver<StreamEvent>> {
        let session = self.ensure_session(request.session_id.as_deref()).await?;
        session.wait_for_init(std::time::Duration::from_secs(30)).await?;
        session.send(&request.prompt).await?;

        let (tx, rx) = lossy_channel(256);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.notified() => return,
                    event = session.recv() => {
                        let Some(event) = event else { return };
                        if event.is_assistant() {
                            let text = event.text();
                            if !text.is_empty() {
                                tx.push(StreamEvent::TextDelta(text));
                            }
                            for tc in event.tool_calls() {
                                tx.push(StreamEvent::ToolCall(ToolCallRecord {
                                    id: tc.id.to_string(),
                                    name: tc.name.to_string(),
                                    input: tc.input.clone(),
                                }));
                            }
                        } else if event.is_result() {
                            tx.push(StreamEvent::Done {
                                usage: event.usage().copied(),
                                cost_usd: event.result_cost_usd(),
                            });
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.manager.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config() -> ClaudeProviderConfig {
        ClaudeProviderConfig {
            program: "sh".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn complete_aggregates_assistant_text_and_cost() {
        let script = r#"printf '{"type":"system","subtype":"init","session_id":"s1"}\n{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}\n{"type":"result","subtype":"success","is_error":false,"result":"hi","total_cost_usd":0.1}\n'"#;
        let mut provider = ClaudeProvider::new(sh_config());
        provider.config.base_args = ClaudeArgsConfig::default();
        // Override the args actually spawned so `sh -c <script>` runs instead
        // of the real Claude flag grammar.
        let session_id = "fixed-id".to_string();
        let config = SessionConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        };
        let session = provider.manager.create(session_id.clone(), config).await.unwrap();
        session.wait_for_init(std::time::Duration::from_secs(2)).await.unwrap();

        let result = run_turn(&session, "hello").await.unwrap();
        assert_eq!(result.text, "hi");
        assert_eq!(result.cost_usd, Some(0.1));
    }
}
