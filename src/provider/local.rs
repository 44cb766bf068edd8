//! Sidecar-backed provider client for local models (spec.md §4.6): one
//! long-lived JSON-RPC peer shared across every request, driven through
//! [`crate::sidecar::Sidecar`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::protocol::TokenUsage;
use crate::ring_buffer::{lossy_channel, LossyReceiver};
use crate::sidecar::{Sidecar, SidecarConfig};

use super::{Capabilities, CompletionRequest, CompletionResult, ProviderClient, StreamEvent, ToolCallRecord};

/// `request.messages` as wire-shape objects, falling back to a single user
/// message built from `request.prompt` when the caller left it empty.
fn request_messages(request: &CompletionRequest) -> Vec<Value> {
    if request.messages.is_empty() {
        vec![json!({"role": "user", "content": request.prompt})]
    } else {
        request
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub sidecar: SidecarConfig,
    pub model: Option<String>,
    pub native_tool_names: Vec<String>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            sidecar: SidecarConfig::default(),
            model: None,
            native_tool_names: Vec::new(),
        }
    }
}

pub struct LocalProvider {
    config: LocalProviderConfig,
    sidecar: Arc<Sidecar>,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        let sidecar = Sidecar::new(config.sidecar.clone());
        Self { config, sidecar }
    }

    /// Builds the `{messages, model?, system_prompt?, max_tokens?,
    /// temperature?, stream?}` params shared by `complete` and
    /// `stream.start` (spec.md §4.6).
    fn request_params(&self, request: &CompletionRequest, stream: bool) -> Value {
        json!({
            "messages": request_messages(request),
            "model": request.model.clone().or_else(|| self.config.model.clone()),
            "system_prompt": request.system_prompt,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    /// Parses a `{content, model?, finish_reason?, usage}` response.
    /// `tool_calls`/`cost_usd` are read permissively if a sidecar chooses
    /// to include them, though neither is part of the wire contract.
    fn parse_completion(value: &Value) -> CompletionResult {
        let text = value.get("content").and_then(Value::as_str).unwrap_or("").to_string();
        let tool_calls = value
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(parse_tool_call_value).collect())
            .unwrap_or_default();
        let usage = value
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
        let cost_usd = value.get("cost_usd").and_then(Value::as_f64);
        CompletionResult {
            text,
            tool_calls,
            usage,
            cost_usd,
        }
    }
}

fn parse_tool_call_value(v: &Value) -> Option<ToolCallRecord> {
    Some(ToolCallRecord {
        id: v.get("id")?.as_str()?.to_string(),
        name: v.get("name")?.as_str()?.to_string(),
        input: v.get("input").cloned().unwrap_or(Value::Null),
    })
}

#[async_trait]
impl ProviderClient for LocalProvider {
    fn provider(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tools: !self.config.native_tool_names.is_empty(),
            mcp: false,
            sessions: false,
            images: false,
            native_tool_names: self.config.native_tool_names.clone(),
            context_file_name: None,
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        let params = self.request_params(&request, false);
        let result = self.sidecar.call("complete", Some(params)).await?;
        Ok(Self::parse_completion(&result))
    }

    /// Starts the stream with a `stream.start` call carrying a fresh
    /// `stream_id`, then drains push notifications tagged with that id
    /// (`stream.chunk` / `stream.done` / `stream.error`) until a terminal
    /// notification arrives or `cancel` fires.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: Arc<Notify>,
    ) -> Result<LossyReceiver<StreamEvent>> {
        let stream_id = Uuid::new_v4().to_string();
        let mut params = self.request_params(&request, true);
        params["stream_id"] = json!(stream_id.clone());
        self.sidecar.call("stream.start", Some(params)).await?;

        let sidecar = self.sidecar.clone();
        let (tx, rx) = lossy_channel(256);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.notified() => {
                        let _ = sidecar.call("stream.cancel", Some(json!({"stream_id": stream_id}))).await;
                        tx.push(StreamEvent::Error("cancelled".to_string()));
                        return;
                    }
                    notification = sidecar.recv_notification() => {
                        let Some(notification) = notification else { return };
                        let Some(params) = &notification.params else { continue };
                        if params.get("stream_id").and_then(Value::as_str) != Some(stream_id.as_str()) {
                            continue;
                        }
                        match notification.method.as_str() {
                            "stream.chunk" => {
                                if let Some(delta) = params.get("content").and_then(Value::as_str) {
                                    if !delta.is_empty() {
                                        tx.push(StreamEvent::TextDelta(delta.to_string()));
                                    }
                                }
                                if let Some(tc) = params.get("tool_call").and_then(parse_tool_call_value) {
                                    tx.push(StreamEvent::ToolCall(tc));
                                }
                                // A chunk can carry `done: true` in place of a
                                // separate terminal `stream.done` notification;
                                // without checking it a sidecar that folds
                                // completion into the last chunk would leave
                                // this loop waiting forever.
                                let done = params.get("done").and_then(Value::as_bool).unwrap_or(false);
                                if done {
                                    let usage = params
                                        .get("usage")
                                        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
                                    let cost_usd = params.get("cost_usd").and_then(Value::as_f64);
                                    tx.push(StreamEvent::Done { usage, cost_usd });
                                    return;
                                }
                            }
                            "stream.done" => {
                                let usage = params
                                    .get("usage")
                                    .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
                                let cost_usd = params.get("cost_usd").and_then(Value::as_f64);
                                tx.push(StreamEvent::Done { usage, cost_usd });
                                return;
                            }
                            "stream.error" => {
                                let message = params
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .unwrap_or("sidecar stream error")
                                    .to_string();
                                tx.push(StreamEvent::Error(message));
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.sidecar.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo_complete_config() -> LocalProviderConfig {
        LocalProviderConfig {
            sidecar: SidecarConfig {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"while IFS= read -r line; do
                         id=$(echo "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
                         method=$(echo "$line" | grep -o '"method":"[a-z.]*"' | cut -d: -f2 | tr -d '"')
                         if [ "$method" = "init" ]; then
                           printf '{"jsonrpc":"2.0","id":%s,"result":{"ready":true}}\n' "$id"
                         elif [ "$method" = "complete" ]; then
                           printf '{"jsonrpc":"2.0","id":%s,"result":{"content":"hello from sidecar","cost_usd":0.02}}\n' "$id"
                         else
                           printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
                         fi
                       done"#
                        .to_string(),
                ],
                startup_timeout: Duration::from_secs(5),
                stop_timeout: Duration::from_secs(2),
                notification_channel_capacity: 16,
                ..Default::default()
            },
            model: None,
            native_tool_names: Vec::new(),
        }
    }

    #[tokio::test]
    async fn complete_parses_sidecar_response() {
        let provider = LocalProvider::new(echo_complete_config());
        let result = provider
            .complete(CompletionRequest {
                prompt: "hi".to_string(),
                ..Default::default()
            })
            .await
            .expect("complete");
        assert_eq!(result.text, "hello from sidecar");
        assert_eq!(result.cost_usd, Some(0.02));
        provider.close().await.ok();
    }

    #[test]
    fn parse_tool_call_value_requires_id_and_name() {
        assert!(parse_tool_call_value(&json!({"id": "t1"})).is_none());
        let tc = parse_tool_call_value(&json!({"id": "t1", "name": "search", "input": {"q": "x"}}))
            .expect("parses");
        assert_eq!(tc.id, "t1");
        assert_eq!(tc.name, "search");
    }

    #[tokio::test]
    async fn complete_sends_messages_array_built_from_prompt() {
        let config = SidecarConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"while IFS= read -r line; do
                     id=$(echo "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
                     method=$(echo "$line" | grep -o '"method":"[a-z.]*"' | cut -d: -f2 | tr -d '"')
                     if [ "$method" = "init" ]; then
                       printf '{"jsonrpc":"2.0","id":%s,"result":{"ready":true}}\n' "$id"
                     elif echo "$line" | grep -q '"messages":\[' \
                          && echo "$line" | grep -q '"role":"user"' \
                          && echo "$line" | grep -q '"content":"hi"'; then
                       printf '{"jsonrpc":"2.0","id":%s,"result":{"content":"ok"}}\n' "$id"
                     else
                       printf '{"jsonrpc":"2.0","id":%s,"result":{"content":"missing messages array"}}\n' "$id"
                     fi
                   done"#
                    .to_string(),
            ],
            startup_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            notification_channel_capacity: 16,
            ..Default::default()
        };
        let provider = LocalProvider::new(LocalProviderConfig {
            sidecar: config,
            model: None,
            native_tool_names: Vec::new(),
        });
        let result = provider
            .complete(CompletionRequest {
                prompt: "hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
        provider.close().await.ok();
    }

    #[tokio::test]
    async fn stream_chunk_done_true_terminates_without_a_separate_stream_done() {
        let config = SidecarConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"read -r line
                   id=$(echo "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
                   printf '{"jsonrpc":"2.0","id":%s,"result":{"ready":true}}\n' "$id"
                   read -r line
                   id=$(echo "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
                   sid=$(echo "$line" | grep -o '"stream_id":"[^"]*"' | cut -d: -f2 | tr -d '"')
                   printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
                   printf '{"jsonrpc":"2.0","method":"stream.chunk","params":{"stream_id":"%s","content":"x","done":false}}\n' "$sid"
                   printf '{"jsonrpc":"2.0","method":"stream.chunk","params":{"stream_id":"%s","content":"y","done":true,"usage":{"input_tokens":1,"output_tokens":1}}}\n' "$sid"
                   sleep 5"#
                    .to_string(),
            ],
            startup_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            notification_channel_capacity: 16,
            ..Default::default()
        };
        let provider = LocalProvider::new(LocalProviderConfig {
            sidecar: config,
            model: None,
            native_tool_names: Vec::new(),
        });
        let cancel = Arc::new(Notify::new());
        let mut rx = provider
            .stream(
                CompletionRequest {
                    prompt: "hi".to_string(),
                    ..Default::default()
                },
                cancel,
            )
            .await
            .expect("stream starts");

        let mut saw_delta = false;
        loop {
            match tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("stream should terminate promptly")
            {
                Some(StreamEvent::TextDelta(_)) => saw_delta = true,
                Some(StreamEvent::Done { usage, .. }) => {
                    assert!(saw_delta);
                    assert_eq!(usage.unwrap().input_tokens, 1);
                    break;
                }
                Some(other) => panic!("unexpected event: {other:?}"),
                None => panic!("channel closed before a Done event"),
            }
        }
        provider.close().await.ok();
    }
}
