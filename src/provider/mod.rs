//! C7 — Provider Client (spec.md §4.6).
//!
//! Unifies three implementation shapes behind one surface: long-lived
//! session clients (`claude`), exec-per-call clients (`codex`), and
//! sidecar clients (`local`). Each publishes a static [`Capabilities`]
//! record and implements [`ProviderClient`].

pub mod claude;
pub mod classify;
pub mod codex;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::Result;
use crate::protocol::TokenUsage;
use crate::ring_buffer::LossyReceiver;

pub use classify::{DefaultRetryClassifier, RetryClassifier};

/// A static property of a provider — no concurrency, computed once at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub mcp: bool,
    pub sessions: bool,
    pub images: bool,
    pub native_tool_names: Vec<String>,
    pub context_file_name: Option<String>,
}

/// One tool invocation surfaced to a caller, independent of which
/// provider's wire format it came from.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One turn of a conversation, as the sidecar's `complete`/`stream.start`
/// wire contract expects it (spec.md §4.6 `{messages, ...}`).
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Full conversation history for the sidecar wire contract. Left empty
    /// for the Claude/Codex CLI paths, which only ever send `prompt` as the
    /// next turn; a sidecar provider that receives an empty list falls back
    /// to a single user message built from `prompt`.
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Resume an existing conversation (Claude family) rather than start
    /// a fresh one.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Option<TokenUsage>,
    pub cost_usd: Option<f64>,
}

/// One unit of a streamed completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(ToolCallRecord),
    Done {
        usage: Option<TokenUsage>,
        cost_usd: Option<f64>,
    },
    Error(String),
}

/// The unified request/stream surface in front of either a CLI-exec child
/// or a long-lived sidecar (spec.md §4.6).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Run one full turn to completion and return the aggregated result.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult>;

    /// Run one turn, emitting incremental events as they arrive. `cancel`
    /// lets the caller abort mid-stream; for exec-per-call providers this
    /// kills the child's process group.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: Arc<Notify>,
    ) -> Result<LossyReceiver<StreamEvent>>;

    /// Release any held resources (a live session, a running sidecar).
    async fn close(&self) -> Result<()>;
}
