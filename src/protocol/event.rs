//! C1 — stream-JSON event schema.
//!
//! One `AssistantEvent` is produced per line of an assistant's stdout. The
//! outer shape is a tagged union over `type` (further refined by `subtype`
//! for `system` and `result`); decoding is permissive — a line that does
//! not parse is the caller's problem to discard, not this module's (see
//! `parse_line`, which returns `None` rather than an error so the reader
//! loop in `session::reader` can silently skip it per spec).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::usage::{ModelUsage, TokenUsage};

/// One block of assistant message content.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn as_tool_use(&self) -> Option<ToolUse<'_>> {
        match self {
            ContentBlock::ToolUse { id, name, input } => Some(ToolUse { id, name, input }),
            _ => None,
        }
    }
}

/// Borrowed view of a `tool_use` content block, returned by `tool_calls()`.
#[derive(Debug, Clone, Copy)]
pub struct ToolUse<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub id: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitPayload {
    pub cwd: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "permissionMode")]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, rename = "mcp_servers")]
    pub mcp_servers: Option<Value>,
    #[serde(rename = "claude_code_version")]
    pub cli_version: Option<String>,
    #[serde(rename = "apiKeySource")]
    pub api_key_source: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultPayload {
    pub subtype: String,
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    pub session_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub model_usage: HashMap<String, ModelUsage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookResponsePayload {
    pub hook_name: Option<String>,
    pub event_name: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserEchoPayload {
    pub message: Value,
}

/// The parsed, tagged-union payload. One constructor per `type`/`subtype`
/// pair, per the REDESIGN FLAG in spec.md §9 ("prefer a sealed sum type...
/// derivations become exhaustive pattern matches").
#[derive(Debug, Clone)]
pub enum EventPayload {
    Init(InitPayload),
    Assistant(AssistantMessage),
    Result(ResultPayload),
    HookResponse(HookResponsePayload),
    User(UserEchoPayload),
    /// A recognized top-level `type` whose `subtype`/body this crate does
    /// not model yet. Only the tag fields are populated; derivations
    /// return empty, per the parsing contract.
    Unknown {
        type_tag: Option<String>,
        subtype: Option<String>,
    },
}

/// One parsed line of assistant stdout, plus the original bytes.
#[derive(Debug, Clone)]
pub struct AssistantEvent {
    pub payload: EventPayload,
    raw: String,
}

impl AssistantEvent {
    /// Parse one line of stdout into an `AssistantEvent`.
    ///
    /// Returns `None` when the line is not a JSON object at all, or is a
    /// JSON object this schema cannot make sense of even loosely (missing
    /// `type`) — both cases the reader loop discards silently, per
    /// spec.md §4.1's parsing contract.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(trimmed).ok()?;
        let type_tag = value.get("type").and_then(Value::as_str).map(str::to_string);
        let subtype = value.get("subtype").and_then(Value::as_str).map(str::to_string);

        let payload = match type_tag.as_deref() {
            Some("system") => match subtype.as_deref() {
                Some("init") => serde_json::from_value::<InitPayload>(value.clone())
                    .ok()
                    .map(EventPayload::Init),
                Some("hook_response") => serde_json::from_value::<HookResponsePayload>(value.clone())
                    .ok()
                    .map(EventPayload::HookResponse),
                _ => None,
            },
            Some("assistant") => value
                .get("message")
                .cloned()
                .and_then(|m| serde_json::from_value::<AssistantMessage>(m).ok())
                .map(EventPayload::Assistant),
            Some("result") => serde_json::from_value::<ResultPayload>(value.clone())
                .ok()
                .map(EventPayload::Result),
            Some("user") => Some(EventPayload::User(UserEchoPayload {
                message: value.get("message").cloned().unwrap_or(Value::Null),
            })),
            _ => None,
        }
        .unwrap_or(EventPayload::Unknown { type_tag, subtype });

        Some(Self {
            payload,
            raw: trimmed.to_string(),
        })
    }

    /// The original line this event was parsed from, unmodified — marshals
    /// back to the exact original byte string (testable property #6).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_init(&self) -> bool {
        matches!(self.payload, EventPayload::Init(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.payload, EventPayload::Assistant(_))
    }

    pub fn is_result(&self) -> bool {
        matches!(self.payload, EventPayload::Result(_))
    }

    pub fn is_hook(&self) -> bool {
        matches!(self.payload, EventPayload::HookResponse(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.payload, EventPayload::Result(r) if !r.is_error && !r.subtype.starts_with("error"))
    }

    /// True when `type == result` and either `subtype` begins with the
    /// literal prefix `error`, or the parsed result carries
    /// `is_error == true`.
    pub fn is_error(&self) -> bool {
        matches!(&self.payload, EventPayload::Result(r) if r.is_error || r.subtype.starts_with("error"))
    }

    /// For `assistant`, the concatenated text of all `text` content blocks
    /// in order; for `result`, the result text; otherwise empty.
    pub fn text(&self) -> String {
        match &self.payload {
            EventPayload::Assistant(msg) => msg
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            EventPayload::Result(r) => r.result.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// For `assistant`, the ordered sublist of `tool_use` blocks. Empty
    /// for every other variant.
    pub fn tool_calls(&self) -> Vec<ToolUse<'_>> {
        match &self.payload {
            EventPayload::Assistant(msg) => {
                msg.content.iter().filter_map(ContentBlock::as_tool_use).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Per-message usage for `assistant` events, `None` otherwise.
    pub fn usage(&self) -> Option<&TokenUsage> {
        match &self.payload {
            EventPayload::Assistant(msg) => msg.usage.as_ref(),
            _ => None,
        }
    }

    /// `total_cost_usd` carried by a `result` event, `None` otherwise.
    pub fn result_cost_usd(&self) -> Option<f64> {
        match &self.payload {
            EventPayload::Result(r) => r.total_cost_usd,
            _ => None,
        }
    }
}
