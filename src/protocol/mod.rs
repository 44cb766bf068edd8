//! C1 — the stream-JSON event schema: parsing assistant stdout into
//! [`event::AssistantEvent`], plus the stdin wire shapes a caller sends.

pub mod event;
pub mod usage;
pub mod user_message;

pub use event::{AssistantEvent, ContentBlock, EventPayload, ToolUse};
pub use usage::{ModelUsage, TokenUsage};
pub use user_message::{encode_user_message, UserMessageShape};
