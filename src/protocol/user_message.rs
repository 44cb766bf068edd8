//! Stream-JSON on stdin: the message a caller sends to a live session.
//!
//! The assistant stdin schema has two closely-related shapes in the wild
//! (spec.md §9 Open Questions): one wraps content under `message.role` +
//! `message.content`, the other puts `content` directly at the top level.
//! Which one a given CLI version expects is version-dependent, so both are
//! exposed rather than unified; [`SessionConfig::user_message_shape`]
//! (see `crate::session::SessionConfig`) picks per provider/version.

use serde::Serialize;

/// Which wire shape to use when serializing a user message for stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserMessageShape {
    /// `{"type":"user","message":{"role":"user","content":"..."}}`
    #[default]
    Wrapped,
    /// `{"type":"user","content":"..."}`
    Bare,
}

#[derive(Debug, Clone, Serialize)]
struct WrappedInner<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage<'a> {
    User {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<WrappedInner<'a>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<&'a str>,
    },
}

/// Serialize `content` as a single newline-terminated stdin frame using the
/// given shape. The trailing `\n` is part of the contract — the writer
/// must emit exactly one per `Send` (testable property #2).
pub fn encode_user_message(content: &str, shape: UserMessageShape) -> serde_json::Result<String> {
    let msg = match shape {
        UserMessageShape::Wrapped => WireMessage::User {
            message: Some(WrappedInner {
                role: "user",
                content,
            }),
            content: None,
        },
        UserMessageShape::Bare => WireMessage::User {
            message: None,
            content: Some(content),
        },
    };
    let mut line = serde_json::to_string(&msg)?;
    line.push('\n');
    Ok(line)
}
