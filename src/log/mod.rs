//! C4 — reading and tailing a session's persisted transcript.

pub mod entry;
pub mod path;
pub mod tailer;

pub use entry::{PersistedEntry, TodoItem, TodoStatus, ToolResultMeta};
pub use path::{session_log_dir, session_log_path};
pub use tailer::{
    extract_todos, extract_tool_calls, read_all, read_from, summarize, tail, Summary,
    DEFAULT_TAIL_CHANNEL_CAPACITY,
};
