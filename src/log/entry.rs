//! Shapes persisted in a session's transcript JSONL file (spec.md §4.4).
//!
//! This is the assistant's own on-disk transcript, distinct from the
//! supervisor-side raw mirror in [`crate::session::event_log`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    #[serde(rename = "activeForm")]
    pub active_form: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultMeta {
    #[serde(default)]
    pub old_todos: Option<Vec<TodoItem>>,
    #[serde(default)]
    pub new_todos: Option<Vec<TodoItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub timestamp: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub uuid: String,
    #[serde(rename = "parentUuid", default)]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(flatten, default)]
    pub tool_result: Option<ToolResultMeta>,
}

impl PersistedEntry {
    /// Todos this entry carries, preferring `new_todos` over `old_todos`
    /// when both are present.
    pub fn todos(&self) -> Option<&[TodoItem]> {
        let meta = self.tool_result.as_ref()?;
        meta.new_todos
            .as_deref()
            .or(meta.old_todos.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_entry() {
        let line = r#"{"type":"assistant","timestamp":"2026-01-01T00:00:00Z","sessionId":"s1","uuid":"u1"}"#;
        let entry: PersistedEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.entry_type, "assistant");
        assert!(entry.parent_uuid.is_none());
    }

    #[test]
    fn prefers_new_todos_over_old_todos() {
        let line = r#"{
            "type":"tool_result","timestamp":"t","sessionId":"s1","uuid":"u1",
            "old_todos":[{"content":"a","status":"pending","activeForm":"Doing a"}],
            "new_todos":[{"content":"b","status":"completed","activeForm":"Doing b"}]
        }"#;
        let entry: PersistedEntry = serde_json::from_str(line).unwrap();
        let todos = entry.todos().unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].content, "b");
    }

    #[test]
    fn falls_back_to_old_todos_when_new_todos_absent() {
        let line = r#"{
            "type":"tool_result","timestamp":"t","sessionId":"s1","uuid":"u1",
            "old_todos":[{"content":"a","status":"pending","activeForm":"Doing a"}]
        }"#;
        let entry: PersistedEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.todos().unwrap()[0].content, "a");
    }
}
