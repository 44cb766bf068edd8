//! Per-session raw-event JSONL mirror (SPEC_FULL.md §10.2).
//!
//! Distinct from the assistant's own persisted transcript under
//! `~/.claude/projects/...` (see [`crate::log`]): this is a supervisor-side
//! append-only copy of every line this crate read from the child's stdout,
//! useful for debugging a run after the fact regardless of what the
//! assistant itself chose to persist. Grounded on the teacher's
//! `session::events::EventLog`, same lazy-open-then-cache file handle.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl EventLog {
    pub fn new(dir: &Path, session_id: &str) -> Self {
        Self {
            path: dir.join(format!("{session_id}.jsonl")),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one raw line (without its own trailing newline). Errors are
    /// logged by the caller and otherwise swallowed — the mirror is
    /// best-effort and must never be allowed to fail a turn.
    pub async fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(f);
        }
        let file = guard.as_mut().expect("just opened");
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}
