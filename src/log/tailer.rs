//! Reading and tailing a session's persisted transcript (spec.md §4.4).
//!
//! `tail()` is grounded on `mailbox::watcher::MailboxWatcher::run`: a
//! `notify::RecommendedWatcher` with a polling-interval fallback,
//! forwarding through a std `mpsc` bridge into an async task. Unlike the
//! mailbox watcher (which reacts to whole-file creation), this one reacts
//! to writes on a single growing file and must additionally detect
//! truncation (the CLI may rewrite a transcript from scratch) by checking
//! the file's size before each read and resetting to offset 0 if it
//! shrank.
//!
//! The emit channel is the same bounded, drop-oldest ring buffer used for
//! a session's output channel (`crate::ring_buffer`), bounded at 100 per
//! SPEC_FULL.md §11's resolution of spec.md's "unbounded in some readers,
//! bounded in others" open question.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Notify;
use tracing::warn;

use super::entry::{PersistedEntry, TodoItem};
use crate::error::{Result, SupervisorError};
use crate::protocol::TokenUsage;
use crate::ring_buffer::{lossy_channel, LossyReceiver};

/// Default capacity of a `tail()` emit channel, per SPEC_FULL.md §11.
pub const DEFAULT_TAIL_CHANNEL_CAPACITY: usize = 100;

/// Parse every well-formed line in `path` from the start. Malformed lines
/// are skipped, matching the permissive-parse contract used elsewhere in
/// this crate.
pub async fn read_all(path: &Path) -> Result<Vec<PersistedEntry>> {
    let (entries, _) = read_from(path, 0).await?;
    Ok(entries)
}

/// Read every complete line starting at byte `offset`, returning the
/// parsed entries and the new offset: `offset + sum(len(line) + 1)` over
/// every line consumed, so a caller can resume exactly where this call
/// left off on the next poll.
pub async fn read_from(path: &Path, offset: u64) -> Result<(Vec<PersistedEntry>, u64)> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
        Err(e) => return Err(SupervisorError::from(e)),
    };
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(SupervisorError::from)?;

    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut consumed = 0u64;

    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(SupervisorError::from)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            // Partial line at EOF — a writer is mid-append. Leave it for
            // the next poll rather than consuming or misparsing it.
            break;
        }
        consumed += n as u64;
        let trimmed = line.trim_end_matches('\n');
        match serde_json::from_str::<PersistedEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), error = %e, "unparseable transcript line, discarding"),
        }
    }

    Ok((entries, offset + consumed))
}

/// Stream every entry appended to `path` from here on, using filesystem
/// notifications with a polling fallback. The returned channel drops the
/// oldest queued entry (rather than blocking the watcher) when the
/// consumer falls behind; stops once `cancel` is notified.
pub fn tail(path: PathBuf, cancel: std::sync::Arc<Notify>, capacity: usize) -> LossyReceiver<PersistedEntry> {
    let (tx, rx) = lossy_channel(capacity);
    tokio::spawn(async move {
        if let Err(e) = run_tail(path, cancel, &tx).await {
            warn!(error = %e, "log tailer stopped with error");
        }
        tx.close();
    });
    rx
}

async fn run_tail(
    path: PathBuf,
    cancel: std::sync::Arc<Notify>,
    tx: &crate::ring_buffer::LossySender<PersistedEntry>,
) -> Result<()> {
    let (fs_tx, mut fs_rx) = tokio::sync::mpsc::channel::<notify::Result<Event>>(64);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = fs_tx.blocking_send(res);
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )
    .map_err(|e| SupervisorError::io(e.to_string()))?;

    if let Some(parent) = path.parent() {
        let _ = watcher.watch(parent, RecursiveMode::NonRecursive);
    }

    // Start at the current end of the file — `tail()` only ever delivers
    // entries appended after the call, not the existing transcript.
    let mut offset: u64 = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
    loop {
        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size < offset {
            offset = 0; // truncated — restart from the beginning
        }

        let (entries, new_offset) = read_from(&path, offset).await.unwrap_or((Vec::new(), offset));
        offset = new_offset;
        for entry in entries {
            tx.push(entry);
        }

        tokio::select! {
            _ = cancel.notified() => return Ok(()),
            maybe_event = fs_rx.recv() => {
                if maybe_event.is_none() {
                    return Ok(());
                }
                // Drain any additional already-queued notify events before
                // re-reading, so a burst of writes collapses into one pass.
                while fs_rx.try_recv().is_ok() {}
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
}

/// Single-pass aggregation over a transcript's entries (spec.md §4.4
/// `Summarize`): message counts, per-role counts, token totals, tool-call
/// count, per-model message count, and first/last timestamps.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub entry_count: usize,
    pub role_counts: HashMap<String, usize>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub tool_call_count: usize,
    pub model_counts: HashMap<String, usize>,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}

/// `tool_use`/`tool_result` are content-block types nested inside an
/// entry's `message.content` array, not top-level entry types (only
/// `user` / `assistant` / `queue-operation` ever appear in `type`) — so
/// every per-message field here is read out of `entry.message`, not off
/// `entry.entry_type`.
fn content_blocks(message: &Value) -> &[Value] {
    message
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn summarize(entries: &[PersistedEntry]) -> Summary {
    let mut summary = Summary::default();
    for entry in entries {
        summary.entry_count += 1;
        if summary.first_timestamp.is_none() {
            summary.first_timestamp = Some(entry.timestamp.clone());
        }
        summary.last_timestamp = Some(entry.timestamp.clone());

        let Some(message) = entry.message.as_ref() else {
            continue;
        };
        if let Some(role) = message.get("role").and_then(Value::as_str) {
            *summary.role_counts.entry(role.to_string()).or_insert(0) += 1;
        }
        if let Some(model) = message.get("model").and_then(Value::as_str) {
            *summary.model_counts.entry(model.to_string()).or_insert(0) += 1;
        }
        if let Some(usage) = message
            .get("usage")
            .and_then(|v| serde_json::from_value::<TokenUsage>(v.clone()).ok())
        {
            summary.input_tokens += usage.input_tokens;
            summary.output_tokens += usage.output_tokens;
            summary.cache_creation_tokens += usage.cache_creation_tokens;
            summary.cache_read_tokens += usage.cache_read_tokens;
        }
        summary.tool_call_count += content_blocks(message)
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
            .count();
    }
    summary
}

/// The most recent todo list across `entries` (preferring `new_todos`
/// within each entry, per [`PersistedEntry::todos`]).
pub fn extract_todos(entries: &[PersistedEntry]) -> Option<Vec<TodoItem>> {
    entries.iter().rev().find_map(|e| e.todos().map(|t| t.to_vec()))
}

/// Every entry whose `message.content` carries a `tool_use` or
/// `tool_result` block, in order.
pub fn extract_tool_calls(entries: &[PersistedEntry]) -> Vec<&PersistedEntry> {
    entries
        .iter()
        .filter(|e| {
            e.message.as_ref().is_some_and(|m| {
                content_blocks(m)
                    .iter()
                    .any(|b| matches!(b.get("type").and_then(Value::as_str), Some("tool_use") | Some("tool_result")))
            })
        })
        .collect()
}
