//! The stdout reader loop (spec.md §4.2): scans the child's stdout for
//! newline-delimited JSON, discards lines that fail to parse, and forwards
//! every successfully-parsed event into the session's lossy output channel.
//!
//! Grounded on the teacher's `ClaudeCodeRunner::event_loop` (`claude.rs`):
//! same `BufReader::lines()` scan, same "log the raw line, then try to
//! parse it, warn and continue on failure" shape. The teacher's reader
//! updates a DB-backed session row per event; ours updates the session's
//! in-memory atomics instead (spec.md has no durable persistence).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tracing::{debug, warn};

use crate::protocol::AssistantEvent;
use crate::ring_buffer::LossySender;
use crate::session::event_log::EventLog;
use crate::session::SessionShared;

/// Starting and maximum buffer sizes for a single line, per spec.md §4.2:
/// the scanner starts with a 64KiB buffer and grows it up to 10MiB before
/// treating an over-long line as a fatal I/O error for the session.
pub const LINE_BUFFER_START: usize = 64 * 1024;
pub const LINE_BUFFER_MAX: usize = 10 * 1024 * 1024;

/// Drive the reader loop to completion. Returns once stdout reaches EOF or
/// a line exceeds [`LINE_BUFFER_MAX`]. Does not close `out` — the caller
/// (the session's own supervising task) owns that, per the output
/// channel's single-owner-closes invariant (spec.md invariant #2).
pub async fn run(
    session_id: &str,
    stdout: ChildStdout,
    shared: Arc<SessionShared>,
    out: LossySender<AssistantEvent>,
    mirror: Option<Arc<EventLog>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::with_capacity(LINE_BUFFER_START, stdout);
    let mut raw = Vec::with_capacity(LINE_BUFFER_START);

    loop {
        raw.clear();
        let n = read_line_bounded(&mut reader, &mut raw).await?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        debug!(session = %session_id, event = %line, "assistant stdout line");

        if let Some(mirror) = &mirror {
            let _ = mirror.append_line(line).await;
        }

        let Some(event) = AssistantEvent::parse_line(line) else {
            warn!(session = %session_id, line = %line, "unparseable assistant event, discarding");
            continue;
        };

        shared.last_activity.store(now_unix(), Ordering::Relaxed);
        if event.is_init() {
            shared.seen_init.store(true, Ordering::Release);
        }
        if let Some(cost) = event.result_cost_usd() {
            shared.add_cost(cost);
        }
        if event.is_result() {
            shared.turn_count.fetch_add(1, Ordering::Relaxed);
        }

        out.push(event);
    }

    Ok(())
}

/// Read one line from `reader` into `buf`, growing up to
/// [`LINE_BUFFER_MAX`] bytes. Returns the number of bytes read (0 at EOF).
/// An oversized line is reported as [`std::io::ErrorKind::InvalidData`].
async fn read_line_bounded(
    reader: &mut BufReader<ChildStdout>,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let n = reader.read_until(b'\n', buf).await?;
    if buf.len() > LINE_BUFFER_MAX {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("assistant stdout line exceeded {LINE_BUFFER_MAX} bytes"),
        ));
    }
    Ok(n)
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
