//! C3 — a single supervised assistant subprocess (spec.md §4.2).
//!
//! A [`Session`] owns exactly one child process for its whole lifetime
//! (long-lived for the Claude family; the Codex provider layer instead
//! creates one short-lived `Session` per turn — see `crate::provider`).
//! Grounded on the teacher's `ClaudeCodeRunner` (`claude.rs`) for the
//! spawn/event-loop/pause/resume/stop shape, generalized from a
//! Claude-specific, DB-backed, broadcaster-coupled runner into a
//! provider-agnostic, in-memory one.

pub mod args;
pub mod event_log;
pub mod manager;
pub mod reader;
pub mod spawn;
pub mod status;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Notify, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

pub use manager::{ManagerConfig, SessionManager};
pub use status::SessionStatus;

use crate::error::{Result, SupervisorError};
use crate::protocol::{encode_user_message, AssistantEvent, UserMessageShape};
use crate::ring_buffer::{lossy_channel, LossyReceiver, LossySender};
use event_log::EventLog;

/// How long each rung of the shutdown ladder waits before escalating
/// (spec.md §4.2 `Close()`): stdin-close, then SIGTERM-to-group, then
/// SIGKILL-to-group.
#[derive(Debug, Clone, Copy)]
pub struct CloseTimeouts {
    pub stdin_close: Duration,
    pub term: Duration,
    pub kill: Duration,
}

impl Default for CloseTimeouts {
    fn default() -> Self {
        Self {
            stdin_close: Duration::from_secs(5),
            term: Duration::from_secs(2),
            kill: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub user_message_shape: UserMessageShape,
    /// Capacity of the lossy output channel (spec.md §4.2 `Output()`).
    pub output_channel_capacity: usize,
    /// When set, every raw stdout line is mirrored here as JSONL
    /// (SPEC_FULL.md §10.2).
    pub event_log_dir: Option<PathBuf>,
    pub close_timeouts: CloseTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            user_message_shape: UserMessageShape::default(),
            output_channel_capacity: 256,
            event_log_dir: None,
            close_timeouts: CloseTimeouts::default(),
        }
    }
}

/// Counters and timestamps shared between a `Session` and its reader task.
/// Split out from `Session` itself so the reader loop (which runs as a
/// detached `tokio::spawn`) can hold just what it needs without a back
/// reference to the full session.
pub struct SessionShared {
    pub created_at: u64,
    pub last_activity: AtomicU64,
    pub turn_count: AtomicU64,
    pub seen_init: AtomicBool,
    total_cost_bits: AtomicU64,
}

impl SessionShared {
    fn new() -> Self {
        let now = now_unix();
        Self {
            created_at: now,
            last_activity: AtomicU64::new(now),
            turn_count: AtomicU64::new(0),
            seen_init: AtomicBool::new(false),
            total_cost_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::new()
    }

    pub fn add_cost(&self, delta: f64) {
        let mut current = self.total_cost_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.total_cost_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        f64::from_bits(self.total_cost_bits.load(Ordering::Relaxed))
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Point-in-time snapshot returned by [`Session::info`].
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: u64,
    pub last_activity: u64,
    pub turn_count: u64,
    pub total_cost_usd: f64,
}

pub struct Session {
    id: String,
    config: SessionConfig,
    status: RwLock<SessionStatus>,
    shared: Arc<SessionShared>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    output_rx: tokio::sync::Mutex<Option<LossyReceiver<AssistantEvent>>>,
    output_tx: LossySender<AssistantEvent>,
    child_pid: AtomicU32,
    child: tokio::sync::Mutex<Option<Child>>,
    done: Notify,
    done_flag: AtomicBool,
    close_error: tokio::sync::Mutex<Option<SupervisorError>>,
    event_log: Option<Arc<EventLog>>,
    /// Set by `pause()`, cleared by `resume()`. `close()` consults this so
    /// its SIGKILL step can send SIGCONT first — a stopped process does not
    /// act on SIGKILL until it is running again (SPEC_FULL.md §10.1).
    paused: AtomicBool,
}

impl Session {
    /// Spawn a child process per `config` and start its reader/wait tasks.
    /// The returned session is `Creating` until the first event (typically
    /// `system`/`init`) is observed; see [`Session::wait_for_init`].
    pub async fn spawn(id: impl Into<String>, config: SessionConfig) -> Result<Arc<Self>> {
        let id = id.into();
        let env = spawn::merge_env(&config.env);
        let mut child =
            spawn::spawn_grouped(&config.program, &config.args, config.cwd.as_deref(), &env)?;

        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn("child stdout was not piped"))?;
        let stderr = child.stderr.take();

        let (output_tx, output_rx) = lossy_channel(config.output_channel_capacity);
        let shared = Arc::new(SessionShared::new());

        let event_log = config
            .event_log_dir
            .as_ref()
            .map(|dir| Arc::new(EventLog::new(dir, &id)));

        let session = Arc::new(Self {
            id: id.clone(),
            config,
            status: RwLock::new(SessionStatus::Creating),
            shared: shared.clone(),
            stdin: tokio::sync::Mutex::new(stdin),
            output_rx: tokio::sync::Mutex::new(Some(output_rx)),
            output_tx: output_tx.clone(),
            child_pid: AtomicU32::new(pid),
            child: tokio::sync::Mutex::new(Some(child)),
            done: Notify::new(),
            done_flag: AtomicBool::new(false),
            close_error: tokio::sync::Mutex::new(None),
            event_log,
            paused: AtomicBool::new(false),
        });

        // Drain stderr into the tracing log without blocking the reader —
        // grounded on the teacher's dedicated stderr-drain task in
        // `claude.rs`/`codex.rs`.
        if let Some(stderr) = stderr {
            let sid = session.id.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(session = %sid, stderr = %line, "assistant stderr");
                }
            });
        }

        {
            let session = session.clone();
            let mirror = session.event_log.clone();
            tokio::spawn(async move {
                *session.status.write().await = SessionStatus::Active;
                let result = reader::run(&session.id, stdout, shared, output_tx, mirror).await;
                if let Err(e) = result {
                    warn!(session = %session.id, error = %e, "reader loop ended with error");
                    *session.close_error.lock().await = Some(SupervisorError::io(e.to_string()));
                }

                let exit = session.child.lock().await.as_mut().map(|c| c.wait());
                if let Some(wait) = exit {
                    let _ = wait.await;
                }

                session.output_tx_close();
                let mut status = session.status.write().await;
                *status = if session.close_error.lock().await.is_some() {
                    SessionStatus::Error
                } else {
                    SessionStatus::Closed
                };
                drop(status);
                session.done_flag.store(true, Ordering::Release);
                session.done.notify_waiters();
                info!(session = %session.id, "session closed");
            });
        }

        Ok(session)
    }

    fn output_tx_close(&self) {
        self.output_tx.close();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            status: *self.status.read().await,
            created_at: self.shared.created_at,
            last_activity: self.shared.last_activity.load(Ordering::Relaxed),
            turn_count: self.shared.turn_count.load(Ordering::Relaxed),
            total_cost_usd: self.shared.total_cost_usd(),
        }
    }

    pub fn jsonl_path(&self) -> Option<PathBuf> {
        self.event_log.as_ref().map(|l| l.path().to_path_buf())
    }

    /// Write one user-message frame to stdin. Requires the session to be
    /// `Active` (spec.md invariant #5).
    pub async fn send(&self, content: &str) -> Result<()> {
        if !self.status().await.accepts_send() {
            return Err(SupervisorError::not_active(format!(
                "session {} is not active",
                self.id
            )));
        }
        let line = encode_user_message(content, self.config.user_message_shape)
            .map_err(|e| SupervisorError::protocol(e.to_string()))?;

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| SupervisorError::not_active("session stdin already closed"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(SupervisorError::from)?;
        stdin.flush().await.map_err(SupervisorError::from)?;
        Ok(())
    }

    /// Receive the next parsed event, or `None` once the session is closed
    /// and the channel has been fully drained.
    pub async fn recv(&self) -> Option<AssistantEvent> {
        let mut guard = self.output_rx.lock().await;
        guard.as_mut()?.recv().await
    }

    /// Poll for the session's first event (typically `system`/`init`),
    /// returning an error if `wait` elapses first.
    pub async fn wait_for_init(&self, wait: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.shared.seen_init.load(Ordering::Acquire) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::transient(format!(
                    "session {} did not initialize within {wait:?}",
                    self.id
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Block until the session's supervising task has fully torn down.
    pub async fn wait(&self) {
        if self.done_flag.load(Ordering::Acquire) {
            return;
        }
        self.done.notified().await;
    }

    #[cfg(unix)]
    pub async fn pause(&self) -> Result<()> {
        let pid = self.child_pid.load(Ordering::Relaxed);
        if pid != 0 {
            // SAFETY: signals our own child by pid, no memory touched.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGSTOP);
            }
        }
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::Release);
        Err(SupervisorError::configuration("pause is unix-only"))
    }

    #[cfg(unix)]
    pub async fn resume(&self) -> Result<()> {
        let pid = self.child_pid.load(Ordering::Relaxed);
        if pid != 0 {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGCONT);
            }
        }
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::Release);
        Err(SupervisorError::configuration("resume is unix-only"))
    }

    /// Three-tier shutdown ladder (spec.md §4.2 `Close()`):
    /// close stdin and wait, then SIGTERM the process group and wait,
    /// then SIGKILL the process group and wait once more.
    pub async fn close(&self) -> Result<()> {
        {
            let mut status = self.status.write().await;
            if status.is_terminal() {
                drop(status);
                return self.close_result().await;
            }
            *status = SessionStatus::Closing;
        }

        // Drop stdin to signal EOF to the child's own reader.
        self.stdin.lock().await.take();
        if timeout(self.config.close_timeouts.stdin_close, self.wait())
            .await
            .is_ok()
        {
            return self.close_result().await;
        }

        *self.status.write().await = SessionStatus::Terminating;
        let pid = self.child_pid.load(Ordering::Relaxed);
        let pid = if pid == 0 { None } else { Some(pid) };

        #[cfg(unix)]
        {
            let _ = spawn::kill_group(pid, libc::SIGTERM);
        }
        if timeout(self.config.close_timeouts.term, self.wait())
            .await
            .is_ok()
        {
            return self.close_result().await;
        }

        #[cfg(unix)]
        {
            // A stopped process ignores SIGKILL until it is running again —
            // resume it first if `pause()` left it suspended (SPEC_FULL.md
            // §10.1; the teacher has this exact ordering fix independently
            // in both its Claude and Codex runners).
            if self.paused.load(Ordering::Acquire) {
                let _ = spawn::kill_group(pid, libc::SIGCONT);
            }
            let _ = spawn::kill_group(pid, libc::SIGKILL);
        }
        let _ = timeout(self.config.close_timeouts.kill, self.wait()).await;

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }

        self.close_result().await
    }

    async fn close_result(&self) -> Result<()> {
        match self.close_error.lock().await.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config(script: &str) -> SessionConfig {
        SessionConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn spawns_and_receives_init_then_result() {
        let script = r#"printf '{"type":"system","subtype":"init","session_id":"s1"}\n{"type":"result","subtype":"success","is_error":false,"result":"done","total_cost_usd":0.5}\n'"#;
        let session = Session::spawn("t1", sh_config(script)).await.unwrap();

        session
            .wait_for_init(Duration::from_secs(2))
            .await
            .expect("init observed");

        let first = session.recv().await.unwrap();
        assert!(first.is_init());
        let second = session.recv().await.unwrap();
        assert!(second.is_success());

        session.wait().await;
        assert_eq!(session.info().await.total_cost_usd, 0.5);
    }

    #[tokio::test]
    async fn send_rejected_after_close() {
        let session = Session::spawn("t2", sh_config("sleep 5")).await.unwrap();
        session.close().await.ok();
        let err = session.send("hi").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotActive);
    }

    #[tokio::test]
    async fn close_on_already_exited_child_is_idempotent() {
        let session = Session::spawn("t3", sh_config("true")).await.unwrap();
        session.wait().await;
        session.close().await.unwrap();
        session.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_resumes_a_paused_session_before_killing_it() {
        let session = Session::spawn(
            "t4",
            SessionConfig {
                close_timeouts: CloseTimeouts {
                    stdin_close: Duration::from_millis(50),
                    term: Duration::from_millis(50),
                    kill: Duration::from_secs(2),
                },
                ..sh_config("trap '' TERM; sleep 30")
            },
        )
        .await
        .unwrap();
        session.pause().await.expect("pause");

        // A paused, stopped process ignores SIGTERM; if `close` failed to
        // SIGCONT before SIGKILL the process would also ignore the KILL
        // step and this call would hang until the outer kill timeout.
        session.close().await.unwrap();
        session.wait().await;
    }
}
