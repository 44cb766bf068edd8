//! C6 — the local-model sidecar process (spec.md §4.6).
//!
//! A long-lived JSON-RPC peer, lazily started on first use and restarted
//! on crash. Grounded on `agents::codex_appserver::CodexAppServer` for the
//! "one long-lived subprocess speaking JSON-RPC over stdio" shape, and on
//! the teacher's `ClaudeCodeRunner` stderr-drain task for surfacing child
//! diagnostics without blocking the RPC read loop.

use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{Result, SupervisorError};
use crate::rpc::{Notification, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SidecarState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    /// Process exited on its own outside of a requested `stop()`.
    Crashed = 4,
}

impl SidecarState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SidecarState::Starting,
            2 => SidecarState::Running,
            3 => SidecarState::Stopping,
            4 => SidecarState::Crashed,
            _ => SidecarState::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub program: String,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
    /// Capacity of the bounded notification channel fed by pushes that
    /// arrive outside of a pending `call` (e.g. `stream.chunk`).
    pub notification_channel_capacity: usize,
    /// `init` params (spec.md §4.6 `init(backend, model, host,
    /// mcp_servers)`).
    pub backend: String,
    pub model: Option<String>,
    pub host: Option<String>,
    pub mcp_servers: Option<Value>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: "model-sidecar".to_string(),
            args: Vec::new(),
            startup_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            notification_channel_capacity: 64,
            backend: "local".to_string(),
            model: None,
            host: None,
            mcp_servers: None,
        }
    }
}

/// Owns a lazily-started, restart-on-crash sidecar process and its
/// JSON-RPC transport.
pub struct Sidecar {
    config: SidecarConfig,
    state: AtomicU8,
    inner: Mutex<Option<Inner>>,
    /// Serializes the check-then-spawn sequence in `start()` so two
    /// concurrent callers (e.g. two racing `call()`s against a `Stopped`
    /// sidecar) cannot both observe "not running" and each spawn their own
    /// child, leaking one.
    start_lock: Mutex<()>,
    stopped_notify: Notify,
    notifications: Mutex<mpsc::Receiver<Notification>>,
    notifications_tx: mpsc::Sender<Notification>,
}

struct Inner {
    protocol: Arc<Protocol>,
    child: Child,
}

impl Sidecar {
    pub fn new(config: SidecarConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.notification_channel_capacity);
        Arc::new(Self {
            config,
            state: AtomicU8::new(SidecarState::Stopped as u8),
            inner: Mutex::new(None),
            start_lock: Mutex::new(()),
            stopped_notify: Notify::new(),
            notifications: Mutex::new(rx),
            notifications_tx: tx,
        })
    }

    pub fn state(&self) -> SidecarState {
        SidecarState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: SidecarState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Start the process if not already running, perform the synchronous
    /// `init` handshake, and reject the sidecar (leaving it `Stopped`) if
    /// the peer answers with `ready: false` or the startup deadline
    /// elapses first.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        if matches!(self.state(), SidecarState::Running) {
            return Ok(());
        }
        self.set_state(SidecarState::Starting);

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.set_state(SidecarState::Stopped);
                SupervisorError::spawn(format!("failed to spawn sidecar {}", self.config.program))
                    .with_source(e.into())
            })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take();

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "sidecar_stderr", "{line}");
                }
            });
        }

        let protocol = Arc::new(Protocol::connect(stdin, stdout, self.notifications_tx.clone()));

        let init_params = json!({
            "backend": self.config.backend,
            "model": self.config.model,
            "host": self.config.host,
            "mcp_servers": self.config.mcp_servers,
        });
        let init = timeout(self.config.startup_timeout, protocol.call("init", Some(init_params))).await;
        let init = match init {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                self.set_state(SidecarState::Stopped);
                let _ = child.start_kill();
                return Err(e);
            }
            Err(_) => {
                self.set_state(SidecarState::Stopped);
                let _ = child.start_kill();
                return Err(SupervisorError::transient("sidecar init timed out"));
            }
        };

        let ready = init.get("ready").and_then(Value::as_bool).unwrap_or(false);
        if !ready {
            self.set_state(SidecarState::Stopped);
            let _ = child.start_kill();
            return Err(SupervisorError::protocol("sidecar init reported ready=false"));
        }

        let pid = child.id();
        *self.inner.lock().await = Some(Inner { protocol, child });
        self.set_state(SidecarState::Running);
        info!(pid, "sidecar started");

        self.spawn_wait_watcher();
        Ok(())
    }

    fn spawn_wait_watcher(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let exit = {
                let mut guard = this.inner.lock().await;
                match guard.as_mut() {
                    Some(inner) => inner.child.wait().await.ok(),
                    None => return,
                }
            };
            if this.state() != SidecarState::Stopping {
                warn!(exit = ?exit, "sidecar process exited unexpectedly");
                this.set_state(SidecarState::Crashed);
            } else {
                this.set_state(SidecarState::Stopped);
            }
            *this.inner.lock().await = None;
            this.stopped_notify.notify_waiters();
        });
    }

    /// Restart regardless of current state: stop if running/crashed, then
    /// start fresh.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let _ = self.stop().await;
        self.start().await
    }

    /// Issue an RPC call, auto-starting the sidecar first if it is not
    /// already running.
    pub async fn call(self: &Arc<Self>, method: &str, params: Option<Value>) -> Result<Value> {
        if !matches!(self.state(), SidecarState::Running) {
            self.start().await?;
        }
        let protocol = {
            let guard = self.inner.lock().await;
            guard
                .as_ref()
                .map(|i| i.protocol.clone())
                .ok_or_else(|| SupervisorError::not_active("sidecar is not running"))?
        };
        protocol.call(method, params).await
    }

    /// Receive the next out-of-band push notification (e.g.
    /// `stream.chunk`), or `None` if the channel was dropped.
    pub async fn recv_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.recv().await
    }

    /// Graceful stop: `shutdown` RPC, close stdin, wait, then force-kill.
    /// Errors are silenced if the sidecar was already stopped.
    pub async fn stop(&self) -> Result<()> {
        let inner = self.inner.lock().await.take();
        let Some(inner) = inner else {
            return Ok(());
        };
        self.set_state(SidecarState::Stopping);

        let _ = timeout(Duration::from_secs(2), inner.protocol.call("shutdown", None)).await;
        inner.protocol.shutdown();

        let mut child = inner.child;
        let _ = child.start_kill();
        let _ = timeout(self.config.stop_timeout, child.wait()).await;
        let _ = child.kill().await;

        self.set_state(SidecarState::Stopped);
        Ok(())
    }
}
