//! A general JSON-RPC 2.0 stdio transport (spec.md §4.5 C5).
//!
//! Grounded on `mcp::client::McpClient` and `agents::codex_appserver::
//! CodexAppServer`: same write-mutex-protected stdin, same
//! line-per-message stdout framing. Generalized past both teacher
//! sources in one way they don't need: those assume one request is
//! always answered before the next is sent, with no interleaved
//! notifications. The local-model sidecar (spec.md §4.6 C6) can push
//! `stream.chunk` notifications between a call and its response, so this
//! transport runs a dedicated read task that demultiplexes by `id`,
//! routing responses to whichever `call` is waiting on that id and
//! everything else to a notification channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::message::{IncomingMessage, Notification, Request, Response};
use crate::error::{Result, SupervisorError};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// A connected JSON-RPC 2.0 stdio peer.
pub struct Protocol {
    stdin: Mutex<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Protocol {
    /// Take ownership of `stdin`/`stdout` and start the background reader
    /// task. Notifications arriving with no matching pending call (pushes
    /// from the peer, e.g. `stream.chunk`) are forwarded on
    /// `notifications`, a bounded drop-newest channel — a slow consumer
    /// loses the newest pushes rather than stalling the reader, the same
    /// policy as the log tailer's emit channel (SPEC_FULL.md §11).
    pub fn connect<R>(
        stdin: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
        stdout: R,
        notifications: mpsc::Sender<Notification>,
    ) -> Self
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match IncomingMessage::parse(&line) {
                            Ok(IncomingMessage::Response(resp)) => {
                                if let Some(id) = resp.id.as_u64() {
                                    if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                            }
                            Ok(IncomingMessage::Notification(n)) => {
                                let _ = notifications.try_send(n);
                            }
                            Err(_) => continue,
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            // Peer closed the pipe: fail every call still waiting on a
            // response rather than hanging them forever.
            for (_, tx) in reader_pending.lock().await.drain() {
                drop(tx);
            }
        });

        Self {
            stdin: Mutex::new(Box::new(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            reader_task,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and await its response. Errors classify as
    /// [`crate::error::ErrorKind::Protocol`], retryable iff the peer
    /// returned JSON-RPC code -32003 or the pipe was dropped before a
    /// response arrived.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = Request::new(Value::from(id), method, params);
        if let Err(e) = self.write_line(&req).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(resp) => match resp.error {
                Some(err) => Err(SupervisorError::protocol(format!(
                    "{method}: {} (code {})",
                    err.message, err.code
                ))
                .retryable(err.is_retryable())),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
            Err(_) => Err(SupervisorError::transient(format!(
                "connection closed while awaiting response to {method}"
            ))),
        }
    }

    /// Send a one-way notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = Notification::new(method, params);
        self.write_line(&notif).await
    }

    async fn write_line(&self, msg: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(msg)
            .map_err(|e| SupervisorError::protocol(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(SupervisorError::from)?;
        stdin.flush().await.map_err(SupervisorError::from)?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.reader_task.abort();
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_correlates_response_by_id() {
        let (client_write, server_read) = tokio::io::duplex(4096);
        let (server_write, client_read) = tokio::io::duplex(4096);
        let (notif_tx, _notif_rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut out = server_write;
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["id"].clone();
                let resp = serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"echo":req["method"]}});
                let mut s = serde_json::to_string(&resp).unwrap();
                s.push('\n');
                out.write_all(s.as_bytes()).await.unwrap();
                out.flush().await.unwrap();
            }
        });

        let protocol = Protocol::connect(client_write, client_read, notif_tx);
        let result = protocol.call("ping", None).await.unwrap();
        assert_eq!(result["echo"], Value::String("ping".to_string()));
    }

    #[tokio::test]
    async fn notification_pushed_before_response_is_not_mistaken_for_it() {
        let (client_write, server_read) = tokio::io::duplex(4096);
        let (server_write, client_read) = tokio::io::duplex(4096);
        let (notif_tx, mut notif_rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut out = server_write;
            if let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let push = serde_json::json!({"jsonrpc":"2.0","method":"stream.chunk","params":{"text":"partial"}});
                let mut s = serde_json::to_string(&push).unwrap();
                s.push('\n');
                out.write_all(s.as_bytes()).await.unwrap();
                out.flush().await.unwrap();

                let id = req["id"].clone();
                let resp = serde_json::json!({"jsonrpc":"2.0","id":id,"result":"done"});
                let mut s = serde_json::to_string(&resp).unwrap();
                s.push('\n');
                out.write_all(s.as_bytes()).await.unwrap();
                out.flush().await.unwrap();
            }
        });

        let protocol = Protocol::connect(client_write, client_read, notif_tx);
        let result = protocol.call("stream.start", None).await.unwrap();
        assert_eq!(result, Value::String("done".to_string()));

        let pushed = notif_rx.recv().await.unwrap();
        assert_eq!(pushed.method, "stream.chunk");
    }

    #[tokio::test]
    async fn error_response_with_connection_error_code_is_retryable() {
        let (client_write, server_read) = tokio::io::duplex(4096);
        let (server_write, client_read) = tokio::io::duplex(4096);
        let (notif_tx, _notif_rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut out = server_write;
            if let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["id"].clone();
                let resp = serde_json::json!({
                    "jsonrpc":"2.0","id":id,
                    "error":{"code":-32003,"message":"connection dropped"}
                });
                let mut s = serde_json::to_string(&resp).unwrap();
                s.push('\n');
                out.write_all(s.as_bytes()).await.unwrap();
                out.flush().await.unwrap();
            }
        });

        let protocol = Protocol::connect(client_write, client_read, notif_tx);
        let err = protocol.call("init", None).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
