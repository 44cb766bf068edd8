//! Subprocess supervision and streaming-protocol layer for embedding
//! coding-agent CLIs (Claude Code, Codex, local model sidecars) as
//! long-lived or exec-per-call child processes.
//!
//! The pieces, in the order a caller typically touches them:
//!
//! - [`protocol`] — parsing a coding agent's line-delimited JSON event
//!   stream (C1).
//! - [`session`] — spawning, driving, and tearing down one child process
//!   (C3), and tracking a whole fleet of them (C4).
//! - [`log`] — reading and tailing the assistant's own persisted
//!   transcript on disk (C2).
//! - [`rpc`] / [`sidecar`] — the JSON-RPC 2.0 transport (C5) and the
//!   long-lived local-model sidecar process built on it (C6).
//! - [`provider`] — the unified request/stream surface (C7) in front of
//!   all three provider shapes, plus an explicit [`registry`] for wiring
//!   provider names to factories.

pub mod error;
pub mod log;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod ring_buffer;
pub mod rpc;
pub mod session;
pub mod sidecar;

pub use error::{ErrorKind, Result, SupervisorError};

/// Install a compact, env-filtered `tracing` subscriber as the process's
/// global default. Meant for embedders and this crate's own integration
/// tests that want readable output without repeating the boilerplate.
///
/// `filter` follows `tracing_subscriber::EnvFilter` syntax (e.g.
/// `"agent_supervisor=debug,info"`); pass `None` to fall back to the
/// `RUST_LOG` environment variable, defaulting to `info` if that is unset.
pub fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(f) => f.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .compact()
        .try_init();
}
