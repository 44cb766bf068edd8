//! Error taxonomy for the supervisor.
//!
//! Internal plumbing uses `anyhow::Result` the way the teacher daemon does
//! (`Context`-annotated subprocess I/O, liberally `.context("...")`-ed). The
//! small set of public entry points return [`SupervisorError`] so a caller
//! can match on [`SupervisorError::kind`] / [`SupervisorError::retryable`]
//! without downcasting an `anyhow::Error`.

use std::fmt;

/// Coarse error kind, independent of the message text. Mirrors the
/// taxonomy in the specification's error-handling design: Configuration,
/// Spawn, Not-active, IO, Protocol, Upstream, Cancellation, Transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid option at construction time (bad sandbox mode, bad
    /// approval mode, non-positive timeout, ...). Never retryable.
    Configuration,
    /// Could not start the child process or create its pipes.
    Spawn,
    /// The operation requires an Active session but it is in another
    /// state, or the manager is closed / at capacity.
    NotActive,
    /// Write to stdin failed, the stdout scanner overflowed or errored.
    /// Terminal for the session.
    Io,
    /// Malformed JSON-RPC response, a JSON-RPC error object, or a sidecar
    /// that replied `ready=false` to `init`.
    Protocol,
    /// The assistant itself reported a failed turn (`result.is_error`).
    Upstream,
    /// The caller's cancellation signal fired.
    Cancellation,
    /// Classified-retryable condition (rate limit / timeout / overload)
    /// detected in captured stderr, or JSON-RPC code -32003.
    Transient,
}

/// A typed error returned from the crate's public entry points.
#[derive(Debug)]
pub struct SupervisorError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    source: Option<anyhow::Error>,
}

impl SupervisorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind == ErrorKind::Transient;
        Self {
            kind,
            message: message.into(),
            retryable,
            source: None,
        }
    }

    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Mark an otherwise non-Transient error as caller-retryable. Used by
    /// JSON-RPC code -32003 (connection-error), which classifies as
    /// retryable even though its `kind` is `Protocol`.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn spawn(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Spawn, message)
    }

    pub fn not_active(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotActive, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancellation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref())
    }
}

impl Clone for SupervisorError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            retryable: self.retryable,
            // anyhow::Error isn't Clone; the source chain is dropped on
            // clone rather than re-stringified, matching how the teacher
            // treats `anyhow::Error` as non-cloneable context.
            source: None,
        }
    }
}

impl From<std::io::Error> for SupervisorError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string()).with_source(e.into())
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
