//! Session lifecycle state machine (spec.md §3).

use std::fmt;

/// `Creating -> Active -> Closing -> Closed`, with `Error` as an
/// unrecoverable terminal state and `Terminating` a transitional state
/// entered only while a forced kill is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Creating,
    Active,
    Closing,
    Terminating,
    Closed,
    Error,
}

impl SessionStatus {
    /// `Send` requires exactly this state (spec.md invariant #5).
    pub fn accepts_send(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Creating => "creating",
            SessionStatus::Active => "active",
            SessionStatus::Closing => "closing",
            SessionStatus::Terminating => "terminating",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}
