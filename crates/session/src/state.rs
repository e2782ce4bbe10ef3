//! Session lifecycle states.

use std::fmt;

/// Where the gateway session is in its lifecycle.
///
/// `Stopped → Starting → ConfirmingSettlement → Started → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Stopped,
    /// Connecting, authenticating and logging in.
    Starting,
    ConfirmingSettlement,
    /// Logged in with settlement confirmed; reference data is being queried.
    Started,
    /// Logout sent.
    Stopping,
}

impl SessionState {
    /// State after the link drops.
    ///
    /// A drop while starting or stopping falls back to `Stopped`. A drop
    /// while `Started` keeps the state so the reconnect can resume.
    pub fn on_disconnect(self) -> Self {
        match self {
            Self::Starting | Self::ConfirmingSettlement | Self::Stopping => Self::Stopped,
            other => other,
        }
    }

    /// Whether a login is in flight or done.
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Stopped | Self::Stopping)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::ConfirmingSettlement => "confirming_settlement",
            Self::Started => "started",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
