use og_execution::{GatewayError, GatewayFault, RequestSeq};

use crate::state::SessionState;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("session is {0}, expected stopped")]
    AlreadyRunning(SessionState),

    #[error("session is {0}, expected started")]
    NotStarted(SessionState),

    #[error("gateway send failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("{request} ({seq}) timed out")]
    Timeout {
        request: &'static str,
        seq: RequestSeq,
    },

    #[error("gateway fault {}: {}", .0.code, .0.message)]
    Fault(GatewayFault),

    #[error("session shut down before {0} completed")]
    Abandoned(RequestSeq),
}
