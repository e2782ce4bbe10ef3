//! Error codes and execution results visible to clients.
//!
//! Every instruction yields an [`ExecutionResult`], including successful ones
//! (code [`ErrorCode::None`]), so that a poller always has a definitive
//! outcome to read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome classification of a client instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No error.
    #[default]
    None,
    /// Available cash cannot cover margin plus commission.
    InsufficientFunds,
    /// Requested close volume exceeds available opposite positions.
    OverClosePosition,
    /// Instrument unknown to the reference data.
    InstrumentNotFound,
    /// A field is out of range (volume, price).
    BadField,
    /// The instruction cannot be interpreted (unknown target, missing
    /// exchange identity).
    BadRequest,
    /// None of the target sub-orders can be canceled in their current state.
    InsuitableOrderStatus,
    /// A sub-order reference was submitted twice.
    DuplicateOrderRef,
    /// Dispatch queue is full; safe to retry immediately.
    NeedRetry,
    /// The gateway front is not connected and logged in.
    FrontNotActive,
    /// User is panicked or settled.
    UserNotActive,
    /// Margin or commission rates are not yet known.
    RatesNotReady,
    /// Outside the instrument's trading hours.
    NotTradable,
    /// The gateway or exchange rejected an already-sent sub-order.
    GatewayRejected,
    /// Ledger inconsistency; the user has been halted.
    Inconsistent,
}

impl ErrorCode {
    /// Returns `true` for [`ErrorCode::None`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::None)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error code plus human-readable message for one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub code: ErrorCode,
    pub message: String,
}

impl ExecutionResult {
    /// Successful result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Failed result with a code and message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if the code is [`ErrorCode::None`].
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}
