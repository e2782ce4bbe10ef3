use og_core::types::{InstrumentId, LotId, ReservationId, UserId};
use og_core::ErrorCode;

use crate::user::UserStatus;

/// Ledger and position-book errors.
///
/// Admission errors leave state untouched. Fatal errors mean the ledger can
/// no longer be trusted; the owning user must be halted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds: required {required:.2}, available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("close volume {requested} exceeds available position {available}")]
    OverClose { requested: u32, available: u32 },

    #[error("user {user_id} is not active ({status:?})")]
    UserNotActive { user_id: UserId, status: UserStatus },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(f64),

    #[error("missing settlement {what} for {instrument_id}")]
    MissingSettlementInput {
        instrument_id: InstrumentId,
        what: &'static str,
    },

    /// Fatal: a callback referenced a reservation this ledger never issued.
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Fatal: a fill exceeded what was reserved.
    #[error("reservation {id} over-consumed: remaining {remaining}, fill {requested}")]
    OverConsume {
        id: ReservationId,
        remaining: u32,
        requested: u32,
    },

    /// Fatal: a close reservation points at a lot that no longer exists.
    #[error("position lot {0} not found")]
    LotNotFound(LotId),
}

impl LedgerError {
    /// Returns `true` if the error must latch the owning user to `Panicked`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReservationNotFound(_) | Self::OverConsume { .. } | Self::LotNotFound(_)
        )
    }

    /// Client-visible error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::OverClose { .. } => ErrorCode::OverClosePosition,
            Self::UserNotActive { .. } => ErrorCode::UserNotActive,
            Self::InvalidAmount(_) => ErrorCode::BadField,
            Self::MissingSettlementInput { .. } => ErrorCode::BadRequest,
            Self::ReservationNotFound(_) | Self::OverConsume { .. } | Self::LotNotFound(_) => {
                ErrorCode::Inconsistent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(LedgerError::ReservationNotFound(ReservationId(1)).is_fatal());
        assert!(LedgerError::LotNotFound(LotId(1)).is_fatal());
        assert!(!LedgerError::OverClose {
            requested: 6,
            available: 5
        }
        .is_fatal());
        assert_eq!(
            LedgerError::InsufficientFunds {
                required: 1.0,
                available: 0.0
            }
            .code(),
            ErrorCode::InsufficientFunds
        );
    }
}
