//! # og-ledger
//!
//! Per-user money and position bookkeeping.
//!
//! - [`AccountLedger`]: balance, margin, commission and the live set of
//!   [`CashReservation`]s held by pending opens.
//! - [`PositionBook`]: one [`PositionLot`] per opening fill, close-lot
//!   selection and the [`PositionReservation`]s held by pending closes.
//! - [`User`]: one ledger plus one book behind a tri-state status.
//!
//! Frozen totals are always derived from the live reservation set; nothing
//! keeps a running frozen counter.
//!
//! Nothing here locks. Callers serialise access per user.

pub mod account;
pub mod error;
pub mod position;
pub mod reservation;
pub mod user;

pub use account::{AccountLedger, CashReservation, LedgerSnapshot, OpenFill};
pub use error::LedgerError;
pub use position::{
    BookSettlement, CloseAllocation, CloseFill, CloseTemplate, PositionBook, PositionLot, PositionReservation,
    SettlementInput, SettlementInputs,
};
pub use reservation::{ReservationStage, ReservedVolume};
pub use user::{SettlementReport, User, UserSnapshot, UserStatus};
