//! The `User` aggregate: one account ledger, one position book and a status
//! latch.

use chrono::NaiveDate;
use og_core::types::UserId;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::account::{AccountLedger, LedgerSnapshot};
use crate::error::LedgerError;
use crate::position::{PositionBook, PositionLot, SettlementInputs};

/// Trading status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Active,
    /// An inconsistency was detected; every mutation is refused until an
    /// operator resets the latch.
    Panicked,
    /// Settled for the day; waits for renewal.
    Settled,
}

/// Persisted shape of a user, written after settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    /// Trading day the snapshot was settled for.
    pub trading_day: NaiveDate,
    pub ledger: LedgerSnapshot,
    pub lots: Vec<PositionLot>,
}

/// Outcome of settling one user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementReport {
    pub balance: f64,
    pub margin: f64,
    pub position_profit: f64,
    pub canceled_reservations: usize,
    pub remaining_lots: usize,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub trading_day: NaiveDate,
    status: UserStatus,
    panic_reason: Option<String>,
    pub ledger: AccountLedger,
    pub positions: PositionBook,
}

impl User {
    /// New user with an opening balance and no positions.
    pub fn new(id: UserId, trading_day: NaiveDate, balance: f64) -> Self {
        Self {
            id,
            trading_day,
            status: UserStatus::Active,
            panic_reason: None,
            ledger: AccountLedger::with_balance(balance),
            positions: PositionBook::new(),
        }
    }

    /// Load a settled snapshot as an active user for `trading_day`.
    pub fn from_snapshot(snapshot: UserSnapshot, trading_day: NaiveDate) -> Self {
        Self {
            id: snapshot.user_id,
            trading_day,
            status: UserStatus::Active,
            panic_reason: None,
            ledger: AccountLedger::from_snapshot(&snapshot.ledger),
            positions: PositionBook::from_lots(snapshot.lots),
        }
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            user_id: self.id.clone(),
            trading_day: self.trading_day,
            ledger: self.ledger.snapshot(),
            lots: self.positions.lots(None),
        }
    }

    pub fn status(&self) -> UserStatus {
        self.status
    }

    pub fn panic_reason(&self) -> Option<&str> {
        self.panic_reason.as_deref()
    }

    pub fn ensure_active(&self) -> Result<(), LedgerError> {
        match self.status {
            UserStatus::Active => Ok(()),
            status => Err(LedgerError::UserNotActive {
                user_id: self.id.clone(),
                status,
            }),
        }
    }

    /// Latch the user to `Panicked`. The first reason wins.
    pub fn panic(&mut self, reason: impl Into<String>) {
        if self.status == UserStatus::Panicked {
            return;
        }
        let reason = reason.into();
        error!(user_id = %self.id, reason = %reason, "user halted on ledger inconsistency");
        self.status = UserStatus::Panicked;
        self.panic_reason = Some(reason);
    }

    /// Operator override: clear the panic latch. Returns `false` if the user
    /// was not panicked.
    pub fn reset_panic(&mut self) -> bool {
        if self.status != UserStatus::Panicked {
            return false;
        }
        info!(user_id = %self.id, reason = ?self.panic_reason, "panic latch reset");
        self.status = UserStatus::Active;
        self.panic_reason = None;
        true
    }

    /// Settle the current trading day. Only an active user can be settled.
    pub fn settle(&mut self, inputs: &SettlementInputs) -> Result<SettlementReport, LedgerError> {
        self.ensure_active()?;
        let book = self.positions.settle(inputs, self.trading_day)?;
        let canceled = self.ledger.settle(book.position_profit, book.margin);
        self.status = UserStatus::Settled;
        let report = SettlementReport {
            balance: self.ledger.balance(),
            margin: book.margin,
            position_profit: book.position_profit,
            canceled_reservations: book.canceled_reservations + canceled,
            remaining_lots: self.positions.lots(None).len(),
        };
        info!(
            user_id = %self.id,
            trading_day = %self.trading_day,
            balance = report.balance,
            margin = report.margin,
            canceled = report.canceled_reservations,
            "user settled"
        );
        Ok(report)
    }

    /// Move a settled user into the next trading day.
    pub fn renew(&mut self, trading_day: NaiveDate) -> Result<(), LedgerError> {
        if self.status != UserStatus::Settled {
            return Err(LedgerError::UserNotActive {
                user_id: self.id.clone(),
                status: self.status,
            });
        }
        self.trading_day = trading_day;
        self.status = UserStatus::Active;
        info!(user_id = %self.id, trading_day = %trading_day, "user renewed");
        Ok(())
    }
}
