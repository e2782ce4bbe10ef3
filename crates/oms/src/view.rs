//! Read-only views returned by the registry.

use chrono::NaiveDate;
use og_core::types::{OrderRef, ReservationId, UserId};
use og_ledger::{ReservationStage, UserStatus};
use serde::Serialize;

/// Account figures of one user at the time of the read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerView {
    pub user_id: UserId,
    pub trading_day: NaiveDate,
    pub status: UserStatus,
    pub pre_balance: f64,
    pub balance: f64,
    pub available: f64,
    pub frozen_cash: f64,
    pub frozen_commission: f64,
    pub curr_margin: f64,
    pub commission: f64,
    pub close_profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReservationKind {
    Cash,
    Position { close_today: bool },
}

/// One reservation held by a request's sub-order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationView {
    pub order_ref: OrderRef,
    pub reservation_id: ReservationId,
    pub kind: ReservationKind,
    pub volume: u32,
    pub traded: u32,
    pub remaining: u32,
    pub stage: ReservationStage,
}
