//! Account ledger and cash reservations.
//!
//! `available = balance - curr_margin - frozen_commission - frozen_cash`,
//! where both frozen figures are summed over live [`CashReservation`]s on
//! every read. The formula gates admission only; it may go negative later.

use std::collections::BTreeMap;

use og_core::types::{
    CommissionKind, CommissionRate, Instrument, InstrumentId, MarginRate, OrderInstruction,
    ReservationId,
};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::position::CloseFill;
use crate::reservation::{ReservationStage, ReservedVolume};

/// Cash and commission held for a pending open order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashReservation {
    pub id: ReservationId,
    pub instrument_id: InstrumentId,
    /// Margin per contract.
    pub per_unit_cash: f64,
    /// Open commission per contract.
    pub per_unit_commission: f64,
    pub hold: ReservedVolume,
}

impl CashReservation {
    pub fn remaining(&self) -> u32 {
        self.hold.remaining()
    }

    pub fn stage(&self) -> ReservationStage {
        self.hold.stage
    }

    pub fn frozen_cash(&self) -> f64 {
        self.per_unit_cash * self.remaining() as f64
    }

    pub fn frozen_commission(&self) -> f64 {
        self.per_unit_commission * self.remaining() as f64
    }
}

/// Money booked by one open fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenFill {
    pub volume: u32,
    pub margin: f64,
    pub commission: f64,
}

/// Persisted ledger figures. Reservations are never persisted: a settled
/// ledger has none.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub pre_balance: f64,
    pub pre_margin: f64,
    pub deposit: f64,
    pub withdraw: f64,
    pub balance: f64,
    pub commission: f64,
    pub curr_margin: f64,
    pub close_profit: f64,
    pub position_profit: f64,
}

/// Cash side of one user's account.
#[derive(Debug, Clone, Default)]
pub struct AccountLedger {
    pre_balance: f64,
    pre_margin: f64,
    deposit: f64,
    withdraw: f64,
    balance: f64,
    commission: f64,
    curr_margin: f64,
    close_profit: f64,
    position_profit: f64,
    reservations: BTreeMap<ReservationId, CashReservation>,
    next_reservation: u64,
}

impl AccountLedger {
    /// Fresh ledger with an opening balance.
    pub fn with_balance(balance: f64) -> Self {
        Self {
            pre_balance: balance,
            balance,
            next_reservation: 1,
            ..Default::default()
        }
    }

    pub fn from_snapshot(s: &LedgerSnapshot) -> Self {
        Self {
            pre_balance: s.pre_balance,
            pre_margin: s.pre_margin,
            deposit: s.deposit,
            withdraw: s.withdraw,
            balance: s.balance,
            commission: s.commission,
            curr_margin: s.curr_margin,
            close_profit: s.close_profit,
            position_profit: s.position_profit,
            reservations: BTreeMap::new(),
            next_reservation: 1,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            pre_balance: self.pre_balance,
            pre_margin: self.pre_margin,
            deposit: self.deposit,
            withdraw: self.withdraw,
            balance: self.balance,
            commission: self.commission,
            curr_margin: self.curr_margin,
            close_profit: self.close_profit,
            position_profit: self.position_profit,
        }
    }

    // ── Read side ──────────────────────────────────────────────────────

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn pre_balance(&self) -> f64 {
        self.pre_balance
    }

    pub fn curr_margin(&self) -> f64 {
        self.curr_margin
    }

    pub fn commission(&self) -> f64 {
        self.commission
    }

    pub fn close_profit(&self) -> f64 {
        self.close_profit
    }

    pub fn frozen_cash(&self) -> f64 {
        self.reservations.values().map(|r| r.frozen_cash()).sum()
    }

    pub fn frozen_commission(&self) -> f64 {
        self.reservations.values().map(|r| r.frozen_commission()).sum()
    }

    pub fn available(&self) -> f64 {
        self.balance - self.curr_margin - self.frozen_commission() - self.frozen_cash()
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&CashReservation> {
        self.reservations.get(&id)
    }

    /// Reservations that still hold volume.
    pub fn live_reservations(&self) -> impl Iterator<Item = &CashReservation> {
        self.reservations.values().filter(|r| r.hold.is_live())
    }

    // ── Reservations ───────────────────────────────────────────────────

    /// Reserve margin and open commission for `order`.
    ///
    /// Per-unit figures use the order's limit price. Nothing is created when
    /// `available` cannot cover the total.
    pub fn reserve_open(
        &mut self,
        order: &OrderInstruction,
        instrument: &Instrument,
        margin_rate: &MarginRate,
        commission_rate: &CommissionRate,
    ) -> Result<ReservationId, LedgerError> {
        let mult = instrument.volume_multiple;
        let per_unit_cash = margin_rate.per_unit(order.side.opens(), order.price, mult);
        let per_unit_commission = commission_rate.per_unit(CommissionKind::Open, order.price, mult);
        let required = (per_unit_cash + per_unit_commission) * order.volume as f64;
        let available = self.available();
        if required > available {
            return Err(LedgerError::InsufficientFunds {
                required,
                available,
            });
        }

        let id = ReservationId(self.next_reservation.max(1));
        self.next_reservation = id.0 + 1;
        self.reservations.insert(
            id,
            CashReservation {
                id,
                instrument_id: order.instrument_id.clone(),
                per_unit_cash,
                per_unit_commission,
                hold: ReservedVolume::new(order.volume),
            },
        );
        Ok(id)
    }

    /// Book an open fill: margin moves from frozen to current, commission is
    /// charged against the balance.
    pub fn consume(&mut self, id: ReservationId, volume: u32) -> Result<OpenFill, LedgerError> {
        let r = self
            .reservations
            .get_mut(&id)
            .ok_or(LedgerError::ReservationNotFound(id))?;
        r.hold.consume(id, volume)?;
        let margin = r.per_unit_cash * volume as f64;
        let commission = r.per_unit_commission * volume as f64;
        self.curr_margin += margin;
        self.commission += commission;
        self.balance -= commission;
        Ok(OpenFill {
            volume,
            margin,
            commission,
        })
    }

    /// Release whatever the reservation still holds. Returns `false` if it
    /// was already canceled.
    pub fn cancel(&mut self, id: ReservationId) -> Result<bool, LedgerError> {
        let r = self
            .reservations
            .get_mut(&id)
            .ok_or(LedgerError::ReservationNotFound(id))?;
        Ok(r.hold.cancel())
    }

    /// Book a close fill computed by the position book.
    pub fn apply_close(&mut self, fill: &CloseFill) {
        self.close_profit += fill.close_profit_by_date;
        self.commission += fill.commission;
        self.curr_margin -= fill.margin_released;
        if self.curr_margin < 0.0 && self.curr_margin > -1e-6 {
            self.curr_margin = 0.0;
        }
        self.balance += fill.close_profit_by_date - fill.commission;
    }

    // ── Cash movements ─────────────────────────────────────────────────

    pub fn deposit(&mut self, amount: f64) -> Result<(), LedgerError> {
        if amount.is_nan() || amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.deposit += amount;
        self.balance += amount;
        Ok(())
    }

    /// Withdraw, gated by `available`.
    pub fn withdraw(&mut self, amount: f64) -> Result<(), LedgerError> {
        if amount.is_nan() || amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let available = self.available();
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        self.withdraw += amount;
        self.balance -= amount;
        Ok(())
    }

    // ── End of day ─────────────────────────────────────────────────────

    /// Cancel every live reservation, recompute the balance with the day's
    /// position profit and roll the `pre_*` fields forward.
    ///
    /// Returns the number of reservations that were still live.
    pub fn settle(&mut self, position_profit: f64, margin: f64) -> usize {
        let canceled = self
            .reservations
            .values_mut()
            .filter(|r| r.hold.is_live())
            .map(|r| r.hold.cancel())
            .filter(|c| *c)
            .count();
        self.reservations.clear();

        self.position_profit = position_profit;
        self.balance = self.pre_balance + self.deposit - self.withdraw + self.close_profit
            + self.position_profit
            - self.commission;
        self.curr_margin = margin;

        self.pre_balance = self.balance;
        self.pre_margin = self.curr_margin;
        self.deposit = 0.0;
        self.withdraw = 0.0;
        self.commission = 0.0;
        self.close_profit = 0.0;
        self.position_profit = 0.0;
        canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use og_core::types::{ExchangeId, Offset, Side, UserId};
    use proptest::prelude::*;

    fn instrument() -> Instrument {
        Instrument {
            instrument_id: InstrumentId::new("rb2405"),
            exchange_id: ExchangeId::new("SHFE"),
            volume_multiple: 10,
            price_tick: 1.0,
            min_limit_order_volume: 1,
            max_limit_order_volume: 500,
        }
    }

    fn margin() -> MarginRate {
        MarginRate {
            long_ratio_by_money: 0.1,
            short_ratio_by_money: 0.1,
            ..Default::default()
        }
    }

    fn commission() -> CommissionRate {
        CommissionRate {
            open_ratio_by_volume: 2.0,
            ..Default::default()
        }
    }

    fn open(price: f64, volume: u32) -> OrderInstruction {
        OrderInstruction {
            user_id: UserId::new("u1"),
            instrument_id: InstrumentId::new("rb2405"),
            side: Side::Buy,
            offset: Offset::Open,
            price,
            volume,
        }
    }

    #[test]
    fn test_reserve_open_freezes_cash_and_commission() {
        let mut ledger = AccountLedger::with_balance(10_000.0);
        let id = ledger
            .reserve_open(&open(100.0, 3), &instrument(), &margin(), &commission())
            .unwrap();
        // 3 * 100 * 10 * 0.1 = 300 margin, 3 * 2 = 6 commission
        assert!((ledger.frozen_cash() - 300.0).abs() < 1e-9);
        assert!((ledger.frozen_commission() - 6.0).abs() < 1e-9);
        assert!((ledger.available() - 9_694.0).abs() < 1e-9);
        assert_eq!(ledger.reservation(id).unwrap().remaining(), 3);
        // visible totals untouched
        assert_eq!(ledger.balance(), 10_000.0);
        assert_eq!(ledger.curr_margin(), 0.0);
    }

    #[test]
    fn test_reserve_open_insufficient_creates_nothing() {
        let mut ledger = AccountLedger::with_balance(250.0);
        let err = ledger
            .reserve_open(&open(100.0, 3), &instrument(), &margin(), &commission())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.live_reservations().count(), 0);
        assert_eq!(ledger.available(), 250.0);
    }

    #[test]
    fn test_undersized_account_rejects_nth_order() {
        // each order needs 102; 350 covers three
        let mut ledger = AccountLedger::with_balance(350.0);
        for _ in 0..3 {
            ledger
                .reserve_open(&open(100.0, 1), &instrument(), &margin(), &commission())
                .unwrap();
        }
        assert!(ledger
            .reserve_open(&open(100.0, 1), &instrument(), &margin(), &commission())
            .is_err());
        assert_eq!(ledger.live_reservations().count(), 3);
    }

    #[test]
    fn test_consume_moves_margin_and_charges_commission() {
        let mut ledger = AccountLedger::with_balance(10_000.0);
        let id = ledger
            .reserve_open(&open(100.0, 3), &instrument(), &margin(), &commission())
            .unwrap();
        let fill = ledger.consume(id, 2).unwrap();
        assert!((fill.margin - 200.0).abs() < 1e-9);
        assert!((ledger.curr_margin() - 200.0).abs() < 1e-9);
        assert!((ledger.balance() - 9_996.0).abs() < 1e-9);
        assert!((ledger.frozen_cash() - 100.0).abs() < 1e-9);
        // available unchanged by a fill at the reserved price, minus nothing
        assert!((ledger.available() - 9_694.0).abs() < 1e-9);
    }

    #[test]
    fn test_consume_bounds_fatal() {
        let mut ledger = AccountLedger::with_balance(1_000_000.0);
        let id = ledger
            .reserve_open(&open(100.0, 10), &instrument(), &margin(), &commission())
            .unwrap();
        ledger.consume(id, 10).unwrap();
        let err = ledger.consume(id, 1).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_reservation_fatal() {
        let mut ledger = AccountLedger::with_balance(1.0);
        assert!(ledger.consume(ReservationId(99), 1).unwrap_err().is_fatal());
        assert!(ledger.cancel(ReservationId(99)).unwrap_err().is_fatal());
    }

    #[test]
    fn test_cancel_twice_releases_once() {
        let mut ledger = AccountLedger::with_balance(10_000.0);
        let id = ledger
            .reserve_open(&open(100.0, 3), &instrument(), &margin(), &commission())
            .unwrap();
        assert!(ledger.cancel(id).unwrap());
        assert_eq!(ledger.reservation(id).unwrap().remaining(), 0);
        assert_eq!(ledger.available(), 10_000.0);
        assert!(!ledger.cancel(id).unwrap());
        assert_eq!(ledger.reservation(id).unwrap().remaining(), 0);
        assert_eq!(ledger.available(), 10_000.0);
    }

    #[test]
    fn test_deposit_withdraw() {
        let mut ledger = AccountLedger::with_balance(1_000.0);
        ledger.deposit(500.0).unwrap();
        assert_eq!(ledger.balance(), 1_500.0);
        assert!(ledger.withdraw(2_000.0).is_err());
        ledger.withdraw(300.0).unwrap();
        assert_eq!(ledger.balance(), 1_200.0);
        assert!(matches!(
            ledger.deposit(-1.0),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_settle_rolls_forward() {
        let mut ledger = AccountLedger::with_balance(10_000.0);
        let id = ledger
            .reserve_open(&open(100.0, 3), &instrument(), &margin(), &commission())
            .unwrap();
        ledger.consume(id, 1).unwrap();
        let canceled = ledger.settle(50.0, 105.0);
        assert_eq!(canceled, 1);
        // 10000 - 2 commission + 50 position profit
        assert!((ledger.balance() - 10_048.0).abs() < 1e-9);
        assert!((ledger.pre_balance() - 10_048.0).abs() < 1e-9);
        assert_eq!(ledger.curr_margin(), 105.0);
        assert_eq!(ledger.commission(), 0.0);
        assert_eq!(ledger.live_reservations().count(), 0);
        assert_eq!(ledger.frozen_cash(), 0.0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut ledger = AccountLedger::with_balance(10_000.0);
        ledger.deposit(10.0).unwrap();
        let snap = ledger.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        let restored = AccountLedger::from_snapshot(&back);
        assert_eq!(restored.balance(), 10_010.0);
        assert_eq!(restored.available(), 10_010.0);
    }

    proptest! {
        /// Every granted reservation fits inside what was available when it
        /// was granted; every refusal really did not fit.
        #[test]
        fn prop_no_double_reservation(
            balance in 100.0f64..50_000.0,
            orders in prop::collection::vec((50.0f64..500.0, 1u32..20), 1..40),
        ) {
            let mut ledger = AccountLedger::with_balance(balance);
            let inst = instrument();
            for (price, volume) in orders {
                let before = ledger.available();
                let order = open(price, volume);
                let required = (price * 10.0 * 0.1 + 2.0) * volume as f64;
                match ledger.reserve_open(&order, &inst, &margin(), &commission()) {
                    Ok(_) => {
                        prop_assert!(required <= before + 1e-9);
                        prop_assert!(ledger.available() >= -1e-6);
                    }
                    Err(_) => prop_assert!(required > before),
                }
                let frozen = ledger.frozen_cash() + ledger.frozen_commission();
                prop_assert!(frozen <= balance + 1e-6);
            }
        }
    }
}
