//! Instrument reference data: contract definition, margin and commission
//! rates, market limits and trading-hour windows.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::ids::{ExchangeId, InstrumentId};
use super::order::PositionSide;

/// Contract definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Exchange the instrument trades on.
    pub exchange_id: ExchangeId,
    /// Contract multiplier (money per price point per contract).
    pub volume_multiple: u32,
    /// Minimum price movement.
    pub price_tick: f64,
    /// Smallest accepted limit-order volume.
    pub min_limit_order_volume: u32,
    /// Largest accepted limit-order volume.
    pub max_limit_order_volume: u32,
}

/// Margin rates. A positive money ratio takes precedence over the flat
/// per-contract amount.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarginRate {
    pub long_ratio_by_money: f64,
    pub long_ratio_by_volume: f64,
    pub short_ratio_by_money: f64,
    pub short_ratio_by_volume: f64,
}

impl MarginRate {
    /// Margin for one contract of `side` at `price`.
    pub fn per_unit(&self, side: PositionSide, price: f64, volume_multiple: u32) -> f64 {
        let (by_money, by_volume) = match side {
            PositionSide::Long => (self.long_ratio_by_money, self.long_ratio_by_volume),
            PositionSide::Short => (self.short_ratio_by_money, self.short_ratio_by_volume),
        };
        if by_money > 0.0 {
            price * volume_multiple as f64 * by_money
        } else {
            by_volume
        }
    }
}

/// Which commission schedule applies to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionKind {
    Open,
    CloseToday,
    CloseYesterday,
}

/// Commission rates, same precedence rule as [`MarginRate`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CommissionRate {
    pub open_ratio_by_money: f64,
    pub open_ratio_by_volume: f64,
    pub close_ratio_by_money: f64,
    pub close_ratio_by_volume: f64,
    pub close_today_ratio_by_money: f64,
    pub close_today_ratio_by_volume: f64,
}

impl CommissionRate {
    /// Commission for one contract of the given kind at `price`.
    pub fn per_unit(&self, kind: CommissionKind, price: f64, volume_multiple: u32) -> f64 {
        let (by_money, by_volume) = match kind {
            CommissionKind::Open => (self.open_ratio_by_money, self.open_ratio_by_volume),
            CommissionKind::CloseToday => (
                self.close_today_ratio_by_money,
                self.close_today_ratio_by_volume,
            ),
            CommissionKind::CloseYesterday => {
                (self.close_ratio_by_money, self.close_ratio_by_volume)
            }
        };
        if by_money > 0.0 {
            price * volume_multiple as f64 * by_money
        } else {
            by_volume
        }
    }
}

/// Live market limits and settlement prices for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument_id: InstrumentId,
    pub upper_limit_price: f64,
    pub lower_limit_price: f64,
    pub pre_settlement_price: f64,
    /// Official settlement price; `None` until the exchange publishes it.
    pub settlement_price: Option<f64>,
}

impl MarketSnapshot {
    /// Returns `true` if `price` lies within the daily limits (inclusive).
    pub fn within_limits(&self, price: f64) -> bool {
        price >= self.lower_limit_price && price <= self.upper_limit_price
    }
}

/// One continuous trading window in exchange-local time. A window whose end
/// is earlier than its start crosses midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TradingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Returns `true` if the window wraps past midnight.
    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Returns `true` if `t` falls inside the window (start inclusive, end
    /// inclusive).
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.crosses_midnight() {
            t >= self.start || t <= self.end
        } else {
            t >= self.start && t <= self.end
        }
    }

    /// Returns `true` if `t` falls in the after-midnight tail of a wrapping
    /// window.
    pub fn in_overnight_tail(&self, t: NaiveTime) -> bool {
        self.crosses_midnight() && t <= self.end
    }
}

/// All trading windows of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradingHours {
    pub windows: Vec<TradingWindow>,
}

impl TradingHours {
    pub fn new(windows: Vec<TradingWindow>) -> Self {
        Self { windows }
    }

    /// Returns `true` if any window contains `t`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.windows.iter().any(|w| w.contains(t))
    }

    /// Returns `true` if `t` is inside the after-midnight tail of a window.
    pub fn in_overnight_tail(&self, t: NaiveTime) -> bool {
        self.windows.iter().any(|w| w.in_overnight_tail(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_margin_prefers_money_ratio() {
        let rate = MarginRate {
            long_ratio_by_money: 0.1,
            long_ratio_by_volume: 999.0,
            short_ratio_by_money: 0.0,
            short_ratio_by_volume: 500.0,
        };
        let long = rate.per_unit(PositionSide::Long, 100.0, 10);
        assert!((long - 100.0).abs() < 1e-9);
        let short = rate.per_unit(PositionSide::Short, 100.0, 10);
        assert!((short - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_commission_kinds() {
        let rate = CommissionRate {
            open_ratio_by_money: 0.0001,
            open_ratio_by_volume: 0.0,
            close_ratio_by_money: 0.0,
            close_ratio_by_volume: 3.0,
            close_today_ratio_by_money: 0.0,
            close_today_ratio_by_volume: 6.0,
        };
        let open = rate.per_unit(CommissionKind::Open, 100.0, 10);
        assert!((open - 0.1).abs() < 1e-9);
        assert_eq!(rate.per_unit(CommissionKind::CloseYesterday, 100.0, 10), 3.0);
        assert_eq!(rate.per_unit(CommissionKind::CloseToday, 100.0, 10), 6.0);
    }

    #[test]
    fn test_snapshot_limits_inclusive() {
        let snap = MarketSnapshot {
            instrument_id: InstrumentId::new("rb2405"),
            upper_limit_price: 110.0,
            lower_limit_price: 90.0,
            pre_settlement_price: 100.0,
            settlement_price: None,
        };
        assert!(snap.within_limits(90.0));
        assert!(snap.within_limits(110.0));
        assert!(!snap.within_limits(110.5));
        assert!(!snap.within_limits(89.0));
    }

    #[test]
    fn test_day_window() {
        let w = TradingWindow::new(hm(9, 0), hm(11, 30));
        assert!(!w.crosses_midnight());
        assert!(w.contains(hm(10, 0)));
        assert!(!w.contains(hm(12, 0)));
    }

    #[test]
    fn test_night_window_crossing_midnight() {
        let hours = TradingHours::new(vec![
            TradingWindow::new(hm(9, 0), hm(15, 0)),
            TradingWindow::new(hm(21, 0), hm(2, 30)),
        ]);
        assert!(hours.contains(hm(23, 0)));
        assert!(hours.contains(hm(1, 0)));
        assert!(!hours.contains(hm(3, 0)));
        assert!(hours.in_overnight_tail(hm(1, 0)));
        assert!(!hours.in_overnight_tail(hm(10, 0)));
    }
}
