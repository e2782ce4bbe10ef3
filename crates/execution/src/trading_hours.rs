//! Trading-hour gate.
//!
//! Windows are expressed in exchange-local time. The local clock is mapped to
//! each exchange's clock with an offset learned at login (local minus
//! exchange), so a drifting exchange clock does not open or close the gate
//! early.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use dashmap::DashMap;
use og_core::types::{ExchangeId, TradingHours};

#[derive(Default)]
pub struct TradingHourGate {
    offsets: DashMap<ExchangeId, Duration>,
}

impl TradingHourGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn offsets from the exchange clocks reported at login, taken at
    /// local time `local_now`.
    pub fn apply_login_times(
        &self,
        local_now: NaiveDateTime,
        exchange_times: &[(ExchangeId, NaiveTime)],
    ) {
        for (exchange_id, exchange_time) in exchange_times {
            let offset = time_of_day_offset(local_now.time(), *exchange_time);
            tracing::debug!(
                exchange_id = %exchange_id,
                offset_secs = offset.num_seconds(),
                "exchange clock offset"
            );
            self.offsets.insert(exchange_id.clone(), offset);
        }
    }

    pub fn offset(&self, exchange_id: &ExchangeId) -> Duration {
        self.offsets
            .get(exchange_id)
            .map(|o| *o)
            .unwrap_or_else(Duration::zero)
    }

    /// Exchange clock corresponding to `local_now`.
    pub fn exchange_time(
        &self,
        exchange_id: &ExchangeId,
        local_now: NaiveDateTime,
    ) -> NaiveDateTime {
        local_now - self.offset(exchange_id)
    }

    /// Unknown hours are tradable. Sunday never is. Saturday only inside the
    /// after-midnight tail of a Friday night window.
    pub fn is_tradable(
        &self,
        exchange_id: &ExchangeId,
        hours: Option<&TradingHours>,
        local_now: NaiveDateTime,
    ) -> bool {
        let Some(hours) = hours else {
            return true;
        };
        let now = self.exchange_time(exchange_id, local_now);
        match now.weekday() {
            Weekday::Sun => false,
            Weekday::Sat => hours.in_overnight_tail(now.time()),
            _ => hours.contains(now.time()),
        }
    }
}

/// `local - exchange` folded into (-12h, 12h], so clocks either side of
/// midnight give a small offset.
fn time_of_day_offset(local: NaiveTime, exchange: NaiveTime) -> Duration {
    let day = Duration::hours(24);
    let half = Duration::hours(12);
    let mut diff = local.signed_duration_since(exchange);
    if diff > half {
        diff = diff - day;
    } else if diff <= -half {
        diff = diff + day;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use og_core::types::TradingWindow;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 2024-03-15 is a Friday.
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_time(hm(h, m))
    }

    fn futures_hours() -> TradingHours {
        TradingHours::new(vec![
            TradingWindow::new(hm(9, 0), hm(11, 30)),
            TradingWindow::new(hm(13, 30), hm(15, 0)),
            TradingWindow::new(hm(21, 0), hm(1, 0)),
        ])
    }

    #[test]
    fn test_unknown_hours_tradable() {
        let gate = TradingHourGate::new();
        assert!(gate.is_tradable(&ExchangeId::new("SHFE"), None, at(17, 3, 0)));
    }

    #[test]
    fn test_weekday_windows() {
        let gate = TradingHourGate::new();
        let shfe = ExchangeId::new("SHFE");
        let hours = futures_hours();
        assert!(gate.is_tradable(&shfe, Some(&hours), at(15, 10, 0)));
        assert!(!gate.is_tradable(&shfe, Some(&hours), at(15, 12, 0)));
        assert!(gate.is_tradable(&shfe, Some(&hours), at(15, 23, 0)));
    }

    #[test]
    fn test_weekend_rules() {
        let gate = TradingHourGate::new();
        let shfe = ExchangeId::new("SHFE");
        let hours = futures_hours();
        // Friday night session running past midnight
        assert!(gate.is_tradable(&shfe, Some(&hours), at(16, 0, 30)));
        assert!(!gate.is_tradable(&shfe, Some(&hours), at(16, 10, 0)));
        assert!(!gate.is_tradable(&shfe, Some(&hours), at(17, 10, 0)));
    }

    #[test]
    fn test_offset_applied() {
        let gate = TradingHourGate::new();
        let shfe = ExchangeId::new("SHFE");
        // local clock runs two minutes ahead of the exchange
        gate.apply_login_times(at(15, 8, 59), &[(shfe.clone(), hm(8, 57))]);
        assert_eq!(gate.offset(&shfe), Duration::minutes(2));
        let hours = futures_hours();
        // 09:01 local is 08:59 at the exchange
        assert!(!gate.is_tradable(&shfe, Some(&hours), at(15, 9, 1)));
        assert!(gate.is_tradable(&shfe, Some(&hours), at(15, 9, 3)));
        // other exchanges are unaffected
        assert!(gate.is_tradable(&ExchangeId::new("DCE"), Some(&hours), at(15, 9, 1)));
    }

    #[test]
    fn test_offset_across_midnight() {
        assert_eq!(time_of_day_offset(hm(0, 1), hm(23, 59)), Duration::minutes(2));
        assert_eq!(time_of_day_offset(hm(23, 59), hm(0, 1)), Duration::minutes(-2));
    }
}
