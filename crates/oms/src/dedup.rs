//! Order reference generation and trade de-duplication.
//!
//! [`OrderRefGenerator`] hands out unique, monotonic, fixed-width sub-order
//! references. [`TradeDeduplicator`] discards trade reports that were already
//! applied, which happens when the gateway replays after a reconnect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use og_core::types::{ExchangeId, OrderRef, TradeReport};
use parking_lot::Mutex;

/// Monotonic generator of 12-digit order references.
pub struct OrderRefGenerator {
    counter: AtomicU64,
}

impl OrderRefGenerator {
    /// Start after `last_used`.
    pub fn new(last_used: u64) -> Self {
        Self {
            counter: AtomicU64::new(last_used + 1),
        }
    }

    /// Next reference, e.g. `000000000042`.
    pub fn next_ref(&self) -> OrderRef {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        OrderRef::new(format!("{:012}", n))
    }

    /// Make sure future references are above `max_used`, typically the max
    /// order ref reported at login.
    pub fn bump_past(&self, max_used: u64) {
        self.counter.fetch_max(max_used + 1, Ordering::Relaxed);
    }
}

impl Default for OrderRefGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Trade ids restart every trading day, so the day is part of the key.
type TradeKey = (NaiveDate, ExchangeId, String);

/// Set of applied trade ids, keyed per trading day and exchange.
pub struct TradeDeduplicator {
    seen: Mutex<HashSet<TradeKey>>,
}

impl TradeDeduplicator {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Record a trade. Returns `true` the first time, `false` for a replay.
    pub fn first_seen(&self, trade: &TradeReport) -> bool {
        let key = (
            trade.trading_day,
            trade.exchange_id.clone(),
            trade.trade_id.trim().to_string(),
        );
        self.seen.lock().insert(key)
    }

    /// Forget trades of days before `trading_day`. Returns how many ids are
    /// still held.
    pub fn prune_before(&self, trading_day: NaiveDate) -> usize {
        let mut seen = self.seen.lock();
        seen.retain(|(day, _, _)| *day >= trading_day);
        seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TradeDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
