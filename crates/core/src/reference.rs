//! Reference-data provider interface and an in-memory store.
//!
//! The orchestrator reads instrument definitions, rates, market limits and
//! trading hours through [`ReferenceData`]. Any lookup may come back `None`
//! ("not yet known"). The session layer fills a [`ReferenceStore`] from query
//! responses; tests and the paper gateway seed it directly.

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::types::{
    CommissionRate, Instrument, InstrumentId, MarginRate, MarketSnapshot, TradingHours,
};

/// Instrument definition together with whatever rates are known for it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentInfo {
    pub instrument: Instrument,
    pub margin_rate: Option<MarginRate>,
    pub commission_rate: Option<CommissionRate>,
}

/// Read access to instrument reference data.
pub trait ReferenceData: Send + Sync {
    /// Instrument definition and rates, if the instrument is known.
    fn instrument_info(&self, instrument_id: &InstrumentId) -> Option<InstrumentInfo>;

    /// Latest market limits and settlement price, if any snapshot exists.
    fn market_snapshot(&self, instrument_id: &InstrumentId) -> Option<MarketSnapshot>;

    /// Trading-hour windows, if known.
    fn trading_hours(&self, instrument_id: &InstrumentId) -> Option<TradingHours>;

    /// Official settlement price published for `trading_day`.
    fn settlement_price(
        &self,
        instrument_id: &InstrumentId,
        trading_day: NaiveDate,
    ) -> Option<f64>;
}

/// Concurrent in-memory reference data.
#[derive(Default)]
pub struct ReferenceStore {
    instruments: DashMap<InstrumentId, Instrument>,
    margin_rates: DashMap<InstrumentId, MarginRate>,
    commission_rates: DashMap<InstrumentId, CommissionRate>,
    snapshots: DashMap<InstrumentId, MarketSnapshot>,
    hours: DashMap<InstrumentId, TradingHours>,
    settlement_prices: DashMap<(InstrumentId, NaiveDate), f64>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_instrument(&self, instrument: Instrument) {
        self.instruments
            .insert(instrument.instrument_id.clone(), instrument);
    }

    pub fn set_margin_rate(&self, instrument_id: InstrumentId, rate: MarginRate) {
        self.margin_rates.insert(instrument_id, rate);
    }

    pub fn set_commission_rate(&self, instrument_id: InstrumentId, rate: CommissionRate) {
        self.commission_rates.insert(instrument_id, rate);
    }

    pub fn set_market_snapshot(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .insert(snapshot.instrument_id.clone(), snapshot);
    }

    pub fn set_trading_hours(&self, instrument_id: InstrumentId, hours: TradingHours) {
        self.hours.insert(instrument_id, hours);
    }

    /// Record the official settlement price of an instrument for one
    /// trading day. A price never carries over to another day.
    pub fn set_settlement_price(
        &self,
        instrument_id: &InstrumentId,
        trading_day: NaiveDate,
        price: f64,
    ) {
        self.settlement_prices
            .insert((instrument_id.clone(), trading_day), price);
    }

    /// Forget settlement prices of days before `trading_day`.
    pub fn prune_settlement_prices(&self, trading_day: NaiveDate) {
        self.settlement_prices.retain(|(_, day), _| *day >= trading_day);
    }

    /// All known instrument ids, sorted.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<_> = self.instruments.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Instruments missing a margin rate, sorted.
    pub fn missing_margin_rates(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<_> = self
            .instruments
            .iter()
            .filter(|e| !self.margin_rates.contains_key(e.key()))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Instruments missing a commission rate, sorted.
    pub fn missing_commission_rates(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<_> = self
            .instruments
            .iter()
            .filter(|e| !self.commission_rates.contains_key(e.key()))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

impl ReferenceData for ReferenceStore {
    fn instrument_info(&self, instrument_id: &InstrumentId) -> Option<InstrumentInfo> {
        let instrument = self.instruments.get(instrument_id)?.clone();
        Some(InstrumentInfo {
            instrument,
            margin_rate: self.margin_rates.get(instrument_id).map(|r| *r),
            commission_rate: self.commission_rates.get(instrument_id).map(|r| *r),
        })
    }

    fn market_snapshot(&self, instrument_id: &InstrumentId) -> Option<MarketSnapshot> {
        self.snapshots.get(instrument_id).map(|s| s.clone())
    }

    fn trading_hours(&self, instrument_id: &InstrumentId) -> Option<TradingHours> {
        self.hours.get(instrument_id).map(|h| h.clone())
    }

    fn settlement_price(
        &self,
        instrument_id: &InstrumentId,
        trading_day: NaiveDate,
    ) -> Option<f64> {
        self.settlement_prices
            .get(&(instrument_id.clone(), trading_day))
            .map(|p| *p)
    }
}
