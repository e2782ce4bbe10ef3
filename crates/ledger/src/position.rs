//! Position lots, close-lot selection and daily settlement.
//!
//! Every opening fill becomes its own [`PositionLot`]; lots are never merged.
//! A close reserves volume on specific lots through [`PositionReservation`]s.
//! Lots are kept in insertion order per instrument, and that order alone
//! drives close-lot selection.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use og_core::types::{
    CommissionKind, CommissionRate, ExchangeId, Instrument, InstrumentId, LotId, MarginRate,
    Offset, OrderInstruction, PositionSide, ReservationId, TradeReport,
};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::reservation::ReservedVolume;

/// One open position created by a single opening fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLot {
    pub id: LotId,
    pub instrument_id: InstrumentId,
    pub exchange_id: ExchangeId,
    pub direction: PositionSide,
    /// Trading day the lot was opened.
    pub trading_day: NaiveDate,
    pub open_price: f64,
    /// Volume at the start of the current day (opened volume for a new lot).
    pub volume: u32,
    /// Volume closed during the current day.
    pub close_volume: u32,
    /// Sum of `price * volume * multiple` over today's closes.
    pub close_amount: f64,
    pub close_profit_by_date: f64,
    pub close_profit_by_trade: f64,
    pub position_profit_by_date: f64,
    pub position_profit_by_trade: f64,
    /// Margin currently held by the remaining volume.
    pub margin: f64,
    pub volume_multiple: u32,
    /// Settlement price of the previous day; open price for a same-day lot.
    pub last_settlement_price: f64,
    pub settlement_price: f64,
    /// Exchange trade that opened the lot.
    pub trade_id: String,
}

impl PositionLot {
    /// Volume not yet closed.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.volume.saturating_sub(self.close_volume)
    }

    pub fn is_today(&self, trading_day: NaiveDate) -> bool {
        self.trading_day == trading_day
    }

    /// Price that today's profit is measured against.
    pub fn reference_price(&self, trading_day: NaiveDate) -> f64 {
        if self.is_today(trading_day) {
            self.open_price
        } else {
            self.last_settlement_price
        }
    }
}

/// Per-contract close figures frozen when the close is reserved.
///
/// Later fills on the lot do not change a template that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloseTemplate {
    pub direction: PositionSide,
    pub open_price: f64,
    /// Last settlement price for a carried lot, open price for a same-day lot.
    pub reference_price: f64,
    pub volume_multiple: u32,
    pub margin_per_unit: f64,
    pub commission_per_unit: f64,
}

impl CloseTemplate {
    /// Mark-to-market profit of closing one contract at `price`.
    pub fn profit_by_date(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.reference_price) * self.volume_multiple as f64
    }

    /// Profit of closing one contract at `price` against its open price.
    pub fn profit_by_trade(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.open_price) * self.volume_multiple as f64
    }
}

/// Volume held on one lot for a pending close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReservation {
    pub id: ReservationId,
    pub lot_id: LotId,
    pub instrument_id: InstrumentId,
    pub template: CloseTemplate,
    /// `true` when the lot was opened on the current trading day.
    pub close_today: bool,
    pub hold: ReservedVolume,
}

impl PositionReservation {
    pub fn remaining(&self) -> u32 {
        self.hold.remaining()
    }
}

/// One lot picked for a close: the reservation made on it and the offset
/// the resulting sub-order must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseAllocation {
    pub reservation: ReservationId,
    pub lot_id: LotId,
    pub volume: u32,
    pub close_today: bool,
}

impl CloseAllocation {
    pub fn offset(&self) -> Offset {
        if self.close_today {
            Offset::CloseToday
        } else {
            Offset::CloseYesterday
        }
    }
}

/// Money booked by one close fill.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CloseFill {
    pub volume: u32,
    pub close_profit_by_date: f64,
    pub close_profit_by_trade: f64,
    pub margin_released: f64,
    pub commission: f64,
}

/// What settlement needs for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementInput {
    pub instrument: Instrument,
    pub margin_rate: MarginRate,
    pub settlement_price: f64,
}

pub type SettlementInputs = HashMap<InstrumentId, SettlementInput>;

/// Totals produced by settling a book.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BookSettlement {
    pub margin: f64,
    pub position_profit: f64,
    pub canceled_reservations: usize,
    pub dropped_lots: usize,
}

/// All lots and close reservations of one user.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    lots: BTreeMap<InstrumentId, Vec<PositionLot>>,
    reservations: BTreeMap<ReservationId, PositionReservation>,
    next_lot: u64,
    next_reservation: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            next_lot: 1,
            next_reservation: 1,
            ..Default::default()
        }
    }

    /// Rebuild from persisted lots, preserving their order.
    pub fn from_lots(lots: Vec<PositionLot>) -> Self {
        let mut book = Self::new();
        for lot in lots {
            book.next_lot = book.next_lot.max(lot.id.0 + 1);
            book.lots.entry(lot.instrument_id.clone()).or_default().push(lot);
        }
        book
    }

    /// Lots of one instrument, or of all instruments, in insertion order.
    pub fn lots(&self, instrument_id: Option<&InstrumentId>) -> Vec<PositionLot> {
        match instrument_id {
            Some(id) => self.lots.get(id).cloned().unwrap_or_default(),
            None => self.lots.values().flatten().cloned().collect(),
        }
    }

    pub fn lot(&self, lot_id: LotId) -> Option<&PositionLot> {
        self.lots.values().flatten().find(|l| l.id == lot_id)
    }

    fn lot_mut(&mut self, lot_id: LotId) -> Option<&mut PositionLot> {
        self.lots.values_mut().flatten().find(|l| l.id == lot_id)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&PositionReservation> {
        self.reservations.get(&id)
    }

    /// Volume held on a lot by live close reservations.
    pub fn frozen_volume(&self, lot_id: LotId) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.lot_id == lot_id)
            .map(|r| r.remaining())
            .sum()
    }

    pub fn available_volume(&self, lot: &PositionLot) -> u32 {
        lot.remaining().saturating_sub(self.frozen_volume(lot.id))
    }

    fn closable<'a>(
        &'a self,
        order: &'a OrderInstruction,
        trading_day: NaiveDate,
    ) -> impl Iterator<Item = &'a PositionLot> + 'a {
        let opening = order.side.opens();
        self.lots
            .get(&order.instrument_id)
            .into_iter()
            .flatten()
            .filter(move |lot| lot.direction != opening)
            .filter(move |lot| match order.offset {
                Offset::CloseToday => lot.is_today(trading_day),
                Offset::CloseYesterday => !lot.is_today(trading_day),
                Offset::Close | Offset::Open => true,
            })
    }

    /// Pick lots for a close, greedily and in insertion order.
    ///
    /// Only lots opposite to the order's opening direction qualify, narrowed
    /// to today's or carried lots by the offset. Returns `None` when their
    /// total available volume is short of the request.
    pub fn peek_close_lots(
        &self,
        order: &OrderInstruction,
        trading_day: NaiveDate,
    ) -> Option<Vec<(LotId, u32)>> {
        let mut wanted = order.volume;
        let mut picks = Vec::new();
        for lot in self.closable(order, trading_day) {
            if wanted == 0 {
                break;
            }
            let take = self.available_volume(lot).min(wanted);
            if take > 0 {
                picks.push((lot.id, take));
                wanted -= take;
            }
        }
        (wanted == 0).then_some(picks)
    }

    /// Reserve close volume, one reservation per lot touched. All or nothing.
    pub fn reserve_close(
        &mut self,
        order: &OrderInstruction,
        instrument: &Instrument,
        commission_rate: &CommissionRate,
        trading_day: NaiveDate,
    ) -> Result<Vec<CloseAllocation>, LedgerError> {
        let Some(picks) = self.peek_close_lots(order, trading_day) else {
            let available = self
                .closable(order, trading_day)
                .map(|l| self.available_volume(l))
                .sum();
            return Err(LedgerError::OverClose {
                requested: order.volume,
                available,
            });
        };

        let mult = instrument.volume_multiple;
        let mut allocations = Vec::with_capacity(picks.len());
        for (lot_id, volume) in picks {
            let lot = self.lot(lot_id).ok_or(LedgerError::LotNotFound(lot_id))?;
            let close_today = lot.is_today(trading_day);
            let kind = if close_today {
                CommissionKind::CloseToday
            } else {
                CommissionKind::CloseYesterday
            };
            let template = CloseTemplate {
                direction: lot.direction,
                open_price: lot.open_price,
                reference_price: lot.reference_price(trading_day),
                volume_multiple: lot.volume_multiple,
                margin_per_unit: lot.margin / lot.remaining().max(1) as f64,
                commission_per_unit: commission_rate.per_unit(kind, order.price, mult),
            };
            let id = ReservationId(self.next_reservation.max(1));
            self.next_reservation = id.0 + 1;
            self.reservations.insert(
                id,
                PositionReservation {
                    id,
                    lot_id,
                    instrument_id: order.instrument_id.clone(),
                    template,
                    close_today,
                    hold: ReservedVolume::new(volume),
                },
            );
            allocations.push(CloseAllocation {
                reservation: id,
                lot_id,
                volume,
                close_today,
            });
        }
        Ok(allocations)
    }

    /// Book a close fill at `price` against its reservation and lot.
    pub fn consume(
        &mut self,
        id: ReservationId,
        volume: u32,
        price: f64,
    ) -> Result<CloseFill, LedgerError> {
        let r = self
            .reservations
            .get_mut(&id)
            .ok_or(LedgerError::ReservationNotFound(id))?;
        let lot_id = r.lot_id;
        let template = r.template;
        if !self.lots.values().flatten().any(|l| l.id == lot_id) {
            return Err(LedgerError::LotNotFound(lot_id));
        }
        r.hold.consume(id, volume)?;

        let v = volume as f64;
        let fill = CloseFill {
            volume,
            close_profit_by_date: template.profit_by_date(price) * v,
            close_profit_by_trade: template.profit_by_trade(price) * v,
            margin_released: template.margin_per_unit * v,
            commission: template.commission_per_unit * v,
        };
        let lot = self.lot_mut(lot_id).ok_or(LedgerError::LotNotFound(lot_id))?;
        lot.close_volume += volume;
        lot.close_amount += price * v * lot.volume_multiple as f64;
        lot.close_profit_by_date += fill.close_profit_by_date;
        lot.close_profit_by_trade += fill.close_profit_by_trade;
        lot.margin = (lot.margin - fill.margin_released).max(0.0);
        Ok(fill)
    }

    /// Release a close reservation. Returns `false` if already canceled.
    pub fn cancel(&mut self, id: ReservationId) -> Result<bool, LedgerError> {
        let r = self
            .reservations
            .get_mut(&id)
            .ok_or(LedgerError::ReservationNotFound(id))?;
        Ok(r.hold.cancel())
    }

    /// Create a lot for an opening fill.
    pub fn open_lot(&mut self, trade: &TradeReport, instrument: &Instrument, margin: f64) -> LotId {
        let id = LotId(self.next_lot.max(1));
        self.next_lot = id.0 + 1;
        let lot = PositionLot {
            id,
            instrument_id: trade.instrument_id.clone(),
            exchange_id: trade.exchange_id.clone(),
            direction: trade.side.opens(),
            trading_day: trade.trading_day,
            open_price: trade.price,
            volume: trade.volume,
            close_volume: 0,
            close_amount: 0.0,
            close_profit_by_date: 0.0,
            close_profit_by_trade: 0.0,
            position_profit_by_date: 0.0,
            position_profit_by_trade: 0.0,
            margin,
            volume_multiple: instrument.volume_multiple,
            last_settlement_price: trade.price,
            settlement_price: 0.0,
            trade_id: trade.trade_id.clone(),
        };
        self.lots
            .entry(trade.instrument_id.clone())
            .or_default()
            .push(lot);
        id
    }

    /// End-of-day roll-forward.
    ///
    /// Inputs are checked for every instrument with remaining volume before
    /// anything is touched. Then live reservations are canceled, margin and
    /// position profit are recomputed at the settlement price, empty lots are
    /// dropped and the rest carry `remaining` into the next day.
    pub fn settle(
        &mut self,
        inputs: &SettlementInputs,
        trading_day: NaiveDate,
    ) -> Result<BookSettlement, LedgerError> {
        for (instrument_id, lots) in &self.lots {
            if lots.iter().all(|l| l.remaining() == 0) {
                continue;
            }
            let input = inputs
                .get(instrument_id)
                .ok_or_else(|| LedgerError::MissingSettlementInput {
                    instrument_id: instrument_id.clone(),
                    what: "price, instrument and margin rate",
                })?;
            if !(input.settlement_price.is_finite() && input.settlement_price > 0.0) {
                return Err(LedgerError::MissingSettlementInput {
                    instrument_id: instrument_id.clone(),
                    what: "price",
                });
            }
        }

        let mut out = BookSettlement {
            canceled_reservations: self
                .reservations
                .values_mut()
                .map(|r| r.hold.is_live() && r.hold.cancel())
                .filter(|c| *c)
                .count(),
            ..Default::default()
        };
        self.reservations.clear();

        for (instrument_id, lots) in self.lots.iter_mut() {
            let before = lots.len();
            lots.retain(|l| l.remaining() > 0);
            out.dropped_lots += before - lots.len();
            let Some(input) = inputs.get(instrument_id) else {
                continue;
            };
            let settle = input.settlement_price;
            let mult = input.instrument.volume_multiple;
            for lot in lots.iter_mut() {
                let remaining = lot.remaining();
                let v = remaining as f64 * mult as f64;
                let sign = lot.direction.sign();
                lot.position_profit_by_date = sign * (settle - lot.reference_price(trading_day)) * v;
                lot.position_profit_by_trade = sign * (settle - lot.open_price) * v;
                lot.margin = input.margin_rate.per_unit(lot.direction, settle, mult) * remaining as f64;
                lot.settlement_price = settle;
                lot.last_settlement_price = settle;
                lot.volume_multiple = mult;

                out.margin += lot.margin;
                out.position_profit += lot.position_profit_by_date;

                lot.volume = remaining;
                lot.close_volume = 0;
                lot.close_amount = 0.0;
                lot.close_profit_by_date = 0.0;
                lot.close_profit_by_trade = 0.0;
            }
        }
        self.lots.retain(|_, lots| !lots.is_empty());
        Ok(out)
    }
}
