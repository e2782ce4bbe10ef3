//! Order-related types: side, offset, exchange order status, client
//! instructions, exchange-facing sub-orders and the asynchronous order and
//! trade reports that come back from the gateway.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ExchangeId, InstrumentId, OrderRef, OrderSysId, RequestId, UserId};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl Side {
    /// Position direction that an opening order on this side creates.
    pub fn opens(&self) -> PositionSide {
        match self {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }

    /// Position direction that a closing order on this side reduces.
    pub fn closes(&self) -> PositionSide {
        match self {
            Side::Buy => PositionSide::Short,
            Side::Sell => PositionSide::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Direction of a held position lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long position.
    Long,
    /// Short position.
    Short,
}

impl PositionSide {
    /// `+1.0` for long, `-1.0` for short. Multiplies price differences into
    /// profit.
    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "Long"),
            PositionSide::Short => write!(f, "Short"),
        }
    }
}

/// Open/close flag of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    /// Open a new position.
    Open,
    /// Close any opposite position, today's or carried.
    Close,
    /// Close only positions opened in the current trading day.
    CloseToday,
    /// Close only positions carried from previous trading days.
    CloseYesterday,
}

impl Offset {
    /// Returns `true` for every closing flag.
    pub fn is_close(&self) -> bool {
        !matches!(self, Offset::Open)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Open => write!(f, "Open"),
            Offset::Close => write!(f, "Close"),
            Offset::CloseToday => write!(f, "CloseToday"),
            Offset::CloseYesterday => write!(f, "CloseYesterday"),
        }
    }
}

/// Exchange order status as reported by order callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Fully traded; terminal.
    AllTraded,
    /// Partially traded, remainder still queueing.
    PartTradedQueueing,
    /// Partially traded, remainder no longer queueing.
    PartTradedNotQueueing,
    /// Nothing traded, queueing.
    NoTradeQueueing,
    /// Nothing traded, not queueing.
    NoTradeNotQueueing,
    /// Canceled by user or exchange; terminal.
    Canceled,
    /// Accepted by the front but not yet by the exchange.
    Unknown,
}

impl OrderStatus {
    /// Returns `true` if no further fills or cancels can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AllTraded | Self::Canceled)
    }
}

/// A client instruction to insert an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInstruction {
    /// Issuing user.
    pub user_id: UserId,
    /// Instrument to trade.
    pub instrument_id: InstrumentId,
    /// Order side.
    pub side: Side,
    /// Open or close flag.
    pub offset: Offset,
    /// Limit price.
    pub price: f64,
    /// Requested volume in contracts.
    pub volume: u32,
}

/// A client instruction to cancel everything a previous insert spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInstruction {
    /// Issuing user; must own the target request.
    pub user_id: UserId,
    /// Request returned by the original insert.
    pub target: RequestId,
}

/// One exchange-facing order derived from a client instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailOrder {
    /// Locally assigned reference.
    pub order_ref: OrderRef,
    /// Owning user.
    pub user_id: UserId,
    /// Instrument.
    pub instrument_id: InstrumentId,
    /// Exchange the instrument trades on.
    pub exchange_id: ExchangeId,
    /// Side.
    pub side: Side,
    /// Resolved offset: never `Close` for closes split across lots.
    pub offset: Offset,
    /// Limit price.
    pub price: f64,
    /// Volume of this sub-order.
    pub volume: u32,
}

/// One exchange-facing cancel of a previously inserted sub-order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDetail {
    /// Locally assigned reference of this cancel action.
    pub action_ref: OrderRef,
    /// Owning user.
    pub user_id: UserId,
    /// Sub-order being canceled.
    pub order_ref: OrderRef,
    /// Exchange identity of the sub-order being canceled.
    pub order_sys_id: OrderSysId,
    /// Exchange.
    pub exchange_id: ExchangeId,
    /// Instrument.
    pub instrument_id: InstrumentId,
}

/// Last-known exchange state of a sub-order (order callback payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Local reference of the sub-order.
    pub order_ref: OrderRef,
    /// Exchange identity, once assigned.
    pub order_sys_id: Option<OrderSysId>,
    /// Exchange.
    pub exchange_id: ExchangeId,
    /// Instrument.
    pub instrument_id: InstrumentId,
    /// Side.
    pub side: Side,
    /// Offset flag as sent.
    pub offset: Offset,
    /// Limit price.
    pub price: f64,
    /// Original volume.
    pub volume_total_original: u32,
    /// Volume traded so far.
    pub volume_traded: u32,
    /// Status.
    pub status: OrderStatus,
    /// Free-form status message from the exchange.
    pub status_message: String,
}

/// One trade execution (trade callback payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReport {
    /// Exchange trade identifier; unique per exchange.
    pub trade_id: String,
    /// Local reference of the traded sub-order.
    pub order_ref: OrderRef,
    /// Exchange identity of the traded sub-order.
    pub order_sys_id: OrderSysId,
    /// Exchange.
    pub exchange_id: ExchangeId,
    /// Instrument.
    pub instrument_id: InstrumentId,
    /// Side.
    pub side: Side,
    /// Offset flag.
    pub offset: Offset,
    /// Execution price.
    pub price: f64,
    /// Executed volume.
    pub volume: u32,
    /// Trading day the execution belongs to.
    pub trading_day: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_open_close_directions() {
        assert_eq!(Side::Buy.opens(), PositionSide::Long);
        assert_eq!(Side::Sell.opens(), PositionSide::Short);
        assert_eq!(Side::Sell.closes(), PositionSide::Long);
        assert_eq!(Side::Buy.closes(), PositionSide::Short);
    }

    #[test]
    fn test_position_side_sign() {
        assert_eq!(PositionSide::Long.sign(), 1.0);
        assert_eq!(PositionSide::Short.sign(), -1.0);
    }

    #[test]
    fn test_offset_is_close() {
        assert!(!Offset::Open.is_close());
        assert!(Offset::Close.is_close());
        assert!(Offset::CloseToday.is_close());
        assert!(Offset::CloseYesterday.is_close());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::AllTraded.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::PartTradedQueueing.is_terminal());
        assert!(!OrderStatus::NoTradeQueueing.is_terminal());
        assert!(!OrderStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Side::Buy), "Buy");
        assert_eq!(format!("{}", PositionSide::Short), "Short");
        assert_eq!(format!("{}", Offset::CloseToday), "CloseToday");
    }
}
