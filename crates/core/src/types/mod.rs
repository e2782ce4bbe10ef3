//! Core value types for OrderGate.
//!
//! Money is carried as `f64` (the gateway reports prices and rates as
//! doubles); volumes are whole contracts as `u32`.

pub mod ids;
pub mod instrument;
pub mod order;

// Re-export primary types for convenient access via `og_core::types::*`.
pub use ids::{
    ExchangeId, InstrumentId, LotId, OrderRef, OrderSysId, RequestId, ReservationId, UserId,
};
pub use instrument::{
    CommissionKind, CommissionRate, Instrument, MarginRate, MarketSnapshot, TradingHours,
    TradingWindow,
};
pub use order::{
    CancelDetail, CancelInstruction, DetailOrder, Offset, OrderInstruction, OrderSnapshot,
    OrderStatus, PositionSide, Side, TradeReport,
};
