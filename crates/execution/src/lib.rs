//! # og-execution
//!
//! Everything between an admitted sub-order and the gateway wire: the
//! gateway channel and its callback payloads, the sliding-window rate
//! limiter, the trading-hour gate with per-exchange clock offsets, the
//! bounded acknowledgement gate, and the single-flow [`Dispatcher`].

pub mod ack;
pub mod dispatcher;
pub mod gateway;
pub mod rate_limiter;
pub mod trading_hours;

pub use ack::{AckGate, AckWait};
pub use dispatcher::{DispatchStats, Dispatcher, Pending};
pub use gateway::{
    Credentials, GatewayChannel, GatewayError, GatewayEvent, GatewayFault, GatewayPayload,
    GatewayRequest, LoginInfo, RequestSeq, RequestSeqs,
};
pub use rate_limiter::SlidingWindowLimiter;
pub use trading_hours::TradingHourGate;
