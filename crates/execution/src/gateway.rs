//! Gateway channel and its wire payloads.
//!
//! The gateway is request/response keyed by a monotonically assigned
//! [`RequestSeq`]. Requests go out through [`GatewayChannel::send`]; every
//! response, and every unsolicited order or trade report, comes back as a
//! [`GatewayEvent`] on one ordered callback queue. Multi-part responses carry
//! `is_last = false` on all but the final part.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use og_core::types::{
    CancelDetail, CommissionRate, DetailOrder, ExchangeId, Instrument, InstrumentId, MarginRate,
    MarketSnapshot, OrderRef, OrderSnapshot, TradeReport, TradingHours,
};

/// Identity of one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestSeq(pub u64);

impl std::fmt::Display for RequestSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SEQ-{}", self.0)
    }
}

/// Shared source of request sequence numbers.
#[derive(Debug)]
pub struct RequestSeqs {
    next: AtomicU64,
}

impl RequestSeqs {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> RequestSeq {
        RequestSeq(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestSeqs {
    fn default() -> Self {
        Self::new()
    }
}

/// Credentials presented at authentication and login.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub broker_id: String,
    pub investor_id: String,
    pub password: String,
    pub app_id: String,
    pub auth_code: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("broker_id", &self.broker_id)
            .field("investor_id", &self.investor_id)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    Connect { front_addresses: Vec<String> },
    Authenticate(Credentials),
    Login(Credentials),
    ConfirmSettlement,
    Logout,
    /// `None` queries every instrument.
    QueryInstrument(Option<InstrumentId>),
    QueryMarginRate(InstrumentId),
    QueryCommissionRate(InstrumentId),
    QueryMarketData(InstrumentId),
    QueryTradingHours(InstrumentId),
    InsertOrder(DetailOrder),
    CancelOrder(CancelDetail),
}

impl GatewayRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Authenticate(_) => "authenticate",
            Self::Login(_) => "login",
            Self::ConfirmSettlement => "confirm_settlement",
            Self::Logout => "logout",
            Self::QueryInstrument(_) => "query_instrument",
            Self::QueryMarginRate(_) => "query_margin_rate",
            Self::QueryCommissionRate(_) => "query_commission_rate",
            Self::QueryMarketData(_) => "query_market_data",
            Self::QueryTradingHours(_) => "query_trading_hours",
            Self::InsertOrder(_) => "insert_order",
            Self::CancelOrder(_) => "cancel_order",
        }
    }
}

/// Facts reported by a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginInfo {
    pub trading_day: NaiveDate,
    /// Highest order reference used by earlier sessions.
    pub max_order_ref: u64,
    /// Each exchange's clock at login.
    pub exchange_times: Vec<(ExchangeId, NaiveTime)>,
}

/// Error attached to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFault {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayPayload {
    Connected,
    Disconnected { reason: String },
    Authenticated,
    LoggedIn(LoginInfo),
    SettlementConfirmed,
    LoggedOut,
    Instrument(Instrument),
    MarginRate {
        instrument_id: InstrumentId,
        rate: MarginRate,
    },
    CommissionRate {
        instrument_id: InstrumentId,
        rate: CommissionRate,
    },
    MarketData(MarketSnapshot),
    TradingHours {
        instrument_id: InstrumentId,
        hours: TradingHours,
    },
    Order(OrderSnapshot),
    Trade(TradeReport),
    InsertRejected { order_ref: OrderRef },
    CancelRejected { action_ref: OrderRef },
    /// Final part of a response that carried no items.
    Empty,
}

/// One callback from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    /// Request this answers; `None` for unsolicited reports.
    pub seq: Option<RequestSeq>,
    pub payload: GatewayPayload,
    pub is_last: bool,
    pub fault: Option<GatewayFault>,
}

impl GatewayEvent {
    /// Single-part answer to `seq`.
    pub fn reply(seq: RequestSeq, payload: GatewayPayload) -> Self {
        Self {
            seq: Some(seq),
            payload,
            is_last: true,
            fault: None,
        }
    }

    pub fn unsolicited(payload: GatewayPayload) -> Self {
        Self {
            seq: None,
            payload,
            is_last: true,
            fault: None,
        }
    }

    pub fn with_fault(mut self, code: i32, message: impl Into<String>) -> Self {
        self.fault = Some(GatewayFault {
            code,
            message: message.into(),
        });
        self
    }

    pub fn partial(mut self) -> Self {
        self.is_last = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway disconnected")]
    Disconnected,
    /// The gateway refused the request for flow control; retry later.
    #[error("gateway busy ({0})")]
    Busy(i32),
    #[error("gateway refused request: {0}")]
    Refused(String),
}

/// Outbound half of a gateway connection.
pub trait GatewayChannel: Send + Sync {
    fn send(&self, seq: RequestSeq, request: GatewayRequest) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_is_object_safe() {
        fn _assert_object_safe(_g: &dyn GatewayChannel) {}
    }

    #[test]
    fn test_seqs_monotonic() {
        let seqs = RequestSeqs::new();
        let a = seqs.next();
        let b = seqs.next();
        assert!(b > a);
        assert_eq!(format!("{}", a), "SEQ-1");
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials {
            broker_id: "9999".into(),
            investor_id: "000001".into(),
            password: "hunter2".into(),
            app_id: "og".into(),
            auth_code: "XYZ".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("000001"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("XYZ"));
    }

    #[test]
    fn test_event_builders() {
        let ev = GatewayEvent::reply(RequestSeq(3), GatewayPayload::Empty)
            .partial()
            .with_fault(90, "busy");
        assert_eq!(ev.seq, Some(RequestSeq(3)));
        assert!(!ev.is_last);
        assert_eq!(ev.fault.unwrap().code, 90);
    }
}
