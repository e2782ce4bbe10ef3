//! Admission seam between the orchestrator and the dispatcher.

use og_core::types::{
    CancelDetail, DetailOrder, ExchangeId, InstrumentId, OrderRef, UserId,
};
use og_core::ErrorCode;

use crate::mapper::RequestKey;

/// One exchange-facing item waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum SubOrder {
    Insert(DetailOrder),
    Cancel(CancelDetail),
}

impl SubOrder {
    /// Reference of the item itself: the order ref of an insert, the action
    /// ref of a cancel.
    pub fn order_ref(&self) -> &OrderRef {
        match self {
            SubOrder::Insert(d) => &d.order_ref,
            SubOrder::Cancel(c) => &c.action_ref,
        }
    }

    pub fn user_id(&self) -> &UserId {
        match self {
            SubOrder::Insert(d) => &d.user_id,
            SubOrder::Cancel(c) => &c.user_id,
        }
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        match self {
            SubOrder::Insert(d) => &d.instrument_id,
            SubOrder::Cancel(c) => &c.instrument_id,
        }
    }

    pub fn exchange_id(&self) -> &ExchangeId {
        match self {
            SubOrder::Insert(d) => &d.exchange_id,
            SubOrder::Cancel(c) => &c.exchange_id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, SubOrder::Insert(_))
    }
}

/// Synchronous refusal at dispatch admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchReject {
    #[error("duplicate order ref {0}")]
    DuplicateOrderRef(OrderRef),
    /// Queue full; safe to retry immediately.
    #[error("dispatch queue full")]
    NeedRetry,
    #[error("gateway front not active")]
    FrontNotActive,
}

impl DispatchReject {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateOrderRef(_) => ErrorCode::DuplicateOrderRef,
            Self::NeedRetry => ErrorCode::NeedRetry,
            Self::FrontNotActive => ErrorCode::FrontNotActive,
        }
    }
}

/// Accepts sub-orders for sending.
///
/// A successful `submit` means the item was registered with the order
/// mapper and queued; it says nothing about the exchange.
pub trait SubOrderSink: Send + Sync {
    fn submit(&self, key: RequestKey, order: SubOrder) -> Result<(), DispatchReject>;

    /// References of a past trading day that will never be seen again.
    fn retire(&self, _refs: &[OrderRef]) {}
}
