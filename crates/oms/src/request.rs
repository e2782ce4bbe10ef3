//! One client instruction and everything it owns.

use std::collections::HashMap;

use chrono::NaiveDate;
use og_core::types::{Instrument, OrderInstruction, OrderRef, RequestId, ReservationId, UserId};
use og_core::{ErrorCode, ExecutionResult};

/// Shape of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Insert(OrderInstruction),
    Cancel { target: RequestId },
}

/// Insert: `Created → Validated → {Rejected | Reserved → Dispatched}`.
/// Cancel: `Created → {Rejected | Dispatched}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Created,
    Validated,
    Reserved,
    Dispatched,
    Rejected,
}

/// Which reservation a sub-order draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationHandle {
    Cash(ReservationId),
    Position(ReservationId),
}

#[derive(Debug, Clone)]
pub struct ActiveRequest {
    pub id: RequestId,
    pub user_id: UserId,
    /// Trading day the request was issued on.
    pub trading_day: NaiveDate,
    pub kind: RequestKind,
    stage: RequestStage,
    result: ExecutionResult,
    /// Instrument definition captured at admission.
    pub instrument: Option<Instrument>,
    sub_orders: Vec<OrderRef>,
    reservations: HashMap<OrderRef, ReservationHandle>,
    traded_volume: u32,
}

impl ActiveRequest {
    pub fn new(id: RequestId, user_id: UserId, trading_day: NaiveDate, kind: RequestKind) -> Self {
        Self {
            id,
            user_id,
            trading_day,
            kind,
            stage: RequestStage::Created,
            result: ExecutionResult::ok(),
            instrument: None,
            sub_orders: Vec::new(),
            reservations: HashMap::new(),
            traded_volume: 0,
        }
    }

    pub fn stage(&self) -> RequestStage {
        self.stage
    }

    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    pub fn is_insert(&self) -> bool {
        matches!(self.kind, RequestKind::Insert(_))
    }

    /// Volume asked for by an insert; zero for a cancel.
    pub fn requested_volume(&self) -> u32 {
        match &self.kind {
            RequestKind::Insert(order) => order.volume,
            RequestKind::Cancel { .. } => 0,
        }
    }

    pub fn traded_volume(&self) -> u32 {
        self.traded_volume
    }

    pub fn sub_orders(&self) -> &[OrderRef] {
        &self.sub_orders
    }

    pub fn reservation_for(&self, order_ref: &OrderRef) -> Option<ReservationHandle> {
        self.reservations.get(order_ref).copied()
    }

    /// `(order_ref, handle)` pairs in sub-order order.
    pub fn reservations(&self) -> Vec<(OrderRef, ReservationHandle)> {
        self.sub_orders
            .iter()
            .filter_map(|r| self.reservations.get(r).map(|h| (r.clone(), *h)))
            .collect()
    }

    pub(crate) fn advance(&mut self, stage: RequestStage) {
        self.stage = stage;
    }

    pub(crate) fn attach(&mut self, order_ref: OrderRef, handle: Option<ReservationHandle>) {
        if let Some(h) = handle {
            self.reservations.insert(order_ref.clone(), h);
        }
        self.sub_orders.push(order_ref);
    }

    /// Reject with a code. The stage becomes `Rejected`.
    pub(crate) fn reject(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.stage = RequestStage::Rejected;
        self.result = ExecutionResult::error(code, message);
    }

    /// Record an error without changing the stage. The first error sticks.
    pub(crate) fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        if self.result.is_ok() {
            self.result = ExecutionResult::error(code, message);
        }
    }

    /// Add traded volume. Returns `true` if the total now exceeds what was
    /// requested.
    pub(crate) fn record_trade(&mut self, volume: u32) -> bool {
        self.traded_volume = self.traded_volume.saturating_add(volume);
        self.is_insert() && self.traded_volume > self.requested_volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use og_core::types::{InstrumentId, Offset, Side};

    fn insert(volume: u32) -> ActiveRequest {
        ActiveRequest::new(
            RequestId(1),
            UserId::new("u1"),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            RequestKind::Insert(OrderInstruction {
                user_id: UserId::new("u1"),
                instrument_id: InstrumentId::new("rb2405"),
                side: Side::Buy,
                offset: Offset::Open,
                price: 100.0,
                volume,
            }),
        )
    }

    #[test]
    fn test_excess_fill_detected() {
        let mut req = insert(5);
        assert!(!req.record_trade(3));
        assert!(!req.record_trade(2));
        assert!(req.record_trade(1));
        assert_eq!(req.traded_volume(), 6);
    }

    #[test]
    fn test_first_error_sticks() {
        let mut req = insert(5);
        req.advance(RequestStage::Dispatched);
        req.fail(ErrorCode::NeedRetry, "queue full");
        req.fail(ErrorCode::GatewayRejected, "later");
        assert_eq!(req.result().code, ErrorCode::NeedRetry);
        assert_eq!(req.stage(), RequestStage::Dispatched);
    }

    #[test]
    fn test_attach_keeps_order() {
        let mut req = insert(5);
        req.attach(OrderRef::new("b"), Some(ReservationHandle::Position(ReservationId(2))));
        req.attach(OrderRef::new("a"), Some(ReservationHandle::Position(ReservationId(1))));
        let pairs = req.reservations();
        assert_eq!(pairs[0].0, OrderRef::new("b"));
        assert_eq!(pairs[1].1, ReservationHandle::Position(ReservationId(1)));
    }
}
