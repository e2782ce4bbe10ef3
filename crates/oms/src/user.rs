//! Per-user orchestration.
//!
//! An [`ActiveUser`] wraps one [`User`] and its requests behind a single
//! mutex. Every reserve, consume, cancel and settle for that user runs with
//! the lock held, so each appears atomic to the others. Different users never
//! share a lock.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use og_core::types::{
    CancelDetail, DetailOrder, Offset, OrderInstruction, OrderRef, RequestId, TradeReport, UserId,
};
use og_core::{ErrorCode, ExecutionResult, InstrumentInfo, ReferenceData};
use og_ledger::{LedgerError, User, UserStatus};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::mapper::{OrderMapper, RequestKey};
use crate::registry::Services;
use crate::request::{ActiveRequest, RequestKind, RequestStage, ReservationHandle};
use crate::sink::SubOrder;
use crate::view::{LedgerView, ReservationKind, ReservationView};

/// A user and every request it issued, guarded together.
pub struct ActiveUser {
    id: UserId,
    state: Mutex<UserState>,
}

impl ActiveUser {
    pub fn new(user: User) -> Self {
        Self {
            id: user.id.clone(),
            state: Mutex::new(UserState {
                user,
                requests: BTreeMap::new(),
                retired_through: None,
            }),
        }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Exclusive access to the user's state.
    pub fn lock(&self) -> MutexGuard<'_, UserState> {
        self.state.lock()
    }
}

pub struct UserState {
    pub user: User,
    requests: BTreeMap<RequestId, ActiveRequest>,
    /// Highest request id dropped at a trading-day roll.
    retired_through: Option<RequestId>,
}

impl UserState {
    pub fn request(&self, id: RequestId) -> Option<&ActiveRequest> {
        self.requests.get(&id)
    }

    /// Ids of every request issued, in issue order.
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.keys().copied().collect()
    }

    /// Drop every request issued before `trading_day` together with its
    /// mapper entries. Returns the dropped request ids and references.
    pub(crate) fn retire_before(
        &mut self,
        trading_day: NaiveDate,
        mapper: &OrderMapper,
    ) -> (Vec<RequestId>, Vec<OrderRef>) {
        let ids: Vec<RequestId> = self
            .requests
            .values()
            .filter(|r| r.trading_day < trading_day)
            .map(|r| r.id)
            .collect();
        let mut refs = Vec::new();
        for id in &ids {
            self.requests.remove(id);
            refs.extend(mapper.forget_request(*id));
        }
        if let Some(max) = ids.iter().max().copied() {
            self.retired_through = self.retired_through.max(Some(max));
        }
        (ids, refs)
    }

    fn is_retired(&self, request_id: RequestId) -> bool {
        self.retired_through.is_some_and(|max| request_id <= max)
    }

    fn key(&self, request_id: RequestId) -> RequestKey {
        RequestKey::new(self.user.id.clone(), request_id)
    }

    // ── Insert ─────────────────────────────────────────────────────────

    pub(crate) fn insert(&mut self, id: RequestId, order: OrderInstruction, svc: &Services) {
        let mut req = ActiveRequest::new(
            id,
            self.user.id.clone(),
            self.user.trading_day,
            RequestKind::Insert(order.clone()),
        );
        self.admit_insert(&mut req, &order, svc);
        if req.stage() == RequestStage::Rejected {
            warn!(
                user_id = %self.user.id,
                request_id = %id,
                instrument_id = %order.instrument_id,
                code = %req.result().code,
                message = %req.result().message,
                "insert rejected"
            );
        }
        self.requests.insert(id, req);
    }

    fn validate(
        &self,
        order: &OrderInstruction,
        reference: &dyn ReferenceData,
    ) -> Result<InstrumentInfo, ExecutionResult> {
        self.user
            .ensure_active()
            .map_err(|e| ExecutionResult::error(e.code(), e.to_string()))?;
        let info = reference
            .instrument_info(&order.instrument_id)
            .ok_or_else(|| {
                ExecutionResult::error(
                    ErrorCode::InstrumentNotFound,
                    format!("instrument {} not found", order.instrument_id),
                )
            })?;
        let inst = &info.instrument;
        let too_large = inst.max_limit_order_volume > 0 && order.volume > inst.max_limit_order_volume;
        if order.volume == 0 || order.volume < inst.min_limit_order_volume || too_large {
            return Err(ExecutionResult::error(
                ErrorCode::BadField,
                format!(
                    "volume {} outside [{}, {}]",
                    order.volume, inst.min_limit_order_volume, inst.max_limit_order_volume
                ),
            ));
        }
        if !order.price.is_finite() || order.price <= 0.0 {
            return Err(ExecutionResult::error(
                ErrorCode::BadField,
                format!("price {} is not positive", order.price),
            ));
        }
        // No snapshot means no limits to check against.
        if let Some(snap) = reference.market_snapshot(&order.instrument_id) {
            if !snap.within_limits(order.price) {
                return Err(ExecutionResult::error(
                    ErrorCode::BadField,
                    format!(
                        "price {} outside limits [{}, {}]",
                        order.price, snap.lower_limit_price, snap.upper_limit_price
                    ),
                ));
            }
        }
        Ok(info)
    }

    fn admit_insert(&mut self, req: &mut ActiveRequest, order: &OrderInstruction, svc: &Services) {
        let info = match self.validate(order, svc.reference.as_ref()) {
            Ok(info) => info,
            Err(result) => return req.reject(result.code, result.message),
        };
        req.advance(RequestStage::Validated);
        req.instrument = Some(info.instrument.clone());

        if order.offset.is_close() {
            self.admit_close(req, order, &info, svc);
        } else {
            self.admit_open(req, order, &info, svc);
        }
    }

    fn detail(
        &self,
        order: &OrderInstruction,
        info: &InstrumentInfo,
        offset: Offset,
        volume: u32,
        svc: &Services,
    ) -> DetailOrder {
        DetailOrder {
            order_ref: svc.refs.next_ref(),
            user_id: self.user.id.clone(),
            instrument_id: order.instrument_id.clone(),
            exchange_id: info.instrument.exchange_id.clone(),
            side: order.side,
            offset,
            price: order.price,
            volume,
        }
    }

    fn admit_open(
        &mut self,
        req: &mut ActiveRequest,
        order: &OrderInstruction,
        info: &InstrumentInfo,
        svc: &Services,
    ) {
        let (Some(margin), Some(commission)) = (info.margin_rate, info.commission_rate) else {
            return req.reject(
                ErrorCode::RatesNotReady,
                format!("rates for {} not yet known", order.instrument_id),
            );
        };
        let rsv = match self
            .user
            .ledger
            .reserve_open(order, &info.instrument, &margin, &commission)
        {
            Ok(id) => id,
            Err(e) => return req.reject(e.code(), e.to_string()),
        };
        req.advance(RequestStage::Reserved);

        let detail = self.detail(order, info, Offset::Open, order.volume, svc);
        let order_ref = detail.order_ref.clone();
        match svc.sink.submit(self.key(req.id), SubOrder::Insert(detail)) {
            Ok(()) => {
                req.attach(order_ref.clone(), Some(ReservationHandle::Cash(rsv)));
                req.advance(RequestStage::Dispatched);
                debug!(user_id = %self.user.id, request_id = %req.id, order_ref = %order_ref, "open admitted");
            }
            Err(rej) => {
                if let Err(e) = self.user.ledger.cancel(rsv) {
                    error!(user_id = %self.user.id, error = %e, "failed to release open reservation");
                }
                req.reject(rej.code(), rej.to_string());
            }
        }
    }

    /// One sub-order per lot. The fan-out stops at the first refused
    /// submission; sub-orders already admitted keep their reservations, the
    /// refused one and every later one are released.
    fn admit_close(
        &mut self,
        req: &mut ActiveRequest,
        order: &OrderInstruction,
        info: &InstrumentInfo,
        svc: &Services,
    ) {
        let Some(commission) = info.commission_rate else {
            return req.reject(
                ErrorCode::RatesNotReady,
                format!("commission rate for {} not yet known", order.instrument_id),
            );
        };
        let trading_day = self.user.trading_day;
        let allocations = match self
            .user
            .positions
            .reserve_close(order, &info.instrument, &commission, trading_day)
        {
            Ok(a) => a,
            Err(e) => return req.reject(e.code(), e.to_string()),
        };
        req.advance(RequestStage::Reserved);

        let total = allocations.len();
        for (i, alloc) in allocations.iter().enumerate() {
            let detail = self.detail(order, info, alloc.offset(), alloc.volume, svc);
            let order_ref = detail.order_ref.clone();
            match svc.sink.submit(self.key(req.id), SubOrder::Insert(detail)) {
                Ok(()) => {
                    req.attach(order_ref, Some(ReservationHandle::Position(alloc.reservation)));
                }
                Err(rej) => {
                    for rest in &allocations[i..] {
                        if let Err(e) = self.user.positions.cancel(rest.reservation) {
                            error!(user_id = %self.user.id, error = %e, "failed to release close reservation");
                        }
                    }
                    warn!(
                        user_id = %self.user.id,
                        request_id = %req.id,
                        admitted = i,
                        total,
                        reason = %rej,
                        "close fan-out stopped"
                    );
                    let message = format!("sub-order {} of {} refused: {}", i + 1, total, rej);
                    if i == 0 {
                        req.reject(rej.code(), message);
                    } else {
                        req.advance(RequestStage::Dispatched);
                        req.fail(rej.code(), message);
                    }
                    return;
                }
            }
        }
        req.advance(RequestStage::Dispatched);
        debug!(user_id = %self.user.id, request_id = %req.id, sub_orders = total, "close admitted");
    }

    // ── Cancel ─────────────────────────────────────────────────────────

    /// Cancel every live sub-order of `target`. Fans out and continues past
    /// individual failures.
    pub(crate) fn cancel(&mut self, id: RequestId, target: RequestId, svc: &Services) {
        let mut req = ActiveRequest::new(
            id,
            self.user.id.clone(),
            self.user.trading_day,
            RequestKind::Cancel { target },
        );
        self.admit_cancel(&mut req, target, svc);
        if req.stage() == RequestStage::Rejected {
            warn!(
                user_id = %self.user.id,
                request_id = %id,
                target = %target,
                code = %req.result().code,
                "cancel rejected"
            );
        }
        self.requests.insert(id, req);
    }

    fn admit_cancel(&mut self, req: &mut ActiveRequest, target: RequestId, svc: &Services) {
        if self.user.status() == UserStatus::Settled {
            return req.reject(ErrorCode::UserNotActive, "user is settled");
        }
        if !self.requests.get(&target).is_some_and(|r| r.is_insert()) {
            return req.reject(
                ErrorCode::BadRequest,
                format!("{target} is not an insert issued by {}", self.user.id),
            );
        }

        let mut qualifying = 0usize;
        let mut sent = 0usize;
        for order_ref in svc.mapper.resolve_refs(target) {
            let snapshot = svc.mapper.last_snapshot(&order_ref);
            if snapshot.as_ref().is_some_and(|s| s.status.is_terminal()) {
                continue;
            }
            qualifying += 1;

            let sys_id = snapshot.and_then(|s| s.order_sys_id);
            let (Some(sys_id), Some(payload)) = (sys_id, svc.mapper.sub_order(&order_ref)) else {
                req.fail(
                    ErrorCode::BadRequest,
                    format!("sub-order {order_ref} has no exchange identity yet"),
                );
                continue;
            };
            let cancel = CancelDetail {
                action_ref: svc.refs.next_ref(),
                user_id: self.user.id.clone(),
                order_ref: order_ref.clone(),
                order_sys_id: sys_id,
                exchange_id: payload.exchange_id,
                instrument_id: payload.instrument_id,
            };
            let action_ref = cancel.action_ref.clone();
            match svc.sink.submit(self.key(req.id), SubOrder::Cancel(cancel)) {
                Ok(()) => {
                    req.attach(action_ref, None);
                    sent += 1;
                }
                Err(rej) => req.fail(rej.code(), format!("cancel of {order_ref} refused: {rej}")),
            }
        }

        if qualifying == 0 {
            req.reject(
                ErrorCode::InsuitableOrderStatus,
                format!("no sub-order of {target} can be canceled"),
            );
        } else if sent == 0 {
            let result = req.result().clone();
            req.reject(result.code, result.message);
        } else {
            req.advance(RequestStage::Dispatched);
        }
    }

    // ── Callbacks ──────────────────────────────────────────────────────

    /// Callbacks only mutate an active user, and only for requests of the
    /// current trading day.
    fn accepts_callbacks(&self, request_id: RequestId, what: &str) -> bool {
        if self.user.status() != UserStatus::Active {
            warn!(
                user_id = %self.user.id,
                request_id = %request_id,
                status = ?self.user.status(),
                "{what} ignored for inactive user"
            );
            return false;
        }
        true
    }

    fn halt(&mut self, err: &LedgerError, request_id: RequestId) {
        if let Some(req) = self.requests.get_mut(&request_id) {
            req.fail(ErrorCode::Inconsistent, err.to_string());
        }
        self.user.panic(err.to_string());
    }

    /// The exchange reported a sub-order canceled: release its reservation.
    pub(crate) fn on_canceled(&mut self, key: &RequestKey, order_ref: &OrderRef) {
        if !self.accepts_callbacks(key.request_id, "cancel") {
            return;
        }
        let Some(req) = self.requests.get(&key.request_id) else {
            if self.is_retired(key.request_id) {
                debug!(order_ref = %order_ref, "cancel for a retired request ignored");
                return;
            }
            self.user
                .panic(format!("canceled sub-order {order_ref} belongs to unknown {}", key.request_id));
            return;
        };
        if req.trading_day != self.user.trading_day {
            debug!(order_ref = %order_ref, "cancel for a previous trading day ignored");
            return;
        }
        let Some(handle) = req.reservation_for(order_ref) else {
            self.user
                .panic(format!("no reservation for canceled sub-order {order_ref}"));
            return;
        };
        let released = match handle {
            ReservationHandle::Cash(id) => self.user.ledger.cancel(id),
            ReservationHandle::Position(id) => self.user.positions.cancel(id),
        };
        match released {
            Ok(true) => debug!(user_id = %self.user.id, order_ref = %order_ref, "reservation released"),
            Ok(false) => debug!(user_id = %self.user.id, order_ref = %order_ref, "reservation already released"),
            Err(e) => self.halt(&e, key.request_id),
        }
    }

    /// The gateway refused an already-sent sub-order. Treated as a cancel.
    pub(crate) fn on_insert_rejected(&mut self, key: &RequestKey, order_ref: &OrderRef, message: &str) {
        if let Some(req) = self.requests.get_mut(&key.request_id) {
            req.fail(
                ErrorCode::GatewayRejected,
                format!("sub-order {order_ref} rejected: {message}"),
            );
        }
        self.on_canceled(key, order_ref);
    }

    pub(crate) fn on_cancel_rejected(&mut self, key: &RequestKey, action_ref: &OrderRef, message: &str) {
        if let Some(req) = self.requests.get_mut(&key.request_id) {
            req.fail(
                ErrorCode::GatewayRejected,
                format!("cancel {action_ref} rejected: {message}"),
            );
        }
    }

    /// Apply a fill to the reservation of its sub-order.
    pub(crate) fn on_trade(&mut self, key: &RequestKey, trade: &TradeReport) {
        if !self.accepts_callbacks(key.request_id, "trade") {
            return;
        }
        if self.is_retired(key.request_id) && !self.requests.contains_key(&key.request_id) {
            warn!(trade_id = %trade.trade_id, "trade for a retired request ignored");
            return;
        }
        let Some(req) = self.requests.get_mut(&key.request_id) else {
            self.user.panic(format!(
                "trade {} on {} belongs to unknown {}",
                trade.trade_id, trade.order_ref, key.request_id
            ));
            return;
        };
        if req.trading_day != self.user.trading_day {
            warn!(trade_id = %trade.trade_id, "trade for a previous trading day ignored");
            return;
        }
        if req.record_trade(trade.volume) {
            error!(
                user_id = %self.user.id,
                request_id = %req.id,
                requested = req.requested_volume(),
                traded = req.traded_volume(),
                trade_id = %trade.trade_id,
                "traded volume exceeds request"
            );
        }
        let Some(handle) = req.reservation_for(&trade.order_ref) else {
            let reason = format!("no reservation for traded sub-order {}", trade.order_ref);
            req.fail(ErrorCode::Inconsistent, reason.clone());
            self.user.panic(reason);
            return;
        };
        let instrument = req.instrument.clone();

        let applied = match handle {
            ReservationHandle::Cash(id) => match instrument {
                Some(inst) => self.user.ledger.consume(id, trade.volume).map(|fill| {
                    self.user.positions.open_lot(trade, &inst, fill.margin);
                }),
                None => {
                    self.user
                        .panic(format!("instrument missing on request {}", key.request_id));
                    return;
                }
            },
            ReservationHandle::Position(id) => self
                .user
                .positions
                .consume(id, trade.volume, trade.price)
                .map(|fill| self.user.ledger.apply_close(&fill)),
        };
        match applied {
            Ok(()) => debug!(
                user_id = %self.user.id,
                order_ref = %trade.order_ref,
                volume = trade.volume,
                price = trade.price,
                "trade applied"
            ),
            Err(e) => self.halt(&e, key.request_id),
        }
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub fn ledger_view(&self) -> LedgerView {
        let ledger = &self.user.ledger;
        LedgerView {
            user_id: self.user.id.clone(),
            trading_day: self.user.trading_day,
            status: self.user.status(),
            pre_balance: ledger.pre_balance(),
            balance: ledger.balance(),
            available: ledger.available(),
            frozen_cash: ledger.frozen_cash(),
            frozen_commission: ledger.frozen_commission(),
            curr_margin: ledger.curr_margin(),
            commission: ledger.commission(),
            close_profit: ledger.close_profit(),
        }
    }

    pub fn reservation_views(&self, request_id: RequestId) -> Option<Vec<ReservationView>> {
        let req = self.requests.get(&request_id)?;
        let views = req
            .reservations()
            .into_iter()
            .filter_map(|(order_ref, handle)| match handle {
                ReservationHandle::Cash(id) => {
                    self.user.ledger.reservation(id).map(|r| ReservationView {
                        order_ref,
                        reservation_id: id,
                        kind: ReservationKind::Cash,
                        volume: r.hold.volume,
                        traded: r.hold.traded,
                        remaining: r.remaining(),
                        stage: r.hold.stage,
                    })
                }
                ReservationHandle::Position(id) => {
                    self.user.positions.reservation(id).map(|r| ReservationView {
                        order_ref,
                        reservation_id: id,
                        kind: ReservationKind::Position {
                            close_today: r.close_today,
                        },
                        volume: r.hold.volume,
                        traded: r.hold.traded,
                        remaining: r.remaining(),
                        stage: r.hold.stage,
                    })
                }
            })
            .collect();
        Some(views)
    }
}
