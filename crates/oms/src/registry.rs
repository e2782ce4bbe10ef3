//! The explicit user registry.
//!
//! Constructed once at start-up and shared by reference with the client API,
//! the callback flow and the settlement job. Each user is locked on its own;
//! no operation ever holds two user locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use og_core::types::{
    CancelInstruction, InstrumentId, OrderInstruction, OrderRef, OrderSnapshot, OrderStatus,
    RequestId, TradeReport, UserId,
};
use og_core::{ErrorCode, ExecutionResult, ReferenceData};
use og_ledger::{
    LedgerError, PositionLot, SettlementInput, SettlementInputs, SettlementReport, User,
    UserStatus,
};
use tracing::{debug, error, info, warn};

use crate::dedup::{OrderRefGenerator, TradeDeduplicator};
use crate::error::RequestError;
use crate::mapper::{OrderMapper, RequestKey};
use crate::sink::SubOrderSink;
use crate::store::PersistenceProvider;
use crate::user::ActiveUser;
use crate::view::{LedgerView, ReservationView};

/// Collaborators shared by every user.
#[derive(Clone)]
pub struct Services {
    pub reference: Arc<dyn ReferenceData>,
    pub mapper: Arc<OrderMapper>,
    pub sink: Arc<dyn SubOrderSink>,
    pub refs: Arc<OrderRefGenerator>,
    pub store: Arc<dyn PersistenceProvider>,
}

/// Per-user result of [`UserRegistry::settle_all`].
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettlementReport),
    /// Panicked users are left untouched for an operator.
    SkippedPanicked(String),
    Failed(String),
}

pub struct UserRegistry {
    users: DashMap<UserId, Arc<ActiveUser>>,
    request_owner: DashMap<RequestId, UserId>,
    /// Results of instructions naming no registered user.
    unowned: DashMap<RequestId, ExecutionResult>,
    next_request: AtomicU64,
    trades: TradeDeduplicator,
    svc: Services,
}

impl UserRegistry {
    pub fn new(svc: Services) -> Self {
        Self {
            users: DashMap::new(),
            request_owner: DashMap::new(),
            unowned: DashMap::new(),
            next_request: AtomicU64::new(1),
            trades: TradeDeduplicator::new(),
            svc,
        }
    }

    pub fn services(&self) -> &Services {
        &self.svc
    }

    pub fn add_user(&self, user: User) -> Result<(), RequestError> {
        let id = user.id.clone();
        match self.users.entry(id.clone()) {
            Entry::Occupied(_) => Err(RequestError::DuplicateUser(id)),
            Entry::Vacant(v) => {
                info!(user_id = %id, trading_day = %user.trading_day, "user registered");
                v.insert(Arc::new(ActiveUser::new(user)));
                Ok(())
            }
        }
    }

    /// Register `user_id` from its latest persisted snapshot, or with
    /// `opening_balance` if none exists.
    pub fn load_user(
        &self,
        user_id: UserId,
        trading_day: NaiveDate,
        opening_balance: f64,
    ) -> Result<()> {
        let snapshot = self
            .svc
            .store
            .load(&user_id)
            .with_context(|| format!("failed to load snapshot of {user_id}"))?;
        let user = match snapshot {
            Some(s) => {
                info!(
                    user_id = %user_id,
                    from = %s.trading_day,
                    lots = s.lots.len(),
                    "restoring user snapshot"
                );
                User::from_snapshot(s, trading_day)
            }
            None => User::new(user_id, trading_day, opening_balance),
        };
        self.add_user(user)?;
        Ok(())
    }

    /// Registered user ids, sorted.
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn user(&self, user_id: &UserId) -> Option<Arc<ActiveUser>> {
        self.users.get(user_id).map(|u| Arc::clone(u.value()))
    }

    fn owner_of(&self, request_id: RequestId) -> Option<Arc<ActiveUser>> {
        let owner = self.request_owner.get(&request_id)?.clone();
        self.user(&owner)
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    // ── Client API ─────────────────────────────────────────────────────

    /// Every instruction gets an id; one naming an unknown user is refused
    /// on the spot with `UserNotActive`.
    fn refuse_unknown(&self, user_id: &UserId) -> RequestId {
        let id = self.next_request_id();
        warn!(user_id = %user_id, request_id = %id, "instruction for unknown user refused");
        self.unowned.insert(
            id,
            ExecutionResult::error(ErrorCode::UserNotActive, format!("unknown user {user_id}")),
        );
        id
    }

    /// Admit an insert. The outcome is read back with
    /// [`execution_result`](Self::execution_result).
    pub fn insert_order(&self, order: OrderInstruction) -> RequestId {
        let Some(user) = self.user(&order.user_id) else {
            return self.refuse_unknown(&order.user_id);
        };
        let id = self.next_request_id();
        self.request_owner.insert(id, order.user_id.clone());
        user.lock().insert(id, order, &self.svc);
        id
    }

    /// Admit a cancel of everything `target` spawned.
    pub fn cancel_order(&self, cancel: CancelInstruction) -> RequestId {
        let Some(user) = self.user(&cancel.user_id) else {
            return self.refuse_unknown(&cancel.user_id);
        };
        let id = self.next_request_id();
        self.request_owner.insert(id, cancel.user_id.clone());
        user.lock().cancel(id, cancel.target, &self.svc);
        id
    }

    pub fn execution_result(&self, request_id: RequestId) -> Option<ExecutionResult> {
        if let Some(result) = self.unowned.get(&request_id) {
            return Some(result.clone());
        }
        let user = self.owner_of(request_id)?;
        let state = user.lock();
        state.request(request_id).map(|r| r.result().clone())
    }

    pub fn reservations(&self, request_id: RequestId) -> Option<Vec<ReservationView>> {
        let user = self.owner_of(request_id)?;
        let state = user.lock();
        state.reservation_views(request_id)
    }

    pub fn ledger(&self, user_id: &UserId) -> Option<LedgerView> {
        Some(self.user(user_id)?.lock().ledger_view())
    }

    pub fn positions(
        &self,
        user_id: &UserId,
        instrument_id: Option<&InstrumentId>,
    ) -> Option<Vec<PositionLot>> {
        Some(self.user(user_id)?.lock().user.positions.lots(instrument_id))
    }

    /// Requests issued by `user_id`, in issue order.
    pub fn requests(&self, user_id: &UserId) -> Vec<RequestId> {
        self.user(user_id)
            .map(|u| u.lock().request_ids())
            .unwrap_or_default()
    }

    pub fn user_status(&self, user_id: &UserId) -> Option<UserStatus> {
        Some(self.user(user_id)?.lock().user.status())
    }

    pub fn deposit(&self, user_id: &UserId, amount: f64) -> Result<(), RequestError> {
        let user = self
            .user(user_id)
            .ok_or_else(|| RequestError::UnknownUser(user_id.clone()))?;
        let mut state = user.lock();
        state.user.ensure_active()?;
        state.user.ledger.deposit(amount)?;
        info!(user_id = %user_id, amount, "deposit");
        Ok(())
    }

    pub fn withdraw(&self, user_id: &UserId, amount: f64) -> Result<(), RequestError> {
        let user = self
            .user(user_id)
            .ok_or_else(|| RequestError::UnknownUser(user_id.clone()))?;
        let mut state = user.lock();
        state.user.ensure_active()?;
        state.user.ledger.withdraw(amount)?;
        info!(user_id = %user_id, amount, "withdraw");
        Ok(())
    }

    /// Operator intervention: clear a user's panic latch.
    pub fn reset_panic(&self, user_id: &UserId) -> Result<bool, RequestError> {
        let user = self
            .user(user_id)
            .ok_or_else(|| RequestError::UnknownUser(user_id.clone()))?;
        let reset = user.lock().user.reset_panic();
        Ok(reset)
    }

    // ── Callbacks ──────────────────────────────────────────────────────

    fn owner_of_ref(&self, order_ref: &OrderRef) -> Option<(RequestKey, Arc<ActiveUser>)> {
        let Some(key) = self.svc.mapper.resolve_request(order_ref) else {
            warn!(order_ref = %order_ref, "callback for unknown sub-order");
            return None;
        };
        let Some(user) = self.user(&key.user_id) else {
            warn!(order_ref = %order_ref, user_id = %key.user_id, "callback for unknown user");
            return None;
        };
        Some((key, user))
    }

    /// Order status report. Only `Canceled` touches the ledger.
    pub fn on_order(&self, snapshot: OrderSnapshot) {
        let order_ref = snapshot.order_ref.clone();
        let canceled = snapshot.status == OrderStatus::Canceled;
        debug!(order_ref = %order_ref, status = ?snapshot.status, "order report");
        self.svc.mapper.register_snapshot(snapshot);
        if !canceled {
            return;
        }
        if let Some((key, user)) = self.owner_of_ref(&order_ref) {
            user.lock().on_canceled(&key, &order_ref);
        }
    }

    /// The gateway refused a sub-order outright. Recorded as a canceled
    /// snapshot so the mapper sees it as terminal.
    pub fn on_insert_rejected(&self, order_ref: &OrderRef, message: &str) {
        warn!(order_ref = %order_ref, message, "sub-order rejected by gateway");
        if let Some(payload) = self.svc.mapper.sub_order(order_ref) {
            self.svc.mapper.register_snapshot(OrderSnapshot {
                order_ref: order_ref.clone(),
                order_sys_id: None,
                exchange_id: payload.exchange_id,
                instrument_id: payload.instrument_id,
                side: payload.side,
                offset: payload.offset,
                price: payload.price,
                volume_total_original: payload.volume,
                volume_traded: 0,
                status: OrderStatus::Canceled,
                status_message: message.to_string(),
            });
        }
        if let Some((key, user)) = self.owner_of_ref(order_ref) {
            user.lock().on_insert_rejected(&key, order_ref, message);
        }
    }

    pub fn on_cancel_rejected(&self, action_ref: &OrderRef, message: &str) {
        let Some(action) = self.svc.mapper.resolve_action(action_ref) else {
            warn!(action_ref = %action_ref, "rejection of unknown cancel action");
            return;
        };
        warn!(action_ref = %action_ref, target = %action.target, message, "cancel rejected by gateway");
        if let Some(user) = self.user(&action.key.user_id) {
            user.lock().on_cancel_rejected(&action.key, action_ref, message);
        }
    }

    /// Trade report. Replayed trade ids are dropped.
    pub fn on_trade(&self, trade: &TradeReport) {
        if !self.trades.first_seen(trade) {
            debug!(trade_id = %trade.trade_id, exchange_id = %trade.exchange_id, "duplicate trade dropped");
            return;
        }
        if let Some((key, user)) = self.owner_of_ref(&trade.order_ref) {
            user.lock().on_trade(&key, trade);
        }
    }

    // ── End of day ─────────────────────────────────────────────────────

    fn settlement_inputs(
        &self,
        instruments: impl IntoIterator<Item = InstrumentId>,
        trading_day: NaiveDate,
    ) -> SettlementInputs {
        let reference = self.svc.reference.as_ref();
        let mut inputs = HashMap::new();
        for id in instruments {
            let Some(info) = reference.instrument_info(&id) else {
                continue;
            };
            let Some(margin_rate) = info.margin_rate else {
                continue;
            };
            let Some(price) = reference.settlement_price(&id, trading_day) else {
                continue;
            };
            inputs.insert(
                id,
                SettlementInput {
                    instrument: info.instrument,
                    margin_rate,
                    settlement_price: price,
                },
            );
        }
        inputs
    }

    /// Settle every user in id order and persist the settled snapshots.
    pub fn settle_all(&self) -> Vec<(UserId, SettlementOutcome)> {
        let mut outcomes = Vec::new();
        for user_id in self.user_ids() {
            let Some(user) = self.user(&user_id) else {
                continue;
            };
            let mut state = user.lock();
            if state.user.status() == UserStatus::Panicked {
                let reason = state.user.panic_reason().unwrap_or_default().to_string();
                warn!(user_id = %user_id, reason = %reason, "panicked user skipped at settlement");
                outcomes.push((user_id, SettlementOutcome::SkippedPanicked(reason)));
                continue;
            }
            let instruments: Vec<InstrumentId> = state
                .user
                .positions
                .lots(None)
                .into_iter()
                .map(|l| l.instrument_id)
                .collect();
            let inputs = self.settlement_inputs(instruments, state.user.trading_day);
            let outcome = match state.user.settle(&inputs) {
                Ok(report) => {
                    if let Err(e) = self.svc.store.save(&state.user.snapshot()) {
                        error!(user_id = %user_id, error = %e, "failed to persist settled snapshot");
                    }
                    SettlementOutcome::Settled(report)
                }
                Err(e @ LedgerError::MissingSettlementInput { .. }) => {
                    warn!(user_id = %user_id, error = %e, "settlement postponed");
                    SettlementOutcome::Failed(e.to_string())
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "settlement failed");
                    SettlementOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((user_id, outcome));
        }
        outcomes
    }

    /// Move every settled user into `trading_day` and drop what earlier days
    /// left behind: their requests, mapper entries, trade ids and refused
    /// instructions. Returns how many users moved.
    pub fn renew_all(&self, trading_day: NaiveDate) -> usize {
        let mut renewed = 0;
        for user_id in self.user_ids() {
            let Some(user) = self.user(&user_id) else {
                continue;
            };
            let mut state = user.lock();
            if let Err(e) = state.user.renew(trading_day) {
                warn!(user_id = %user_id, error = %e, "user not renewed");
                continue;
            }
            renewed += 1;
            let (requests, refs) = state.retire_before(trading_day, &self.svc.mapper);
            drop(state);

            for id in &requests {
                self.request_owner.remove(id);
            }
            self.svc.sink.retire(&refs);
            debug!(
                user_id = %user_id,
                requests = requests.len(),
                refs = refs.len(),
                "previous trading days retired"
            );
        }
        self.unowned.clear();
        let trade_ids = self.trades.prune_before(trading_day);
        info!(
            trading_day = %trading_day,
            renewed,
            mapped = self.svc.mapper.len(),
            trade_ids,
            "users renewed"
        );
        renewed
    }
}
