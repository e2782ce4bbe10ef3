//! Index between client requests and the exchange-facing sub-orders they
//! spawned.
//!
//! Pure bookkeeping, no business rules. The dispatcher registers sub-orders
//! when it admits them and the callback path registers exchange snapshots;
//! everyone else only reads.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use og_core::types::{CancelDetail, DetailOrder, OrderRef, OrderSnapshot, RequestId, UserId};

/// Owner of a sub-order: the user and the request that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub user_id: UserId,
    pub request_id: RequestId,
}

impl RequestKey {
    pub fn new(user_id: UserId, request_id: RequestId) -> Self {
        Self {
            user_id,
            request_id,
        }
    }
}

/// A registered cancel action and the sub-order it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    pub key: RequestKey,
    pub target: OrderRef,
}

/// Concurrent request ↔ sub-order ↔ exchange-state index.
#[derive(Default)]
pub struct OrderMapper {
    by_ref: DashMap<OrderRef, RequestKey>,
    by_request: DashMap<RequestId, Vec<OrderRef>>,
    payloads: DashMap<OrderRef, DetailOrder>,
    snapshots: DashMap<OrderRef, OrderSnapshot>,
    actions: DashMap<OrderRef, ActionEntry>,
}

impl OrderMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `order_ref` is already taken by a sub-order or a
    /// cancel action.
    pub fn contains(&self, order_ref: &OrderRef) -> bool {
        self.by_ref.contains_key(order_ref) || self.actions.contains_key(order_ref)
    }

    /// Register an insert sub-order. Returns `false`, and changes nothing, if
    /// the reference is already taken.
    pub fn register_sub_order(&self, key: &RequestKey, order: &DetailOrder) -> bool {
        if self.actions.contains_key(&order.order_ref) {
            return false;
        }
        match self.by_ref.entry(order.order_ref.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
                self.payloads.insert(order.order_ref.clone(), order.clone());
                self.by_request
                    .entry(key.request_id)
                    .or_default()
                    .push(order.order_ref.clone());
                true
            }
        }
    }

    /// Register a cancel action. Same uniqueness rule as sub-orders.
    pub fn register_action(&self, key: &RequestKey, cancel: &CancelDetail) -> bool {
        if self.by_ref.contains_key(&cancel.action_ref) {
            return false;
        }
        match self.actions.entry(cancel.action_ref.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActionEntry {
                    key: key.clone(),
                    target: cancel.order_ref.clone(),
                });
                self.by_request
                    .entry(key.request_id)
                    .or_default()
                    .push(cancel.action_ref.clone());
                true
            }
        }
    }

    /// Store the latest exchange state of a sub-order.
    pub fn register_snapshot(&self, snapshot: OrderSnapshot) {
        self.snapshots.insert(snapshot.order_ref.clone(), snapshot);
    }

    /// References registered for a request, in registration order.
    pub fn resolve_refs(&self, request_id: RequestId) -> Vec<OrderRef> {
        self.by_request
            .get(&request_id)
            .map(|refs| refs.clone())
            .unwrap_or_default()
    }

    pub fn resolve_request(&self, order_ref: &OrderRef) -> Option<RequestKey> {
        self.by_ref.get(order_ref).map(|k| k.clone())
    }

    pub fn resolve_action(&self, action_ref: &OrderRef) -> Option<ActionEntry> {
        self.actions.get(action_ref).map(|a| a.clone())
    }

    pub fn last_snapshot(&self, order_ref: &OrderRef) -> Option<OrderSnapshot> {
        self.snapshots.get(order_ref).map(|s| s.clone())
    }

    /// Payload of an insert sub-order as admitted.
    pub fn sub_order(&self, order_ref: &OrderRef) -> Option<DetailOrder> {
        self.payloads.get(order_ref).map(|p| p.clone())
    }

    /// Returns `true` if the last known status is AllTraded or Canceled.
    pub fn is_terminal(&self, order_ref: &OrderRef) -> bool {
        self.snapshots
            .get(order_ref)
            .map(|s| s.status.is_terminal())
            .unwrap_or(false)
    }

    /// Drop a request and every sub-order and cancel action it registered.
    /// Returns the references that were forgotten.
    pub fn forget_request(&self, request_id: RequestId) -> Vec<OrderRef> {
        let Some((_, refs)) = self.by_request.remove(&request_id) else {
            return Vec::new();
        };
        for order_ref in &refs {
            self.by_ref.remove(order_ref);
            self.payloads.remove(order_ref);
            self.snapshots.remove(order_ref);
            self.actions.remove(order_ref);
        }
        refs
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use og_core::types::{ExchangeId, InstrumentId, Offset, OrderStatus, OrderSysId, Side};
    use std::sync::Arc;
    use std::thread;

    fn key(req: u64) -> RequestKey {
        RequestKey::new(UserId::new("u1"), RequestId(req))
    }

    fn detail(r: &str) -> DetailOrder {
        DetailOrder {
            order_ref: OrderRef::new(r),
            user_id: UserId::new("u1"),
            instrument_id: InstrumentId::new("rb2405"),
            exchange_id: ExchangeId::new("SHFE"),
            side: Side::Buy,
            offset: Offset::Open,
            price: 100.0,
            volume: 1,
        }
    }

    fn snapshot(r: &str, status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_ref: OrderRef::new(r),
            order_sys_id: Some(OrderSysId::new("  42")),
            exchange_id: ExchangeId::new("SHFE"),
            instrument_id: InstrumentId::new("rb2405"),
            side: Side::Buy,
            offset: Offset::Open,
            price: 100.0,
            volume_total_original: 1,
            volume_traded: 0,
            status,
            status_message: String::new(),
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mapper = OrderMapper::new();
        assert!(mapper.register_sub_order(&key(1), &detail("a")));
        assert!(mapper.register_sub_order(&key(1), &detail("b")));
        assert_eq!(
            mapper.resolve_refs(RequestId(1)),
            vec![OrderRef::new("a"), OrderRef::new("b")]
        );
        assert_eq!(mapper.resolve_request(&OrderRef::new("b")), Some(key(1)));
        assert_eq!(mapper.sub_order(&OrderRef::new("a")), Some(detail("a")));
        assert!(mapper.last_snapshot(&OrderRef::new("a")).is_none());
    }

    #[test]
    fn test_duplicate_ref_leaves_index_untouched() {
        let mapper = OrderMapper::new();
        assert!(mapper.register_sub_order(&key(1), &detail("a")));
        let mut other = detail("a");
        other.volume = 9;
        assert!(!mapper.register_sub_order(&key(2), &other));
        assert_eq!(mapper.resolve_request(&OrderRef::new("a")), Some(key(1)));
        assert_eq!(mapper.sub_order(&OrderRef::new("a")).unwrap().volume, 1);
        assert!(mapper.resolve_refs(RequestId(2)).is_empty());
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_action_refs_share_namespace() {
        let mapper = OrderMapper::new();
        assert!(mapper.register_sub_order(&key(1), &detail("a")));
        let cancel = CancelDetail {
            action_ref: OrderRef::new("a"),
            user_id: UserId::new("u1"),
            order_ref: OrderRef::new("a"),
            order_sys_id: OrderSysId::new("  42"),
            exchange_id: ExchangeId::new("SHFE"),
            instrument_id: InstrumentId::new("rb2405"),
        };
        assert!(!mapper.register_action(&key(2), &cancel));
        let cancel = CancelDetail {
            action_ref: OrderRef::new("c"),
            ..cancel
        };
        assert!(mapper.register_action(&key(2), &cancel));
        assert!(!mapper.register_sub_order(&key(3), &detail("c")));
        let entry = mapper.resolve_action(&OrderRef::new("c")).unwrap();
        assert_eq!(entry.target, OrderRef::new("a"));
        assert_eq!(entry.key, key(2));
    }

    #[test]
    fn test_snapshot_and_terminal() {
        let mapper = OrderMapper::new();
        mapper.register_sub_order(&key(1), &detail("a"));
        mapper.register_snapshot(snapshot("a", OrderStatus::NoTradeQueueing));
        assert!(!mapper.is_terminal(&OrderRef::new("a")));
        assert_eq!(
            mapper.last_snapshot(&OrderRef::new("a")).unwrap().order_sys_id,
            Some(OrderSysId::new("  42"))
        );
        mapper.register_snapshot(snapshot("a", OrderStatus::Canceled));
        assert!(mapper.is_terminal(&OrderRef::new("a")));
    }

    #[test]
    fn test_forget_request_clears_every_index() {
        let mapper = OrderMapper::new();
        mapper.register_sub_order(&key(1), &detail("a"));
        mapper.register_snapshot(snapshot("a", OrderStatus::AllTraded));
        let cancel = CancelDetail {
            action_ref: OrderRef::new("c"),
            user_id: UserId::new("u1"),
            order_ref: OrderRef::new("a"),
            order_sys_id: OrderSysId::new("  42"),
            exchange_id: ExchangeId::new("SHFE"),
            instrument_id: InstrumentId::new("rb2405"),
        };
        mapper.register_action(&key(2), &cancel);
        mapper.register_sub_order(&key(3), &detail("b"));

        assert_eq!(mapper.forget_request(RequestId(1)), vec![OrderRef::new("a")]);
        assert_eq!(mapper.forget_request(RequestId(2)), vec![OrderRef::new("c")]);
        assert!(mapper.forget_request(RequestId(1)).is_empty());
        assert!(mapper.resolve_request(&OrderRef::new("a")).is_none());
        assert!(mapper.last_snapshot(&OrderRef::new("a")).is_none());
        assert!(mapper.sub_order(&OrderRef::new("a")).is_none());
        assert!(mapper.resolve_action(&OrderRef::new("c")).is_none());
        assert!(!mapper.contains(&OrderRef::new("c")));
        // unrelated requests are untouched
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.forget_request(RequestId(3)), vec![OrderRef::new("b")]);
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_concurrent_registration_one_winner() {
        let mapper = Arc::new(OrderMapper::new());
        let mut handles = vec![];
        for t in 0..8u64 {
            let mapper = mapper.clone();
            handles.push(thread::spawn(move || {
                mapper.register_sub_order(&key(t), &detail("same"))
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(mapper.len(), 1);
    }
}
