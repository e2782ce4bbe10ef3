//! The single send flow.
//!
//! [`Dispatcher`] is the [`SubOrderSink`] the orchestrator submits into.
//! Admission registers the sub-order with the [`OrderMapper`] and queues it;
//! a dedicated OS thread drains the queue one item at a time:
//!
//! 1. trading-hour gate: outside the window the item goes to the back of the
//!    queue and the flow backs off;
//! 2. items that are already terminal (or cancels whose target is) are
//!    dropped;
//! 3. a reference already sent is a fatal send error answered with a
//!    synthetic rejection on the callback queue;
//! 4. inserts wait for the acknowledgement of the previous insert, bounded by
//!    `ack_timeout`; cancels skip this;
//! 5. sliding-window rate limit;
//! 6. send; a failed send goes back to the front of the queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;
use og_core::config::DispatchConfig;
use og_core::types::OrderRef;
use og_core::{ErrorCode, ReferenceData};
use og_oms::{DispatchReject, OrderMapper, RequestKey, SubOrder, SubOrderSink};
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ack::{AckGate, AckWait};
use crate::gateway::{GatewayChannel, GatewayEvent, GatewayPayload, GatewayRequest, RequestSeqs};
use crate::rate_limiter::SlidingWindowLimiter;
use crate::trading_hours::TradingHourGate;

/// Fault code carried by synthetic rejections.
pub const DUPLICATE_REF_FAULT: i32 = -1;

/// One queued item.
#[derive(Debug, Clone)]
pub struct Pending {
    pub key: RequestKey,
    pub order: SubOrder,
    pub attempts: u32,
}

/// Counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub send_failures: u64,
    pub not_tradable: u64,
    pub ack_timeouts: u64,
    pub duplicates: u64,
    pub dropped_terminal: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    send_failures: AtomicU64,
    not_tradable: AtomicU64,
    ack_timeouts: AtomicU64,
    duplicates: AtomicU64,
    dropped_terminal: AtomicU64,
}

pub struct Dispatcher {
    mapper: Arc<OrderMapper>,
    reference: Arc<dyn ReferenceData>,
    channel: Arc<dyn GatewayChannel>,
    seqs: Arc<RequestSeqs>,
    events: Sender<GatewayEvent>,
    hours: Arc<TradingHourGate>,
    limiter: SlidingWindowLimiter,
    ack: AckGate,
    queue: Mutex<VecDeque<Pending>>,
    ready: Condvar,
    sent_refs: Mutex<HashSet<OrderRef>>,
    front_active: AtomicBool,
    capacity: usize,
    ack_timeout: Duration,
    retry_backoff: Duration,
    not_tradable_backoff: Duration,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(
        config: &DispatchConfig,
        mapper: Arc<OrderMapper>,
        reference: Arc<dyn ReferenceData>,
        channel: Arc<dyn GatewayChannel>,
        seqs: Arc<RequestSeqs>,
        hours: Arc<TradingHourGate>,
        events: Sender<GatewayEvent>,
    ) -> Self {
        Self {
            mapper,
            reference,
            channel,
            seqs,
            events,
            hours,
            limiter: SlidingWindowLimiter::new(
                config.max_sends_per_second,
                Duration::from_millis(config.rate_window_ms),
            ),
            ack: AckGate::new(),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            sent_refs: Mutex::new(HashSet::new()),
            front_active: AtomicBool::new(false),
            capacity: config.queue_capacity,
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            not_tradable_backoff: Duration::from_millis(config.not_tradable_backoff_ms),
            counters: Counters::default(),
        }
    }

    /// Set by the session once the front is logged in and confirmed.
    pub fn set_front_active(&self, active: bool) {
        let was = self.front_active.swap(active, Ordering::SeqCst);
        if was != active {
            info!(active, "dispatch front state changed");
        }
    }

    pub fn is_front_active(&self) -> bool {
        self.front_active.load(Ordering::SeqCst)
    }

    /// The exchange (or gateway) answered for `order_ref`.
    pub fn acknowledge(&self, order_ref: &OrderRef) {
        if self.ack.acknowledge(order_ref) {
            debug!(order_ref = %order_ref, "insert acknowledged");
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            sent: c.sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            not_tradable: c.not_tradable.load(Ordering::Relaxed),
            ack_timeouts: c.ack_timeouts.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            dropped_terminal: c.dropped_terminal.load(Ordering::Relaxed),
        }
    }

    /// Start the send flow on its own OS thread.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || this.run(cancel))
    }

    /// Send loop. Returns when `cancel` fires.
    pub fn run(&self, cancel: CancellationToken) {
        info!("dispatcher started");
        while let Some(item) = self.next_item(&cancel) {
            self.process(item, &cancel);
        }
        self.ack.release();
        info!(stats = ?self.stats(), "dispatcher stopped");
    }

    /// Wake the send flow so it notices cancellation promptly.
    pub fn wake(&self) {
        self.ready.notify_all();
        self.ack.release();
    }

    fn next_item(&self, cancel: &CancellationToken) -> Option<Pending> {
        let mut queue = self.queue.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            self.ready.wait_for(&mut queue, Duration::from_millis(100));
        }
    }

    fn requeue_front(&self, item: Pending) {
        self.queue.lock().push_front(item);
        self.ready.notify_one();
    }

    fn requeue_back(&self, item: Pending) {
        self.queue.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Sleep up to `d`, returning early on cancellation.
    fn backoff(&self, d: Duration, cancel: &CancellationToken) {
        let mut queue = self.queue.lock();
        if !cancel.is_cancelled() {
            // any requeue or admission wakes us; that only shortens the wait
            self.ready.wait_for(&mut queue, d);
        }
    }

    fn is_stale(&self, order: &SubOrder) -> bool {
        match order {
            SubOrder::Insert(d) => self.mapper.is_terminal(&d.order_ref),
            SubOrder::Cancel(c) => self.mapper.is_terminal(&c.order_ref),
        }
    }

    fn process(&self, mut item: Pending, cancel: &CancellationToken) {
        let order_ref = item.order.order_ref().clone();

        let hours = self.reference.trading_hours(item.order.instrument_id());
        let now = chrono::Local::now().naive_local();
        if !self
            .hours
            .is_tradable(item.order.exchange_id(), hours.as_ref(), now)
        {
            self.counters.not_tradable.fetch_add(1, Ordering::Relaxed);
            debug!(
                order_ref = %order_ref,
                instrument_id = %item.order.instrument_id(),
                code = %ErrorCode::NotTradable,
                "outside trading hours, requeued"
            );
            self.requeue_back(item);
            self.backoff(self.not_tradable_backoff, cancel);
            return;
        }

        if self.is_stale(&item.order) {
            self.counters.dropped_terminal.fetch_add(1, Ordering::Relaxed);
            debug!(order_ref = %order_ref, "target already terminal, dropped");
            return;
        }

        if !self.sent_refs.lock().insert(order_ref.clone()) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            error!(order_ref = %order_ref, "reference already sent, rejecting");
            self.reject_duplicate(&item.order);
            return;
        }

        if item.order.is_insert() {
            match self.ack.wait(self.ack_timeout) {
                AckWait::Clear | AckWait::Acknowledged => {}
                AckWait::TimedOut(previous) => {
                    self.counters.ack_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        previous = %previous,
                        next = %order_ref,
                        timeout_ms = self.ack_timeout.as_millis() as u64,
                        "no acknowledgement, sending anyway"
                    );
                }
            }
        }

        if !self.limiter.acquire(cancel) {
            self.sent_refs.lock().remove(&order_ref);
            self.requeue_front(item);
            return;
        }

        let seq = self.seqs.next();
        let request = match &item.order {
            SubOrder::Insert(d) => GatewayRequest::InsertOrder(d.clone()),
            SubOrder::Cancel(c) => GatewayRequest::CancelOrder(c.clone()),
        };
        // armed before sending so a fast acknowledgement is not lost
        if item.order.is_insert() {
            self.ack.arm(order_ref.clone());
        }
        match self.channel.send(seq, request) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    seq = %seq,
                    order_ref = %order_ref,
                    user_id = %item.key.user_id,
                    request_id = %item.key.request_id,
                    insert = item.order.is_insert(),
                    window_usage = self.limiter.usage_percent(),
                    "sub-order sent"
                );
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                if item.order.is_insert() {
                    self.ack.acknowledge(&order_ref);
                }
                self.sent_refs.lock().remove(&order_ref);
                item.attempts += 1;
                warn!(
                    order_ref = %order_ref,
                    attempts = item.attempts,
                    error = %e,
                    "send failed, requeued at front"
                );
                self.requeue_front(item);
                self.backoff(self.retry_backoff, cancel);
            }
        }
    }

    fn reject_duplicate(&self, order: &SubOrder) {
        let payload = match order {
            SubOrder::Insert(d) => GatewayPayload::InsertRejected {
                order_ref: d.order_ref.clone(),
            },
            SubOrder::Cancel(c) => GatewayPayload::CancelRejected {
                action_ref: c.action_ref.clone(),
            },
        };
        let event = GatewayEvent::unsolicited(payload)
            .with_fault(DUPLICATE_REF_FAULT, "duplicate order reference");
        if self.events.send(event).is_err() {
            warn!("callback queue closed, synthetic rejection lost");
        }
    }

    #[cfg(test)]
    fn enqueue_unchecked(&self, item: Pending) {
        self.requeue_back(item);
    }
}

impl SubOrderSink for Dispatcher {
    fn submit(&self, key: RequestKey, order: SubOrder) -> Result<(), DispatchReject> {
        if !self.is_front_active() {
            return Err(DispatchReject::FrontNotActive);
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            warn!(capacity = self.capacity, "dispatch queue full");
            return Err(DispatchReject::NeedRetry);
        }
        let fresh = match &order {
            SubOrder::Insert(d) => self.mapper.register_sub_order(&key, d),
            SubOrder::Cancel(c) => self.mapper.register_action(&key, c),
        };
        if !fresh {
            return Err(DispatchReject::DuplicateOrderRef(order.order_ref().clone()));
        }
        queue.push_back(Pending {
            key,
            order,
            attempts: 0,
        });
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    fn retire(&self, refs: &[OrderRef]) {
        let mut sent = self.sent_refs.lock();
        for order_ref in refs {
            sent.remove(order_ref);
        }
    }
}
