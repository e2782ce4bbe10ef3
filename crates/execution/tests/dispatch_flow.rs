//! Dispatcher timing and admission against an acknowledging gateway double.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use og_core::config::DispatchConfig;
use og_core::types::{
    CancelDetail, DetailOrder, ExchangeId, InstrumentId, Offset, OrderRef, OrderSysId, RequestId,
    Side, UserId,
};
use og_core::ReferenceStore;
use og_execution::{
    Dispatcher, GatewayChannel, GatewayError, GatewayEvent, GatewayRequest, RequestSeq,
    RequestSeqs, TradingHourGate,
};
use og_oms::{DispatchReject, OrderMapper, RequestKey, SubOrder, SubOrderSink};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Records each send with its instant and forwards insert refs to `acks`.
struct TimedChannel {
    sends: Mutex<Vec<(Instant, GatewayRequest)>>,
    acks: Sender<OrderRef>,
}

impl GatewayChannel for TimedChannel {
    fn send(&self, _seq: RequestSeq, request: GatewayRequest) -> Result<(), GatewayError> {
        if let GatewayRequest::InsertOrder(d) = &request {
            let _ = self.acks.send(d.order_ref.clone());
        }
        self.sends.lock().push((Instant::now(), request));
        Ok(())
    }
}

struct Rig {
    dispatcher: Arc<Dispatcher>,
    channel: Arc<TimedChannel>,
    mapper: Arc<OrderMapper>,
    acks: Receiver<OrderRef>,
    _events: Receiver<GatewayEvent>,
}

fn rig(config: DispatchConfig) -> Rig {
    let (ack_tx, ack_rx) = unbounded();
    let (ev_tx, ev_rx) = unbounded();
    let channel = Arc::new(TimedChannel {
        sends: Mutex::new(Vec::new()),
        acks: ack_tx,
    });
    let mapper = Arc::new(OrderMapper::new());
    let dispatcher = Arc::new(Dispatcher::new(
        &config,
        mapper.clone(),
        Arc::new(ReferenceStore::new()),
        channel.clone(),
        Arc::new(RequestSeqs::new()),
        Arc::new(TradingHourGate::new()),
        ev_tx,
    ));
    dispatcher.set_front_active(true);
    Rig {
        dispatcher,
        channel,
        mapper,
        acks: ack_rx,
        _events: ev_rx,
    }
}

fn key(n: u64) -> RequestKey {
    RequestKey::new(UserId::new("u1"), RequestId(n))
}

fn insert(r: &str) -> SubOrder {
    SubOrder::Insert(DetailOrder {
        order_ref: OrderRef::new(r),
        user_id: UserId::new("u1"),
        instrument_id: InstrumentId::new("rb2405"),
        exchange_id: ExchangeId::new("SHFE"),
        side: Side::Buy,
        offset: Offset::Open,
        price: 100.0,
        volume: 1,
    })
}

fn cancel(action: &str, target: &str) -> SubOrder {
    SubOrder::Cancel(CancelDetail {
        action_ref: OrderRef::new(action),
        user_id: UserId::new("u1"),
        order_ref: OrderRef::new(target),
        order_sys_id: OrderSysId::new("S1"),
        exchange_id: ExchangeId::new("SHFE"),
        instrument_id: InstrumentId::new("rb2405"),
    })
}

fn wait_for_sends(channel: &TimedChannel, n: usize, limit: Duration) {
    let deadline = Instant::now() + limit;
    while channel.sends.lock().len() < n && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_rate_limit_five_per_second() {
    let r = rig(DispatchConfig::default());
    let cancel_token = CancellationToken::new();
    let handle = r.dispatcher.spawn(cancel_token.clone()).unwrap();

    // exchange acknowledges every insert right away
    let acker = {
        let dispatcher = r.dispatcher.clone();
        let acks = r.acks.clone();
        let done = cancel_token.clone();
        thread::spawn(move || loop {
            match acks.recv_timeout(Duration::from_millis(20)) {
                Ok(order_ref) => dispatcher.acknowledge(&order_ref),
                Err(RecvTimeoutError::Timeout) if !done.is_cancelled() => {}
                Err(_) => break,
            }
        })
    };

    for i in 0..8 {
        r.dispatcher
            .submit(key(i), insert(&format!("{:012}", i + 1)))
            .unwrap();
    }
    wait_for_sends(&r.channel, 8, Duration::from_secs(10));
    cancel_token.cancel();
    r.dispatcher.wake();
    handle.join().unwrap();

    let sends = r.channel.sends.lock();
    assert_eq!(sends.len(), 8);
    let first = sends[0].0;
    let last = sends[7].0;
    assert!(last - first > Duration::from_secs(1), "took {:?}", last - first);

    // send instants trail the limiter's admission by a hair
    for i in 0..sends.len() - 5 {
        let gap = sends[i + 5].0 - sends[i].0;
        assert!(gap >= Duration::from_millis(990), "6 sends inside {:?}", gap);
    }
    drop(sends);
    acker.join().unwrap();
}

#[test]
fn test_duplicate_ref_rejected_without_touching_mapper() {
    let r = rig(DispatchConfig::default());
    let first = insert("000000000001");
    r.dispatcher.submit(key(1), first.clone()).unwrap();

    let mut second = insert("000000000001");
    if let SubOrder::Insert(d) = &mut second {
        d.price = 250.0;
        d.volume = 7;
    }
    assert_eq!(
        r.dispatcher.submit(key(2), second),
        Err(DispatchReject::DuplicateOrderRef(OrderRef::new("000000000001")))
    );

    let order_ref = OrderRef::new("000000000001");
    assert_eq!(r.mapper.resolve_request(&order_ref), Some(key(1)));
    assert_eq!(r.mapper.resolve_refs(RequestId(1)), vec![order_ref.clone()]);
    assert!(r.mapper.resolve_refs(RequestId(2)).is_empty());
    let SubOrder::Insert(expected) = first else { unreachable!() };
    assert_eq!(r.mapper.sub_order(&order_ref), Some(expected));
    assert_eq!(r.dispatcher.queue_len(), 1);
}

#[test]
fn test_cancel_skips_ack_wait_but_insert_does_not() {
    let r = rig(DispatchConfig {
        ack_timeout_ms: 400,
        ..Default::default()
    });
    r.dispatcher.submit(key(1), insert("1")).unwrap();
    r.dispatcher.submit(key(2), cancel("2", "1")).unwrap();
    r.dispatcher.submit(key(3), insert("3")).unwrap();

    let cancel_token = CancellationToken::new();
    let handle = r.dispatcher.spawn(cancel_token.clone()).unwrap();
    // nobody acknowledges
    wait_for_sends(&r.channel, 3, Duration::from_secs(5));
    cancel_token.cancel();
    r.dispatcher.wake();
    handle.join().unwrap();

    let sends = r.channel.sends.lock();
    assert_eq!(sends.len(), 3);
    assert!(matches!(sends[1].1, GatewayRequest::CancelOrder(_)));
    assert!(sends[1].0 - sends[0].0 < Duration::from_millis(200));
    assert!(sends[2].0 - sends[0].0 >= Duration::from_millis(390));
    assert_eq!(r.dispatcher.stats().ack_timeouts, 1);
}

#[test]
fn test_inactive_front_refuses() {
    let r = rig(DispatchConfig::default());
    r.dispatcher.set_front_active(false);
    assert_eq!(
        r.dispatcher.submit(key(1), insert("1")),
        Err(DispatchReject::FrontNotActive)
    );
    assert!(r.mapper.is_empty());
}
