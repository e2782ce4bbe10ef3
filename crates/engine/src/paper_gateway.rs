//! Paper gateway: a simulated exchange front behind [`GatewayChannel`].
//!
//! Answers the login sequence and reference queries from the configured
//! catalogue, acknowledges inserts with a generated `OrderSysID`, optionally
//! fills them in full at the limit price, and cancels resting orders. Every
//! answer goes out on the same ordered callback queue a native transport
//! would feed.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{Local, NaiveDate};
use crossbeam::channel::Sender;
use parking_lot::Mutex;

use og_core::config::{PaperConfig, PaperInstrument};
use og_core::types::{
    CancelDetail, DetailOrder, ExchangeId, InstrumentId, MarketSnapshot, OrderRef, OrderSnapshot,
    OrderSysId, OrderStatus, TradeReport,
};
use og_execution::{
    GatewayChannel, GatewayError, GatewayEvent, GatewayPayload, GatewayRequest, LoginInfo,
    RequestSeq,
};

/// Fault code on simulated exchange rejections.
pub const PAPER_REJECT_CODE: i32 = 31;

pub struct PaperGateway {
    catalogue: BTreeMap<InstrumentId, PaperInstrument>,
    rejected: HashSet<InstrumentId>,
    fill_on_accept: bool,
    trading_day: NaiveDate,
    events: Sender<GatewayEvent>,
    connected: AtomicBool,
    max_order_ref: AtomicU64,
    next_sys_id: AtomicU64,
    next_trade_id: AtomicU64,
    /// Orders acknowledged and not yet filled or canceled, by order ref.
    resting: Mutex<BTreeMap<OrderRef, OrderSnapshot>>,
}

impl PaperGateway {
    pub fn new(config: &PaperConfig, trading_day: NaiveDate, events: Sender<GatewayEvent>) -> Self {
        Self {
            catalogue: config
                .instruments
                .iter()
                .map(|p| (p.instrument.instrument_id.clone(), p.clone()))
                .collect(),
            rejected: config
                .reject_instruments
                .iter()
                .map(InstrumentId::new)
                .collect(),
            fill_on_accept: config.fill_on_accept,
            trading_day,
            events,
            connected: AtomicBool::new(false),
            max_order_ref: AtomicU64::new(0),
            next_sys_id: AtomicU64::new(1),
            next_trade_id: AtomicU64::new(1),
            resting: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Drop the link as a network failure would.
    pub fn disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.emit(GatewayEvent::unsolicited(GatewayPayload::Disconnected {
                reason: reason.to_string(),
            }));
        }
    }

    /// Bring the link back; the session re-authenticates on `Connected`.
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.emit(GatewayEvent::unsolicited(GatewayPayload::Connected));
        }
    }

    /// Order refs currently resting.
    pub fn resting(&self) -> Vec<OrderRef> {
        self.resting.lock().keys().cloned().collect()
    }

    /// Fill up to `volume` of a resting order at its limit price. Returns the
    /// volume actually filled.
    pub fn fill_resting(&self, order_ref: &OrderRef, volume: u32) -> u32 {
        let mut resting = self.resting.lock();
        let Some(order) = resting.get_mut(order_ref) else {
            return 0;
        };
        let left = order.volume_total_original - order.volume_traded;
        let filled = volume.min(left);
        if filled == 0 {
            return 0;
        }
        order.volume_traded += filled;
        order.status = if order.volume_traded == order.volume_total_original {
            OrderStatus::AllTraded
        } else {
            OrderStatus::PartTradedQueueing
        };
        let snapshot = order.clone();
        if snapshot.status.is_terminal() {
            resting.remove(order_ref);
        }
        drop(resting);

        self.emit_trade(&snapshot, filled);
        self.emit(GatewayEvent::unsolicited(GatewayPayload::Order(snapshot)));
        filled
    }

    fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("paper gateway callback queue closed");
        }
    }

    fn reply(&self, seq: RequestSeq, payload: GatewayPayload) {
        self.emit(GatewayEvent::reply(seq, payload));
    }

    fn emit_trade(&self, order: &OrderSnapshot, volume: u32) {
        let Some(sys_id) = order.order_sys_id.clone() else {
            return;
        };
        let n = self.next_trade_id.fetch_add(1, Ordering::Relaxed);
        self.emit(GatewayEvent::unsolicited(GatewayPayload::Trade(TradeReport {
            trade_id: format!("{:>12}", n),
            order_ref: order.order_ref.clone(),
            order_sys_id: sys_id,
            exchange_id: order.exchange_id.clone(),
            instrument_id: order.instrument_id.clone(),
            side: order.side,
            offset: order.offset,
            price: order.price,
            volume,
            trading_day: self.trading_day,
        })));
    }

    fn login_info(&self) -> LoginInfo {
        let now = Local::now().time();
        let exchanges: HashSet<ExchangeId> = self
            .catalogue
            .values()
            .map(|p| p.instrument.exchange_id.clone())
            .collect();
        let mut exchange_times: Vec<(ExchangeId, _)> =
            exchanges.into_iter().map(|e| (e, now)).collect();
        exchange_times.sort_by(|a, b| a.0.cmp(&b.0));
        LoginInfo {
            trading_day: self.trading_day,
            max_order_ref: self.max_order_ref.load(Ordering::Relaxed),
            exchange_times,
        }
    }

    fn query_instruments(&self, seq: RequestSeq, filter: Option<&InstrumentId>) {
        let matching: Vec<_> = self
            .catalogue
            .values()
            .filter(|p| filter.map_or(true, |id| *id == p.instrument.instrument_id))
            .map(|p| p.instrument.clone())
            .collect();
        for instrument in matching {
            self.emit(GatewayEvent::reply(seq, GatewayPayload::Instrument(instrument)).partial());
        }
        self.reply(seq, GatewayPayload::Empty);
    }

    fn market_snapshot(p: &PaperInstrument) -> Option<MarketSnapshot> {
        if p.upper_limit_price.is_none()
            && p.lower_limit_price.is_none()
            && p.settlement_price.is_none()
        {
            return None;
        }
        Some(MarketSnapshot {
            instrument_id: p.instrument.instrument_id.clone(),
            upper_limit_price: p.upper_limit_price.unwrap_or(f64::MAX),
            lower_limit_price: p.lower_limit_price.unwrap_or(f64::MIN),
            pre_settlement_price: p.settlement_price.unwrap_or(0.0),
            settlement_price: p.settlement_price,
        })
    }

    fn insert(&self, order: DetailOrder) {
        if let Ok(n) = order.order_ref.as_str().trim().parse::<u64>() {
            self.max_order_ref.fetch_max(n, Ordering::Relaxed);
        }

        let known = self.catalogue.contains_key(&order.instrument_id);
        if !known || self.rejected.contains(&order.instrument_id) {
            tracing::debug!(
                order_ref = %order.order_ref,
                instrument_id = %order.instrument_id,
                "paper insert rejected"
            );
            self.emit(
                GatewayEvent::unsolicited(GatewayPayload::InsertRejected {
                    order_ref: order.order_ref,
                })
                .with_fault(PAPER_REJECT_CODE, "instrument not tradable"),
            );
            return;
        }

        let sys_id = self.next_sys_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = OrderSnapshot {
            order_ref: order.order_ref.clone(),
            order_sys_id: Some(OrderSysId::new(format!("{:>12}", sys_id))),
            exchange_id: order.exchange_id,
            instrument_id: order.instrument_id,
            side: order.side,
            offset: order.offset,
            price: order.price,
            volume_total_original: order.volume,
            volume_traded: 0,
            status: OrderStatus::NoTradeQueueing,
            status_message: "accepted".into(),
        };
        self.resting
            .lock()
            .insert(snapshot.order_ref.clone(), snapshot.clone());
        self.emit(GatewayEvent::unsolicited(GatewayPayload::Order(snapshot)));

        if self.fill_on_accept {
            self.fill_resting(&order.order_ref, order.volume);
        }
    }

    fn cancel(&self, cancel: CancelDetail) {
        let removed = self.resting.lock().remove(&cancel.order_ref);
        match removed {
            Some(mut snapshot) => {
                snapshot.status = OrderStatus::Canceled;
                snapshot.status_message = "canceled".into();
                self.emit(GatewayEvent::unsolicited(GatewayPayload::Order(snapshot)));
            }
            None => self.emit(
                GatewayEvent::unsolicited(GatewayPayload::CancelRejected {
                    action_ref: cancel.action_ref,
                })
                .with_fault(PAPER_REJECT_CODE, "order not resting"),
            ),
        }
    }
}

impl GatewayChannel for PaperGateway {
    fn send(&self, seq: RequestSeq, request: GatewayRequest) -> Result<(), GatewayError> {
        if !matches!(request, GatewayRequest::Connect { .. }) && !self.is_connected() {
            return Err(GatewayError::Disconnected);
        }
        match request {
            GatewayRequest::Connect { .. } => self.reconnect(),
            GatewayRequest::Authenticate(_) => self.reply(seq, GatewayPayload::Authenticated),
            GatewayRequest::Login(_) => {
                self.reply(seq, GatewayPayload::LoggedIn(self.login_info()))
            }
            GatewayRequest::ConfirmSettlement => {
                self.reply(seq, GatewayPayload::SettlementConfirmed)
            }
            GatewayRequest::Logout => {
                self.reply(seq, GatewayPayload::LoggedOut);
                self.connected.store(false, Ordering::Release);
            }
            GatewayRequest::QueryInstrument(filter) => {
                self.query_instruments(seq, filter.as_ref())
            }
            GatewayRequest::QueryMarginRate(id) => {
                let payload = match self.catalogue.get(&id).and_then(|p| p.margin_rate) {
                    Some(rate) => GatewayPayload::MarginRate {
                        instrument_id: id,
                        rate,
                    },
                    None => GatewayPayload::Empty,
                };
                self.reply(seq, payload);
            }
            GatewayRequest::QueryCommissionRate(id) => {
                let payload = match self.catalogue.get(&id).and_then(|p| p.commission_rate) {
                    Some(rate) => GatewayPayload::CommissionRate {
                        instrument_id: id,
                        rate,
                    },
                    None => GatewayPayload::Empty,
                };
                self.reply(seq, payload);
            }
            GatewayRequest::QueryMarketData(id) => {
                let payload = self
                    .catalogue
                    .get(&id)
                    .and_then(Self::market_snapshot)
                    .map_or(GatewayPayload::Empty, GatewayPayload::MarketData);
                self.reply(seq, payload);
            }
            // no session calendar: every instrument trades around the clock
            GatewayRequest::QueryTradingHours(_) => self.reply(seq, GatewayPayload::Empty),
            GatewayRequest::InsertOrder(order) => self.insert(order),
            GatewayRequest::CancelOrder(cancel) => self.cancel(cancel),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver};
    use og_core::types::{Instrument, MarginRate, Offset, Side, UserId};
    use og_execution::RequestSeqs;

    fn gateway(fill_on_accept: bool) -> (PaperGateway, Receiver<GatewayEvent>, RequestSeqs) {
        let config = PaperConfig {
            fill_on_accept,
            reject_instruments: vec!["ag2406".into()],
            instruments: vec![
                PaperInstrument {
                    instrument: Instrument {
                        instrument_id: InstrumentId::new("rb2405"),
                        exchange_id: ExchangeId::new("SHFE"),
                        volume_multiple: 10,
                        price_tick: 1.0,
                        min_limit_order_volume: 1,
                        max_limit_order_volume: 500,
                    },
                    margin_rate: Some(MarginRate::default()),
                    commission_rate: None,
                    upper_limit_price: Some(4000.0),
                    lower_limit_price: Some(3000.0),
                    settlement_price: None,
                },
                PaperInstrument {
                    instrument: Instrument {
                        instrument_id: InstrumentId::new("ag2406"),
                        exchange_id: ExchangeId::new("SHFE"),
                        volume_multiple: 15,
                        price_tick: 1.0,
                        min_limit_order_volume: 1,
                        max_limit_order_volume: 500,
                    },
                    margin_rate: None,
                    commission_rate: None,
                    upper_limit_price: None,
                    lower_limit_price: None,
                    settlement_price: None,
                },
            ],
        };
        let (tx, rx) = unbounded();
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        (PaperGateway::new(&config, day, tx), rx, RequestSeqs::new())
    }

    fn order(r: &str, instrument: &str) -> DetailOrder {
        DetailOrder {
            order_ref: OrderRef::new(r),
            user_id: UserId::new("u1"),
            instrument_id: InstrumentId::new(instrument),
            exchange_id: ExchangeId::new("SHFE"),
            side: Side::Buy,
            offset: Offset::Open,
            price: 3500.0,
            volume: 3,
        }
    }

    fn connect(g: &PaperGateway, rx: &Receiver<GatewayEvent>, seqs: &RequestSeqs) {
        g.send(seqs.next(), GatewayRequest::Connect { front_addresses: vec![] })
            .unwrap();
        assert_eq!(rx.recv().unwrap().payload, GatewayPayload::Connected);
    }

    #[test]
    fn test_refuses_before_connect() {
        let (g, _rx, seqs) = gateway(false);
        assert_eq!(
            g.send(seqs.next(), GatewayRequest::ConfirmSettlement),
            Err(GatewayError::Disconnected)
        );
    }

    #[test]
    fn test_reference_queries() {
        let (g, rx, seqs) = gateway(false);
        connect(&g, &rx, &seqs);

        let seq = seqs.next();
        g.send(seq, GatewayRequest::QueryInstrument(None)).unwrap();
        let parts: Vec<_> = rx.try_iter().collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|e| e.seq == Some(seq)));
        assert!(!parts[0].is_last);
        assert!(parts[2].is_last);

        g.send(
            seqs.next(),
            GatewayRequest::QueryMarginRate(InstrumentId::new("rb2405")),
        )
        .unwrap();
        assert!(matches!(
            rx.recv().unwrap().payload,
            GatewayPayload::MarginRate { .. }
        ));
        g.send(
            seqs.next(),
            GatewayRequest::QueryCommissionRate(InstrumentId::new("rb2405")),
        )
        .unwrap();
        assert_eq!(rx.recv().unwrap().payload, GatewayPayload::Empty);
        g.send(
            seqs.next(),
            GatewayRequest::QueryMarketData(InstrumentId::new("rb2405")),
        )
        .unwrap();
        match rx.recv().unwrap().payload {
            GatewayPayload::MarketData(s) => {
                assert!(s.within_limits(3500.0));
                assert!(!s.within_limits(4500.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_insert_then_cancel() {
        let (g, rx, seqs) = gateway(false);
        connect(&g, &rx, &seqs);

        g.send(seqs.next(), GatewayRequest::InsertOrder(order("000000000007", "rb2405")))
            .unwrap();
        let GatewayPayload::Order(ack) = rx.recv().unwrap().payload else {
            panic!("expected order ack");
        };
        assert_eq!(ack.status, OrderStatus::NoTradeQueueing);
        let sys_id = ack.order_sys_id.clone().unwrap();
        assert_eq!(g.resting(), vec![OrderRef::new("000000000007")]);
        assert_eq!(g.login_info().max_order_ref, 7);

        let cancel = CancelDetail {
            action_ref: OrderRef::new("000000000008"),
            user_id: UserId::new("u1"),
            order_ref: OrderRef::new("000000000007"),
            order_sys_id: sys_id,
            exchange_id: ExchangeId::new("SHFE"),
            instrument_id: InstrumentId::new("rb2405"),
        };
        g.send(seqs.next(), GatewayRequest::CancelOrder(cancel.clone()))
            .unwrap();
        let GatewayPayload::Order(done) = rx.recv().unwrap().payload else {
            panic!("expected canceled snapshot");
        };
        assert_eq!(done.status, OrderStatus::Canceled);
        assert!(g.resting().is_empty());

        g.send(seqs.next(), GatewayRequest::CancelOrder(cancel)).unwrap();
        let ev = rx.recv().unwrap();
        assert!(matches!(ev.payload, GatewayPayload::CancelRejected { .. }));
        assert_eq!(ev.fault.map(|f| f.code), Some(PAPER_REJECT_CODE));
    }

    #[test]
    fn test_fill_on_accept_and_partial_fill() {
        let (g, rx, seqs) = gateway(true);
        connect(&g, &rx, &seqs);
        g.send(seqs.next(), GatewayRequest::InsertOrder(order("1", "rb2405")))
            .unwrap();
        let events: Vec<_> = rx.try_iter().map(|e| e.payload).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], GatewayPayload::Trade(t) if t.volume == 3));
        assert!(
            matches!(&events[2], GatewayPayload::Order(s) if s.status == OrderStatus::AllTraded)
        );

        let (g, rx, seqs) = gateway(false);
        connect(&g, &rx, &seqs);
        g.send(seqs.next(), GatewayRequest::InsertOrder(order("2", "rb2405")))
            .unwrap();
        rx.recv().unwrap();
        assert_eq!(g.fill_resting(&OrderRef::new("2"), 1), 1);
        let _trade = rx.recv().unwrap();
        assert!(matches!(
            rx.recv().unwrap().payload,
            GatewayPayload::Order(s) if s.status == OrderStatus::PartTradedQueueing && s.volume_traded == 1
        ));
        assert_eq!(g.fill_resting(&OrderRef::new("2"), 10), 2);
        assert!(g.resting().is_empty());
        assert_eq!(g.fill_resting(&OrderRef::new("2"), 1), 0);
    }

    #[test]
    fn test_rejected_and_unknown_instruments() {
        let (g, rx, seqs) = gateway(false);
        connect(&g, &rx, &seqs);
        for instrument in ["ag2406", "zz9999"] {
            g.send(seqs.next(), GatewayRequest::InsertOrder(order("5", instrument)))
                .unwrap();
            let ev = rx.recv().unwrap();
            assert!(matches!(ev.payload, GatewayPayload::InsertRejected { .. }));
            assert!(ev.fault.is_some());
        }
        assert!(g.resting().is_empty());
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let (g, rx, seqs) = gateway(false);
        connect(&g, &rx, &seqs);
        g.disconnect("cable pulled");
        assert!(matches!(
            rx.recv().unwrap().payload,
            GatewayPayload::Disconnected { .. }
        ));
        assert_eq!(
            g.send(seqs.next(), GatewayRequest::Logout),
            Err(GatewayError::Disconnected)
        );
        g.reconnect();
        assert_eq!(rx.recv().unwrap().payload, GatewayPayload::Connected);
        assert!(g.is_connected());
    }
}
