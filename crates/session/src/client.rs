//! Gateway session client.
//!
//! Drives connect → authenticate → login → settlement confirm from the
//! callbacks it receives, fills the [`ReferenceStore`] from query responses,
//! and completes blocked queries per [`RequestSeq`].
//!
//! Callbacks arrive on the engine's callback thread through
//! [`SessionClient::on_event`], which never blocks. Callers that need a state
//! wait on it with [`SessionClient::wait_for`]; a timeout there means "not yet,
//! look again", not failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use og_core::ReferenceStore;
use og_execution::{
    Credentials, GatewayChannel, GatewayEvent, GatewayPayload, GatewayRequest, LoginInfo,
    RequestSeq, RequestSeqs, TradingHourGate,
};
use og_oms::OrderRefGenerator;

use crate::error::SessionError;
use crate::state::SessionState;

type Completion = oneshot::Sender<Result<(), SessionError>>;

pub struct SessionClient {
    credentials: Credentials,
    front_addresses: Vec<String>,
    channel: Arc<dyn GatewayChannel>,
    seqs: Arc<RequestSeqs>,
    reference: Arc<ReferenceStore>,
    refs: Arc<OrderRefGenerator>,
    hours: Arc<TradingHourGate>,
    state: watch::Sender<SessionState>,
    /// Logged in with settlement confirmed on the current link.
    ready: watch::Sender<bool>,
    trading_day: Mutex<Option<NaiveDate>>,
    waiters: Mutex<HashMap<RequestSeq, Completion>>,
}

impl SessionClient {
    pub fn new(
        credentials: Credentials,
        front_addresses: Vec<String>,
        channel: Arc<dyn GatewayChannel>,
        seqs: Arc<RequestSeqs>,
        reference: Arc<ReferenceStore>,
        refs: Arc<OrderRefGenerator>,
        hours: Arc<TradingHourGate>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Stopped);
        let (ready, _) = watch::channel(false);
        Self {
            credentials,
            front_addresses,
            channel,
            seqs,
            reference,
            refs,
            hours,
            state,
            ready,
            trading_day: Mutex::new(None),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether order traffic may flow: started, and the current link is
    /// logged in with settlement confirmed.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Started && *self.ready.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Trading day reported at the last login.
    pub fn trading_day(&self) -> Option<NaiveDate> {
        *self.trading_day.lock()
    }

    /// Begin the login sequence. Progress is driven by callbacks.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut rejected = None;
        self.state.send_if_modified(|s| {
            if *s == SessionState::Stopped {
                *s = SessionState::Starting;
                true
            } else {
                rejected = Some(*s);
                false
            }
        });
        if let Some(current) = rejected {
            return Err(SessionError::AlreadyRunning(current));
        }

        info!(fronts = self.front_addresses.len(), "session starting");
        let connect = GatewayRequest::Connect {
            front_addresses: self.front_addresses.clone(),
        };
        if let Err(e) = self.send(connect) {
            self.set_state(SessionState::Stopped);
            return Err(e);
        }
        Ok(())
    }

    /// Log out. A session that is already stopped stays stopped.
    pub fn stop(&self) -> Result<(), SessionError> {
        if !self.state().is_running() {
            return Ok(());
        }
        self.set_state(SessionState::Stopping);
        self.ready.send_replace(false);
        info!("session stopping");
        if let Err(e) = self.send(GatewayRequest::Logout) {
            // nothing left to log out of
            warn!(error = %e, "logout not sent");
            self.set_state(SessionState::Stopped);
        }
        Ok(())
    }

    /// Wait up to `timeout` for the session to reach `target`.
    ///
    /// Returns `false` on timeout; the state is then unknown and the caller
    /// should poll again.
    pub async fn wait_for(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok());
        match reached {
            Ok(reached) => reached,
            Err(_) => {
                debug!(want = %target, current = %self.state(), "session wait timed out");
                false
            }
        }
    }

    /// Send a query and wait up to `timeout` for its last response part.
    pub async fn query(
        &self,
        request: GatewayRequest,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotStarted(self.state()));
        }
        let name = request.name();
        let seq = self.seqs.next();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(seq, tx);

        debug!(seq = %seq, request = name, "query");
        if let Err(e) = self.channel.send(seq, request) {
            self.waiters.lock().remove(&seq);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Abandoned(seq)),
            Err(_) => {
                self.waiters.lock().remove(&seq);
                Err(SessionError::Timeout { request: name, seq })
            }
        }
    }

    /// Apply one gateway callback. Order and trade reports are not the
    /// session's business and are ignored here.
    pub fn on_event(&self, event: GatewayEvent) {
        if let Some(fault) = event.fault.clone() {
            self.on_fault(&event, fault.code, &fault.message);
            if let Some(seq) = event.seq {
                self.complete(seq, Err(SessionError::Fault(fault)));
            }
            return;
        }

        match &event.payload {
            GatewayPayload::Connected => self.on_connected(),
            GatewayPayload::Disconnected { reason } => self.on_disconnected(reason),
            GatewayPayload::Authenticated => {
                debug!("authenticated");
                self.send_step(GatewayRequest::Login(self.credentials.clone()));
            }
            GatewayPayload::LoggedIn(info) => self.on_logged_in(info),
            GatewayPayload::SettlementConfirmed => self.on_settlement_confirmed(),
            GatewayPayload::LoggedOut => {
                info!("logged out");
                self.ready.send_replace(false);
                self.set_state(SessionState::Stopped);
            }
            GatewayPayload::Instrument(instrument) => {
                self.reference.upsert_instrument(instrument.clone());
            }
            GatewayPayload::MarginRate {
                instrument_id,
                rate,
            } => self.reference.set_margin_rate(instrument_id.clone(), *rate),
            GatewayPayload::CommissionRate {
                instrument_id,
                rate,
            } => self
                .reference
                .set_commission_rate(instrument_id.clone(), *rate),
            GatewayPayload::MarketData(snapshot) => {
                if let (Some(price), Some(day)) = (snapshot.settlement_price, self.trading_day()) {
                    self.reference
                        .set_settlement_price(&snapshot.instrument_id, day, price);
                }
                self.reference.set_market_snapshot(snapshot.clone());
            }
            GatewayPayload::TradingHours {
                instrument_id,
                hours,
            } => self
                .reference
                .set_trading_hours(instrument_id.clone(), hours.clone()),
            GatewayPayload::Empty
            | GatewayPayload::Order(_)
            | GatewayPayload::Trade(_)
            | GatewayPayload::InsertRejected { .. }
            | GatewayPayload::CancelRejected { .. } => {}
        }

        if let (Some(seq), true) = (event.seq, event.is_last) {
            self.complete(seq, Ok(()));
        }
    }

    fn on_connected(&self) {
        let state = self.state();
        match state {
            SessionState::Starting | SessionState::Started => {
                info!(state = %state, "connected, authenticating");
                self.send_step(GatewayRequest::Authenticate(self.credentials.clone()));
            }
            _ => debug!(state = %state, "connected while not starting"),
        }
    }

    fn on_disconnected(&self, reason: &str) {
        self.ready.send_replace(false);
        let before = self.state();
        let after = before.on_disconnect();
        warn!(reason, from = %before, to = %after, "gateway disconnected");
        self.set_state(after);
    }

    fn on_logged_in(&self, info: &LoginInfo) {
        info!(
            trading_day = %info.trading_day,
            max_order_ref = info.max_order_ref,
            "logged in"
        );
        *self.trading_day.lock() = Some(info.trading_day);
        self.refs.bump_past(info.max_order_ref);
        self.hours
            .apply_login_times(Local::now().naive_local(), &info.exchange_times);

        self.state.send_if_modified(|s| {
            if *s == SessionState::Starting {
                *s = SessionState::ConfirmingSettlement;
                true
            } else {
                false
            }
        });
        self.send_step(GatewayRequest::ConfirmSettlement);
    }

    fn on_settlement_confirmed(&self) {
        let state = self.state();
        if !matches!(
            state,
            SessionState::ConfirmingSettlement | SessionState::Started
        ) {
            debug!(state = %state, "settlement confirm ignored");
            return;
        }
        self.set_state(SessionState::Started);
        self.ready.send_replace(true);
        info!("session started");
        self.send_step(GatewayRequest::QueryInstrument(None));
    }

    fn on_fault(&self, event: &GatewayEvent, code: i32, message: &str) {
        let step = matches!(
            event.payload,
            GatewayPayload::Authenticated
                | GatewayPayload::LoggedIn(_)
                | GatewayPayload::SettlementConfirmed
        );
        if !step {
            warn!(code, message, "gateway response fault");
            return;
        }
        error!(code, message, state = %self.state(), "login sequence failed");
        self.ready.send_replace(false);
        self.state.send_if_modified(|s| {
            if matches!(
                *s,
                SessionState::Starting | SessionState::ConfirmingSettlement
            ) {
                *s = SessionState::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Fire-and-forget step of the login sequence.
    fn send_step(&self, request: GatewayRequest) {
        if let Err(e) = self.send(request) {
            error!(error = %e, "session step not sent");
        }
    }

    fn send(&self, request: GatewayRequest) -> Result<RequestSeq, SessionError> {
        let seq = self.seqs.next();
        debug!(seq = %seq, request = request.name(), "send");
        self.channel.send(seq, request)?;
        Ok(seq)
    }

    fn complete(&self, seq: RequestSeq, result: Result<(), SessionError>) {
        if let Some(tx) = self.waiters.lock().remove(&seq) {
            let _ = tx.send(result);
        }
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|s| {
            if *s != next {
                *s = next;
                true
            } else {
                false
            }
        });
    }
}
