//! Engine: wires all components and manages lifecycle.
//!
//! [`Engine`] owns the shared state (reference store, mapper, registry,
//! dispatcher, session) and spawns the dispatch thread, the ordered callback
//! thread and the reference poller. It also exposes the client-facing API.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use crossbeam::channel::{Receiver, Sender};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use og_core::config::{AppConfig, TradingMode};
use og_core::types::{CancelInstruction, InstrumentId, OrderInstruction, RequestId, UserId};
use og_core::{ExecutionResult, ReferenceStore};
use og_execution::{
    Credentials, Dispatcher, GatewayChannel, GatewayEvent, RequestSeqs, TradingHourGate,
};
use og_ledger::PositionLot;
use og_oms::{
    JsonSnapshotStore, LedgerView, OrderMapper, OrderRefGenerator, PersistenceProvider,
    ReservationView, Services, SettlementOutcome, UserRegistry,
};
use og_session::{QueryPoller, SessionClient, SessionState};

use crate::callbacks;
use crate::paper_gateway::PaperGateway;

/// Shared state accessible by all engine components.
pub struct SharedState {
    pub config: AppConfig,
    pub reference: Arc<ReferenceStore>,
    pub mapper: Arc<OrderMapper>,
    pub refs: Arc<OrderRefGenerator>,
    pub hours: Arc<TradingHourGate>,
    pub registry: Arc<UserRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub session: Arc<SessionClient>,
}

pub struct Engine {
    state: Arc<SharedState>,
    events: Option<Receiver<GatewayEvent>>,
    cancel: CancellationToken,
    threads: Vec<JoinHandle<()>>,
    poller: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Engine over the paper gateway, with the JSON-lines snapshot store
    /// from configuration.
    pub fn paper(config: AppConfig) -> Result<(Self, Arc<PaperGateway>)> {
        if config.trading.mode != TradingMode::Paper {
            bail!("live trading mode needs a native gateway transport; use paper mode");
        }
        let store = JsonSnapshotStore::open(&config.storage.snapshot_path)?;
        Ok(Self::paper_with_store(config, Arc::new(store)))
    }

    pub fn paper_with_store(
        config: AppConfig,
        store: Arc<dyn PersistenceProvider>,
    ) -> (Self, Arc<PaperGateway>) {
        let trading_day = config
            .trading
            .trading_day
            .unwrap_or_else(|| Local::now().date_naive());
        let (tx, rx) = crossbeam::channel::unbounded();
        let gateway = Arc::new(PaperGateway::new(&config.paper, trading_day, tx.clone()));
        let engine = Self::build(config, gateway.clone(), store, tx, rx);
        (engine, gateway)
    }

    /// Wire the components around `channel`. `events_tx` must feed the same
    /// queue the channel delivers its callbacks to.
    pub fn build(
        config: AppConfig,
        channel: Arc<dyn GatewayChannel>,
        store: Arc<dyn PersistenceProvider>,
        events_tx: Sender<GatewayEvent>,
        events_rx: Receiver<GatewayEvent>,
    ) -> Self {
        let reference = Arc::new(ReferenceStore::new());
        let mapper = Arc::new(OrderMapper::new());
        let refs = Arc::new(OrderRefGenerator::default());
        let hours = Arc::new(TradingHourGate::new());
        let seqs = Arc::new(RequestSeqs::new());

        let dispatcher = Arc::new(Dispatcher::new(
            &config.dispatch,
            mapper.clone(),
            reference.clone(),
            channel.clone(),
            seqs.clone(),
            hours.clone(),
            events_tx,
        ));

        let registry = Arc::new(UserRegistry::new(Services {
            reference: reference.clone(),
            mapper: mapper.clone(),
            sink: dispatcher.clone(),
            refs: refs.clone(),
            store,
        }));

        let gw = &config.gateway;
        let session = Arc::new(SessionClient::new(
            Credentials {
                broker_id: gw.broker_id.clone(),
                investor_id: gw.investor_id.clone(),
                password: gw.password.clone(),
                app_id: gw.app_id.clone(),
                auth_code: gw.auth_code.clone(),
            },
            gw.front_addresses.clone(),
            channel,
            seqs,
            reference.clone(),
            refs.clone(),
            hours.clone(),
        ));

        let state = Arc::new(SharedState {
            config,
            reference,
            mapper,
            refs,
            hours,
            registry,
            dispatcher,
            session,
        });

        Self {
            state,
            events: Some(events_rx),
            cancel: CancellationToken::new(),
            threads: Vec::new(),
            poller: None,
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the worker flows, log in, and load the configured users.
    ///
    /// Returns the trading day reported at login.
    pub async fn start(&mut self) -> Result<NaiveDate> {
        let events = self
            .events
            .take()
            .context("engine already started")?;
        let state = self.state.clone();
        let cancel = self.cancel.clone();

        // ── 1. Dispatch thread ───────────────────────────────────
        self.threads
            .push(state.dispatcher.spawn(cancel.clone())?);

        // ── 2. Callback thread (dedicated OS thread) ─────────────
        let cb_state = state.clone();
        let cb_cancel = cancel.clone();
        self.threads.push(
            std::thread::Builder::new()
                .name("callbacks".into())
                .spawn(move || callbacks::callback_loop(cb_state, events, cb_cancel))?,
        );

        // ── 3. Session login ─────────────────────────────────────
        state.session.start()?;
        let wait = Duration::from_millis(state.config.session.wait_timeout_ms);
        while !state.session.wait_for(SessionState::Started, wait).await {
            if cancel.is_cancelled() {
                bail!("cancelled during login");
            }
            if state.session.state() == SessionState::Stopped {
                bail!("session stopped during login");
            }
            tracing::warn!(state = %state.session.state(), "session not started yet, still waiting");
        }
        let trading_day = state
            .session
            .trading_day()
            .context("no trading day reported at login")?;

        // ── 4. Users ─────────────────────────────────────────────
        for seed in &state.config.trading.users {
            state
                .registry
                .load_user(UserId::new(seed.user_id.as_str()), trading_day, seed.balance)?;
        }

        // ── 5. Reference poller (tokio task) ─────────────────────
        let poller = QueryPoller::new(
            &state.config.session,
            state.session.clone(),
            state.reference.clone(),
        );
        self.poller = Some(poller.spawn(cancel.clone()));

        tracing::info!(
            trading_day = %trading_day,
            users = state.config.trading.users.len(),
            "engine started"
        );
        Ok(trading_day)
    }

    /// Start, then block until SIGINT or cancellation and shut down.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = self.cancel.cancelled() => {
                tracing::info!("cancellation token triggered");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Log out and stop every worker flow.
    pub async fn shutdown(&mut self) {
        let session = &self.state.session;
        if let Err(e) = session.stop() {
            tracing::warn!(error = %e, "logout failed");
        }
        let wait = Duration::from_millis(self.state.config.session.wait_timeout_ms);
        if !session.wait_for(SessionState::Stopped, wait).await {
            tracing::warn!(state = %session.state(), "session did not confirm logout");
        }

        self.cancel.cancel();
        self.state.dispatcher.wake();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
        tracing::info!(stats = ?self.state.dispatcher.stats(), "engine stopped");
    }

    // ── Client API ─────────────────────────────────────────────────────

    pub fn insert_order(&self, order: OrderInstruction) -> RequestId {
        self.state.registry.insert_order(order)
    }

    pub fn cancel_order(&self, cancel: CancelInstruction) -> RequestId {
        self.state.registry.cancel_order(cancel)
    }

    pub fn execution_result(&self, request_id: RequestId) -> Option<ExecutionResult> {
        self.state.registry.execution_result(request_id)
    }

    pub fn reservations(&self, request_id: RequestId) -> Option<Vec<ReservationView>> {
        self.state.registry.reservations(request_id)
    }

    pub fn ledger(&self, user_id: &UserId) -> Option<LedgerView> {
        self.state.registry.ledger(user_id)
    }

    pub fn positions(
        &self,
        user_id: &UserId,
        instrument_id: Option<&InstrumentId>,
    ) -> Option<Vec<PositionLot>> {
        self.state.registry.positions(user_id, instrument_id)
    }

    pub fn requests(&self, user_id: &UserId) -> Vec<RequestId> {
        self.state.registry.requests(user_id)
    }

    /// Record the official settlement price of `trading_day` ahead of
    /// [`settle`](Self::settle).
    pub fn set_settlement_price(
        &self,
        instrument_id: &InstrumentId,
        trading_day: NaiveDate,
        price: f64,
    ) {
        self.state
            .reference
            .set_settlement_price(instrument_id, trading_day, price);
    }

    /// Settle every user for the current trading day.
    pub fn settle(&self) -> Vec<(UserId, SettlementOutcome)> {
        self.state.registry.settle_all()
    }

    /// Move settled users on to `trading_day`.
    pub fn renew(&self, trading_day: NaiveDate) -> usize {
        let renewed = self.state.registry.renew_all(trading_day);
        self.state.reference.prune_settlement_prices(trading_day);
        renewed
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.state.dispatcher.wake();
    }
}
