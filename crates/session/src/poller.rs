//! Background reference-data poller.
//!
//! While the session is ready, queries margin and commission rates for every
//! known instrument still missing them. Queries go out one at a time, spaced
//! by the throttle, and each waits a bounded time for its answer. A timeout
//! is logged and the poller moves on to the next item; the next cycle picks
//! the item up again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use og_core::config::SessionConfig;
use og_core::ReferenceStore;
use og_execution::GatewayRequest;

use crate::client::SessionClient;
use crate::error::SessionError;

pub struct QueryPoller {
    session: Arc<SessionClient>,
    reference: Arc<ReferenceStore>,
    throttle: Duration,
    query_timeout: Duration,
    interval: Duration,
    last_query: Option<Instant>,
}

/// What one poll cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub answered: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl QueryPoller {
    pub fn new(
        config: &SessionConfig,
        session: Arc<SessionClient>,
        reference: Arc<ReferenceStore>,
    ) -> Self {
        Self {
            session,
            reference,
            throttle: Duration::from_millis(config.query_throttle_ms),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            interval: Duration::from_millis(config.poll_interval_ms),
            last_query: None,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("reference poller started");
        loop {
            if self.session.is_ready() {
                let report = self.cycle(&cancel).await;
                if report != CycleReport::default() {
                    debug!(?report, "reference poll cycle");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("reference poller stopped");
    }

    /// Query every missing rate once.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut work: Vec<GatewayRequest> = self
            .reference
            .missing_margin_rates()
            .into_iter()
            .map(GatewayRequest::QueryMarginRate)
            .collect();
        work.extend(
            self.reference
                .missing_commission_rates()
                .into_iter()
                .map(GatewayRequest::QueryCommissionRate),
        );

        let mut report = CycleReport::default();
        for request in work {
            if !self.session.is_ready() || !self.pace(cancel).await {
                break;
            }
            let name = request.name();
            match self.session.query(request, self.query_timeout).await {
                Ok(()) => report.answered += 1,
                Err(SessionError::Timeout { seq, .. }) => {
                    warn!(seq = %seq, request = name, "reference query timed out");
                    report.timed_out += 1;
                }
                Err(e) => {
                    warn!(error = %e, request = name, "reference query failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Sleep until the throttle allows the next query. `false` on cancel.
    async fn pace(&mut self, cancel: &CancellationToken) -> bool {
        if let Some(last) = self.last_query {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(last + self.throttle) => {}
            }
        } else if cancel.is_cancelled() {
            return false;
        }
        self.last_query = Some(Instant::now());
        true
    }
}
