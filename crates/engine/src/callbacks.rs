//! The ordered callback flow.
//!
//! One dedicated thread drains the gateway's callback queue in arrival order.
//! Order and trade reports go to the registry (and release the dispatcher's
//! ack gate); everything else belongs to the session.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use og_execution::{GatewayEvent, GatewayPayload};

use crate::engine::SharedState;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Drain `events` until cancelled or every sender is gone.
pub fn callback_loop(
    state: Arc<SharedState>,
    events: Receiver<GatewayEvent>,
    cancel: CancellationToken,
) {
    info!("callback flow started");
    loop {
        match events.recv_timeout(IDLE_POLL) {
            Ok(event) => route(&state, event),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("callback flow stopped");
}

/// Apply one callback.
pub fn route(state: &SharedState, event: GatewayEvent) {
    let message = event
        .fault
        .as_ref()
        .map(|f| format!("[{}] {}", f.code, f.message))
        .unwrap_or_else(|| "rejected by gateway".to_string());

    match event.payload {
        GatewayPayload::Order(snapshot) => {
            let order_ref = snapshot.order_ref.clone();
            state.registry.on_order(snapshot);
            state.dispatcher.acknowledge(&order_ref);
        }
        GatewayPayload::Trade(trade) => state.registry.on_trade(&trade),
        GatewayPayload::InsertRejected { order_ref } => {
            warn!(order_ref = %order_ref, reason = %message, "insert rejected");
            state.registry.on_insert_rejected(&order_ref, &message);
            state.dispatcher.acknowledge(&order_ref);
        }
        GatewayPayload::CancelRejected { action_ref } => {
            warn!(action_ref = %action_ref, reason = %message, "cancel rejected");
            state.registry.on_cancel_rejected(&action_ref, &message);
        }
        payload => {
            let event = GatewayEvent { payload, ..event };
            state.session.on_event(event);
            let ready = state.session.is_ready();
            if ready != state.dispatcher.is_front_active() {
                debug!(ready, "front availability changed");
                state.dispatcher.set_front_active(ready);
            }
        }
    }
}
