//! Bounded wait for the acknowledgement of the last sent insert.

use std::time::{Duration, Instant};

use og_core::types::OrderRef;
use parking_lot::{Condvar, Mutex};

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckWait {
    /// Nothing was outstanding.
    Clear,
    Acknowledged,
    /// The bound elapsed; the outstanding reference is dropped.
    TimedOut(OrderRef),
}

#[derive(Default)]
pub struct AckGate {
    pending: Mutex<Option<OrderRef>>,
    cleared: Condvar,
}

impl AckGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `order_ref` as sent and awaiting acknowledgement.
    pub fn arm(&self, order_ref: OrderRef) {
        *self.pending.lock() = Some(order_ref);
    }

    /// Returns `true` if `order_ref` was the outstanding reference.
    pub fn acknowledge(&self, order_ref: &OrderRef) -> bool {
        let mut pending = self.pending.lock();
        if pending.as_ref() != Some(order_ref) {
            return false;
        }
        *pending = None;
        self.cleared.notify_all();
        true
    }

    pub fn pending(&self) -> Option<OrderRef> {
        self.pending.lock().clone()
    }

    /// Block until the outstanding reference is acknowledged or `timeout`
    /// elapses.
    pub fn wait(&self, timeout: Duration) -> AckWait {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        if pending.is_none() {
            return AckWait::Clear;
        }
        while pending.is_some() {
            if self.cleared.wait_until(&mut pending, deadline).timed_out() {
                return match pending.take() {
                    Some(order_ref) => AckWait::TimedOut(order_ref),
                    None => AckWait::Acknowledged,
                };
            }
        }
        AckWait::Acknowledged
    }

    /// Drop any outstanding reference and wake waiters. Used at shutdown.
    pub fn release(&self) {
        *self.pending.lock() = None;
        self.cleared.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_clear_when_idle() {
        let gate = AckGate::new();
        assert_eq!(gate.wait(Duration::from_secs(5)), AckWait::Clear);
    }

    #[test]
    fn test_ack_wakes_waiter() {
        let gate = Arc::new(AckGate::new());
        gate.arm(OrderRef::new("000000000001"));
        let acker = {
            let gate = gate.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                assert!(gate.acknowledge(&OrderRef::new("000000000001")));
            })
        };
        let start = Instant::now();
        assert_eq!(gate.wait(Duration::from_secs(5)), AckWait::Acknowledged);
        assert!(start.elapsed() < Duration::from_secs(1));
        acker.join().unwrap();
    }

    #[test]
    fn test_timeout_drops_pending() {
        let gate = AckGate::new();
        gate.arm(OrderRef::new("7"));
        let start = Instant::now();
        assert_eq!(
            gate.wait(Duration::from_millis(50)),
            AckWait::TimedOut(OrderRef::new("7"))
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_ack_for_other_ref_ignored() {
        let gate = AckGate::new();
        gate.arm(OrderRef::new("2"));
        assert!(!gate.acknowledge(&OrderRef::new("1")));
        assert_eq!(gate.pending(), Some(OrderRef::new("2")));
    }
}
