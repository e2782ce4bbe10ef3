//! # og-session
//!
//! The gateway session: a callback-driven login state machine
//! ([`SessionClient`]) and the background [`QueryPoller`] that fills in
//! missing margin and commission rates.

pub mod client;
pub mod error;
pub mod poller;
pub mod state;

pub use client::SessionClient;
pub use error::SessionError;
pub use poller::{CycleReport, QueryPoller};
pub use state::SessionState;
