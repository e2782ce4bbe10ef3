//! # og-core
//!
//! Shared building blocks for the OrderGate order-management core.
//!
//! This crate provides the identifiers and value types exchanged between the
//! ledger, the request orchestrator, the dispatcher and the gateway session:
//! order instructions, exchange order/trade reports, instrument reference
//! data, error codes and execution results. It also hosts the layered
//! configuration and the tracing initialisation used by every binary.

pub mod config;
pub mod error;
pub mod logging;
pub mod reference;
pub mod types;

pub use error::{ErrorCode, ExecutionResult};
pub use reference::{InstrumentInfo, ReferenceData, ReferenceStore};
