//! OrderGate engine: library interface for the binary and integration tests.

pub mod callbacks;
pub mod engine;
pub mod paper_gateway;

pub use engine::{Engine, SharedState};
pub use paper_gateway::PaperGateway;
