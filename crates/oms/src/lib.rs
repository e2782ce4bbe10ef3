//! # og-oms
//!
//! Request orchestration. Turns client instructions into reservations and
//! exchange-facing sub-orders, and applies the asynchronous order and trade
//! reports back onto the owning user's ledger.
//!
//! - [`UserRegistry`]: the explicit registry of users, constructed once and
//!   shared; client API, callbacks and settlement all go through it.
//! - [`OrderMapper`]: request ↔ sub-order ↔ exchange snapshot index.
//! - [`SubOrderSink`]: admission seam the dispatcher implements.
//! - [`PersistenceProvider`]: snapshot load/save, with a JSON-lines store.

pub mod dedup;
pub mod error;
pub mod mapper;
pub mod registry;
pub mod request;
pub mod sink;
pub mod store;
pub mod user;
pub mod view;

pub use dedup::{OrderRefGenerator, TradeDeduplicator};
pub use error::RequestError;
pub use mapper::{ActionEntry, OrderMapper, RequestKey};
pub use registry::{Services, SettlementOutcome, UserRegistry};
pub use request::{ActiveRequest, RequestKind, RequestStage, ReservationHandle};
pub use sink::{DispatchReject, SubOrder, SubOrderSink};
pub use store::{JsonSnapshotStore, MemorySnapshotStore, PersistenceProvider};
pub use user::{ActiveUser, UserState};
pub use view::{LedgerView, ReservationKind, ReservationView};
