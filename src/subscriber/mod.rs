//! Subscriber stores
//!
//! - [`ledger`]: IMSI → PN-Counter balance
//! - [`status`]: IMSI → `{state, validity, ie_count}`
//! - [`directory`]: number ↔ IMSI (HLR contract)
//! - [`sync`]: cloud pushes applied to the stores above
//! - [`db`]: PostgreSQL backends

pub mod db;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod status;
pub mod sync;

pub use db::{PgDirectory, PgLedger, PgStatusStore};
pub use directory::{MemoryDirectory, SubscriberDirectory};
pub use error::SubscriberError;
pub use ledger::{LedgerStore, Leg, LegOutcome, MemoryLedger, parse_delta, settlement_actor};
pub use status::{
    AccountState, LifecyclePhase, MemoryStatusStore, StatusStore, SubscriberStatus,
    service_allowed,
};
pub use sync::{StatusPush, SubscriberPush, SubscriberSync, SyncSummary};
