//! Credit Transfer Protocol
//!
//! Two-phase, SMS-driven transfer of prepaid credit between subscribers:
//!
//! 1. `<number>*<amount>` validates the request and replies with a
//!    confirmation code.
//! 2. Echoing the code within the window settles the transfer through the
//!    settlement journal.

pub mod command;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod messages;
pub mod pending;
pub mod settlement;
pub mod state;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use command::{SmsCommand, parse_command};
pub use db::{PgEventLog, PgNotificationStore, PgPendingStore, PgSettlementLog};
pub use engine::{
    CodeSource, CreditTransferEngine, FixedCodes, MAX_CODE_ATTEMPTS, RandomCodes, Stores,
    TransferSettings,
};
pub use error::TransferError;
pub use events::{ERROR_TRANSFER_SUFFIX, MemoryEventLog, TransferEvent, TransferEventLog};
pub use messages::{
    MemoryNotificationStore, MessageCatalog, MessageKey, NotificationError, NotificationStore,
    NotificationSyncSummary,
};
pub use pending::{DEFAULT_PENDING_WINDOW_SECS, MemoryPendingStore, PendingTransferStore};
pub use settlement::{
    MemorySettlementLog, SettlementCoordinator, SettlementLog, SettlementOutcome, SettlementRecord,
};
pub use state::{SettlementState, TransferState};
pub use types::{ConfirmationCode, PendingTransfer, Rejection, TransferReply};
