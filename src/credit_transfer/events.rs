//! Transfer audit events
//!
//! One row per balance-affecting (or balance-refused) action, consumed by the
//! cloud for reporting. Refused transfers carry [`ERROR_TRANSFER_SUFFIX`] in
//! their reason.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::error::TransferError;
use crate::core_types::{Imsi, RawAmount};

pub const ERROR_TRANSFER_SUFFIX: &str = " error_transfer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub imsi: Imsi,
    pub old_balance: RawAmount,
    pub new_balance: RawAmount,
    pub reason: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferEvent {
    /// Completed leg of a transfer.
    pub fn transfer(
        imsi: Imsi,
        old_balance: RawAmount,
        new_balance: RawAmount,
        reason: impl Into<String>,
        from_number: &str,
        to_number: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            imsi,
            old_balance,
            new_balance,
            reason: reason.into(),
            from_number: Some(from_number.to_string()),
            to_number: Some(to_number.to_string()),
            created_at: at,
        }
    }

    /// Refused transfer; the balance is unchanged.
    pub fn refused(
        imsi: Imsi,
        balance: RawAmount,
        reason: &str,
        from_number: &str,
        to_number: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            imsi,
            balance,
            balance,
            format!("{}{}", reason, ERROR_TRANSFER_SUFFIX),
            from_number,
            to_number,
            at,
        )
    }

    /// Balance change outside a transfer (sync zeroing, operator action).
    pub fn balance_change(
        imsi: Imsi,
        old_balance: RawAmount,
        new_balance: RawAmount,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            imsi,
            old_balance,
            new_balance,
            reason: reason.into(),
            from_number: None,
            to_number: None,
            created_at: at,
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.reason.ends_with(ERROR_TRANSFER_SUFFIX)
    }
}

#[async_trait]
pub trait TransferEventLog: Send + Sync {
    async fn record(&self, event: TransferEvent) -> Result<(), TransferError>;

    /// Events for one subscriber, oldest first.
    async fn events_for(&self, imsi: &Imsi) -> Result<Vec<TransferEvent>, TransferError>;
}

#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<TransferEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TransferEventLog for MemoryEventLog {
    async fn record(&self, event: TransferEvent) -> Result<(), TransferError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }

    async fn events_for(&self, imsi: &Imsi) -> Result<Vec<TransferEvent>, TransferError> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| &e.imsi == imsi)
            .cloned()
            .collect())
    }
}
