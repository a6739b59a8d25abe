//! Pending-Transfer Registry
//!
//! Short-lived `code → (from, to, amount, created_at)` rows between a
//! validated request and its confirmation. Expiry is lazy: rows older than
//! the window are purged at the start of each confirmation attempt.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::TransferError;
use super::types::{ConfirmationCode, PendingTransfer};
use crate::core_types::Imsi;

/// Default confirmation window.
pub const DEFAULT_PENDING_WINDOW_SECS: i64 = 600;

#[async_trait]
pub trait PendingTransferStore: Send + Sync {
    /// Insert keyed by code. Fails with `DuplicateCode` while another row
    /// holds the code.
    async fn insert(&self, pending: &PendingTransfer) -> Result<(), TransferError>;

    /// Delete rows with `now - created_at > window`; returns how many.
    async fn purge_expired(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, TransferError>;

    /// Row matching both the code and the sender.
    async fn find(
        &self,
        code: &ConfirmationCode,
        from: &Imsi,
    ) -> Result<Option<PendingTransfer>, TransferError>;

    async fn remove(&self, code: &ConfirmationCode, from: &Imsi) -> Result<bool, TransferError>;

    async fn len(&self) -> Result<usize, TransferError>;
}

#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    rows: DashMap<ConfirmationCode, PendingTransfer>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingTransferStore for MemoryPendingStore {
    async fn insert(&self, pending: &PendingTransfer) -> Result<(), TransferError> {
        match self.rows.entry(pending.code.clone()) {
            Entry::Occupied(_) => Err(TransferError::DuplicateCode(pending.code.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(pending.clone());
                Ok(())
            }
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, TransferError> {
        let before = self.rows.len();
        self.rows.retain(|_, p| !p.is_expired(now, window));
        Ok(before.saturating_sub(self.rows.len()))
    }

    async fn find(
        &self,
        code: &ConfirmationCode,
        from: &Imsi,
    ) -> Result<Option<PendingTransfer>, TransferError> {
        Ok(self
            .rows
            .get(code)
            .filter(|p| &p.from == from)
            .map(|p| p.value().clone()))
    }

    async fn remove(&self, code: &ConfirmationCode, from: &Imsi) -> Result<bool, TransferError> {
        Ok(self.rows.remove_if(code, |_, p| &p.from == from).is_some())
    }

    async fn len(&self) -> Result<usize, TransferError> {
        Ok(self.rows.len())
    }
}
