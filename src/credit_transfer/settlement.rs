//! Settlement journal
//!
//! A confirmed transfer is first written as a journal record, then driven
//! through its legs:
//!
//! ```text
//! RECORDED → DEBITED → APPLIED
//!     ↓
//!   FAILED
//! ```
//!
//! Each leg is an idempotent ledger write keyed by the settlement id, so a
//! crash between any two steps is repaired by re-running the record from its
//! stored state. A credit leg whose recipient row is gone reverses the debit
//! under a derived key and ends FAILED. Value is never duplicated and never
//! left in flight.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::state::SettlementState;
use super::types::{ConfirmationCode, PendingTransfer};
use crate::core_types::{Imsi, RawAmount};
use crate::subscriber::{LedgerStore, Leg, LegOutcome, StatusStore, SubscriberError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub settlement_id: String,
    pub code: ConfirmationCode,
    pub from: Imsi,
    pub to: Imsi,
    pub amount: RawAmount,
    pub validity_days: u32,
    pub state: SettlementState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// New RECORDED entry for a matched pending transfer.
    pub fn from_pending(pending: &PendingTransfer, validity_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            settlement_id: ulid::Ulid::new().to_string(),
            code: pending.code.clone(),
            from: pending.from.clone(),
            to: pending.to.clone(),
            amount: pending.amount,
            validity_days,
            state: SettlementState::Recorded,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SettlementLog: Send + Sync {
    async fn create(&self, record: &SettlementRecord) -> Result<(), TransferError>;

    async fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, TransferError>;

    /// Compare-and-set the state. Returns false if the stored state is not
    /// `from`.
    async fn update_state_if(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError>;

    async fn update_state_with_error(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError>;

    /// Records in RECORDED or DEBITED, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<SettlementRecord>, TransferError>;
}

#[derive(Debug, Default)]
pub struct MemorySettlementLog {
    records: DashMap<String, SettlementRecord>,
}

impl MemorySettlementLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn cas(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let mut record = self
            .records
            .get_mut(settlement_id)
            .ok_or_else(|| TransferError::SettlementNotFound(settlement_id.to_string()))?;
        if record.state != from {
            return Ok(false);
        }
        record.state = to;
        record.updated_at = at;
        if let Some(e) = error {
            record.error = Some(e.to_string());
        }
        Ok(true)
    }
}

#[async_trait]
impl SettlementLog for MemorySettlementLog {
    async fn create(&self, record: &SettlementRecord) -> Result<(), TransferError> {
        match self.records.entry(record.settlement_id.clone()) {
            Entry::Occupied(_) => Err(TransferError::InvalidStateTransition(format!(
                "settlement {} already recorded",
                record.settlement_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, TransferError> {
        Ok(self.records.get(settlement_id).map(|r| r.value().clone()))
    }

    async fn update_state_if(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        self.cas(settlement_id, from, to, None, at)
    }

    async fn update_state_with_error(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        self.cas(settlement_id, from, to, Some(error), at)
    }

    async fn list_unfinished(&self) -> Result<Vec<SettlementRecord>, TransferError> {
        let mut records: Vec<SettlementRecord> = self
            .records
            .iter()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Balances observed while applying a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied {
        sender_before: RawAmount,
        sender_after: RawAmount,
        recipient_before: RawAmount,
        recipient_after: RawAmount,
        /// `None` when the recipient's status row could not be extended.
        validity: Option<NaiveDate>,
    },
    /// The sender could no longer cover the amount; nothing moved.
    Declined { balance: RawAmount },
    /// The recipient vanished after the debit; the sender was refunded.
    Reversed { balance: RawAmount },
}

/// Ledger key of the refund that undoes a settlement's debit.
pub fn reversal_id(settlement_id: &str) -> String {
    format!("{}:reversal", settlement_id)
}

/// Drives journal records to a terminal state.
pub struct SettlementCoordinator {
    log: Arc<dyn SettlementLog>,
    ledger: Arc<dyn LedgerStore>,
    status: Arc<dyn StatusStore>,
}

impl SettlementCoordinator {
    pub fn new(
        log: Arc<dyn SettlementLog>,
        ledger: Arc<dyn LedgerStore>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            log,
            ledger,
            status,
        }
    }

    pub fn log(&self) -> &Arc<dyn SettlementLog> {
        &self.log
    }

    /// Journal `record` and run it to completion.
    pub async fn settle(
        &self,
        record: SettlementRecord,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, TransferError> {
        self.log.create(&record).await?;
        debug!(
            settlement_id = %record.settlement_id,
            from = %record.from,
            to = %record.to,
            amount = record.amount,
            "Settlement recorded"
        );
        self.execute(record, now).await
    }

    /// Resume a record from its stored state.
    pub async fn execute(
        &self,
        mut record: SettlementRecord,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, TransferError> {
        let mut debit = None;
        if record.state == SettlementState::Recorded {
            match self.step_debit(&record, now).await? {
                Ok(outcome) => {
                    debit = Some(outcome);
                    record.state = SettlementState::Debited;
                }
                Err(balance) => return Ok(SettlementOutcome::Declined { balance }),
            }
        }

        match record.state {
            SettlementState::Debited => {
                let debit = match debit {
                    Some(d) => d,
                    // Replay: the debit leg is already on the counter.
                    None => {
                        self.ledger
                            .apply_leg(&record.from, &record.settlement_id, Leg::Debit, record.amount)
                            .await?
                    }
                };
                self.step_credit(&record, debit, now).await
            }
            SettlementState::Failed => {
                let balance = self.ledger.get_balance(&record.from).await?;
                Ok(SettlementOutcome::Declined { balance })
            }
            state => Err(TransferError::InvalidStateTransition(format!(
                "settlement {} is already {}",
                record.settlement_id, state
            ))),
        }
    }

    /// RECORDED → DEBITED, or RECORDED → FAILED when funds are short
    /// (inner `Err` carries the sender's balance).
    async fn step_debit(
        &self,
        record: &SettlementRecord,
        now: DateTime<Utc>,
    ) -> Result<Result<LegOutcome, RawAmount>, TransferError> {
        let result = self
            .ledger
            .apply_leg(&record.from, &record.settlement_id, Leg::Debit, record.amount)
            .await;
        match result {
            Ok(outcome) => {
                self.advance(record, SettlementState::Recorded, SettlementState::Debited, now)
                    .await?;
                Ok(Ok(outcome))
            }
            Err(SubscriberError::InsufficientFunds { balance, .. }) => {
                warn!(
                    settlement_id = %record.settlement_id,
                    from = %record.from,
                    balance,
                    amount = record.amount,
                    "Settlement declined, sender balance too low"
                );
                self.log
                    .update_state_with_error(
                        &record.settlement_id,
                        SettlementState::Recorded,
                        SettlementState::Failed,
                        "insufficient funds",
                        now,
                    )
                    .await?;
                Ok(Err(balance))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// DEBITED → APPLIED: credit the recipient, then extend validity.
    ///
    /// A missing recipient row turns into DEBITED → FAILED with the debit
    /// refunded. The validity extension is best effort once the credit landed.
    async fn step_credit(
        &self,
        record: &SettlementRecord,
        debit: LegOutcome,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, TransferError> {
        let credit = match self
            .ledger
            .apply_leg(&record.to, &record.settlement_id, Leg::Credit, record.amount)
            .await
        {
            Ok(credit) => credit,
            Err(SubscriberError::NotFound(_)) => return self.reverse(record, now).await,
            Err(e) => {
                error!(
                    settlement_id = %record.settlement_id,
                    to = %record.to,
                    error = %e,
                    "Credit leg failed, settlement left DEBITED for recovery"
                );
                return Err(e.into());
            }
        };
        let validity = match self
            .status
            .extend_validity(&record.to, record.validity_days, now.date_naive())
            .await
        {
            Ok(date) => Some(date),
            Err(e) => {
                error!(
                    settlement_id = %record.settlement_id,
                    to = %record.to,
                    error = %e,
                    "Validity extension failed after credit"
                );
                None
            }
        };
        self.advance(record, SettlementState::Debited, SettlementState::Applied, now)
            .await?;

        let sender_after = debit.balance();
        let recipient_after = credit.balance();
        info!(
            settlement_id = %record.settlement_id,
            from = %record.from,
            to = %record.to,
            amount = record.amount,
            sender_after,
            recipient_after,
            "Settlement applied"
        );
        Ok(SettlementOutcome::Applied {
            sender_before: sender_after.saturating_add(record.amount),
            sender_after,
            recipient_before: recipient_after.saturating_sub(record.amount),
            recipient_after,
            validity,
        })
    }

    /// DEBITED → FAILED: refund the sender under the reversal key.
    async fn reverse(
        &self,
        record: &SettlementRecord,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, TransferError> {
        let refund = self
            .ledger
            .apply_leg(
                &record.from,
                &reversal_id(&record.settlement_id),
                Leg::Credit,
                record.amount,
            )
            .await?;
        if !self
            .log
            .update_state_with_error(
                &record.settlement_id,
                SettlementState::Debited,
                SettlementState::Failed,
                "recipient not found",
                now,
            )
            .await?
        {
            self.advance(record, SettlementState::Debited, SettlementState::Failed, now)
                .await?;
        }
        warn!(
            settlement_id = %record.settlement_id,
            from = %record.from,
            to = %record.to,
            amount = record.amount,
            "Recipient gone after debit, settlement reversed"
        );
        Ok(SettlementOutcome::Reversed {
            balance: refund.balance(),
        })
    }

    async fn advance(
        &self,
        record: &SettlementRecord,
        from: SettlementState,
        to: SettlementState,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        if self
            .log
            .update_state_if(&record.settlement_id, from, to, now)
            .await?
        {
            return Ok(());
        }
        // Lost the CAS: another runner moved the record.
        match self.log.get(&record.settlement_id).await? {
            Some(current) if current.state == to => Ok(()),
            Some(current) => Err(TransferError::InvalidStateTransition(format!(
                "settlement {}: expected {} → {}, found {}",
                record.settlement_id, from, to, current.state
            ))),
            None => Err(TransferError::SettlementNotFound(
                record.settlement_id.clone(),
            )),
        }
    }

    /// Re-run every unfinished record. Returns how many reached a terminal
    /// state.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<usize, TransferError> {
        let unfinished = self.log.list_unfinished().await?;
        if unfinished.is_empty() {
            return Ok(0);
        }
        info!(count = unfinished.len(), "Recovering unfinished settlements");

        let mut finished = 0;
        for record in unfinished {
            let settlement_id = record.settlement_id.clone();
            match self.execute(record, now).await {
                Ok(outcome) => {
                    debug!(settlement_id = %settlement_id, ?outcome, "Settlement recovered");
                    finished += 1;
                }
                Err(e) => {
                    error!(settlement_id = %settlement_id, error = %e, "Settlement recovery failed");
                }
            }
        }
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{
        AccountState, MemoryLedger, MemoryStatusStore, SubscriberStatus,
    };
    use chrono::{Duration, TimeZone};

    struct Harness {
        coordinator: SettlementCoordinator,
        log: Arc<MemorySettlementLog>,
        ledger: Arc<MemoryLedger>,
        status: Arc<MemoryStatusStore>,
    }

    async fn harness(sender: RawAmount, recipient: RawAmount) -> Harness {
        let log = Arc::new(MemorySettlementLog::new());
        let ledger = Arc::new(MemoryLedger::new());
        let status = Arc::new(MemoryStatusStore::new());
        for (imsi, balance) in [("IMSI001", sender), ("IMSI002", recipient)] {
            let imsi = Imsi::new(imsi);
            ledger.create_subscriber(&imsi).await.unwrap();
            ledger.add_credit(&imsi, balance).await.unwrap();
            status
                .create_status(&imsi, &SubscriberStatus::new(AccountState::ACTIVE, None))
                .await
                .unwrap();
        }
        Harness {
            coordinator: SettlementCoordinator::new(log.clone(), ledger.clone(), status.clone()),
            log,
            ledger,
            status,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn record(amount: RawAmount) -> SettlementRecord {
        let pending = PendingTransfer::new(
            ConfirmationCode::parse("48213").unwrap(),
            now(),
            Imsi::new("IMSI001"),
            Imsi::new("IMSI002"),
            amount,
        );
        SettlementRecord::from_pending(&pending, 30, now())
    }

    #[tokio::test]
    async fn test_settle_conserves_value() {
        let h = harness(5_000, 0).await;
        let rec = record(2_000);
        let id = rec.settlement_id.clone();

        let outcome = h.coordinator.settle(rec, now()).await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Applied {
                sender_before: 5_000,
                sender_after: 3_000,
                recipient_before: 0,
                recipient_after: 2_000,
                validity: Some(now().date_naive() + Duration::days(30)),
            }
        );
        assert_eq!(h.log.get(&id).await.unwrap().unwrap().state, SettlementState::Applied);
        assert_eq!(
            h.status.get_status(&Imsi::new("IMSI002")).await.unwrap().validity,
            Some(now().date_naive() + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn test_short_funds_fail_without_moving_value() {
        let h = harness(1_000, 0).await;
        let rec = record(2_000);
        let id = rec.settlement_id.clone();

        let outcome = h.coordinator.settle(rec, now()).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Declined { balance: 1_000 });
        let stored = h.log.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, SettlementState::Failed);
        assert_eq!(stored.error.as_deref(), Some("insufficient funds"));
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI002")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recovery_finishes_debited_record_once() {
        let h = harness(5_000, 0).await;
        let mut rec = record(2_000);
        // Crash after the debit leg: the counter is debited, the journal says DEBITED.
        h.ledger
            .apply_leg(&rec.from, &rec.settlement_id, Leg::Debit, rec.amount)
            .await
            .unwrap();
        rec.state = SettlementState::Debited;
        h.log.create(&rec).await.unwrap();

        assert_eq!(h.coordinator.recover(now()).await.unwrap(), 1);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 3_000);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI002")).await.unwrap(), 2_000);

        // Nothing left to recover; a forced replay changes nothing.
        assert_eq!(h.coordinator.recover(now()).await.unwrap(), 0);
        let mut replay = h.log.get(&rec.settlement_id).await.unwrap().unwrap();
        replay.state = SettlementState::Debited;
        let outcome = h.coordinator.execute(replay, now()).await.unwrap();
        assert!(matches!(
            outcome,
            SettlementOutcome::Applied {
                sender_after: 3_000,
                recipient_after: 2_000,
                ..
            }
        ));
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 3_000);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI002")).await.unwrap(), 2_000);
    }

    #[tokio::test]
    async fn test_recovery_of_recorded_record_runs_both_legs() {
        let h = harness(5_000, 100).await;
        let rec = record(500);
        h.log.create(&rec).await.unwrap();

        assert_eq!(h.coordinator.recover(now()).await.unwrap(), 1);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 4_500);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI002")).await.unwrap(), 600);
        assert!(h.log.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_recipient_reverses_debit() {
        let h = harness(5_000, 0).await;
        h.ledger.delete_subscriber(&Imsi::new("IMSI002")).await.unwrap();
        let rec = record(2_000);
        let id = rec.settlement_id.clone();

        let outcome = h.coordinator.settle(rec, now()).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Reversed { balance: 5_000 });
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 5_000);
        let stored = h.log.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, SettlementState::Failed);
        assert_eq!(stored.error.as_deref(), Some("recipient not found"));
        assert!(h.log.list_unfinished().await.unwrap().is_empty());

        // Replaying the reversal refunds nothing twice.
        let mut replay = stored;
        replay.state = SettlementState::Debited;
        let outcome = h.coordinator.execute(replay, now()).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Reversed { balance: 5_000 });
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn test_recovery_reverses_debited_record_without_recipient() {
        let h = harness(5_000, 0).await;
        let mut rec = record(2_000);
        h.ledger
            .apply_leg(&rec.from, &rec.settlement_id, Leg::Debit, rec.amount)
            .await
            .unwrap();
        rec.state = SettlementState::Debited;
        h.log.create(&rec).await.unwrap();
        h.ledger.delete_subscriber(&Imsi::new("IMSI002")).await.unwrap();

        assert_eq!(h.coordinator.recover(now()).await.unwrap(), 1);
        assert_eq!(h.ledger.get_balance(&Imsi::new("IMSI001")).await.unwrap(), 5_000);
        assert_eq!(
            h.log.get(&rec.settlement_id).await.unwrap().unwrap().state,
            SettlementState::Failed
        );
        assert_eq!(h.coordinator.recover(now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_status_row_still_applies_credit() {
        let h = harness(5_000, 0).await;
        h.status.delete_status(&Imsi::new("IMSI002")).await.unwrap();
        let rec = record(2_000);
        let id = rec.settlement_id.clone();

        let outcome = h.coordinator.settle(rec, now()).await.unwrap();
        assert!(matches!(
            outcome,
            SettlementOutcome::Applied {
                sender_after: 3_000,
                recipient_after: 2_000,
                validity: None,
                ..
            }
        ));
        assert_eq!(h.log.get(&id).await.unwrap().unwrap().state, SettlementState::Applied);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_state() {
        let log = MemorySettlementLog::new();
        let rec = record(10);
        log.create(&rec).await.unwrap();
        assert!(
            log.update_state_if(&rec.settlement_id, SettlementState::Recorded, SettlementState::Debited, now())
                .await
                .unwrap()
        );
        assert!(
            !log.update_state_if(&rec.settlement_id, SettlementState::Recorded, SettlementState::Debited, now())
                .await
                .unwrap()
        );
        assert!(matches!(
            log.update_state_if("missing", SettlementState::Recorded, SettlementState::Debited, now())
                .await,
            Err(TransferError::SettlementNotFound(_))
        ));
    }
}
