//! PostgreSQL transfer stores

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::error::TransferError;
use super::events::{TransferEvent, TransferEventLog};
use super::messages::{NotificationError, NotificationStore};
use super::pending::PendingTransferStore;
use super::settlement::{SettlementLog, SettlementRecord};
use super::state::SettlementState;
use super::types::{ConfirmationCode, PendingTransfer};
use crate::core_types::Imsi;
use crate::db::is_unique_violation;

/// Pending rows store `created_at` as epoch seconds.
fn to_epoch(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn from_epoch(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64).unwrap_or_default()
}

// ============================================================================
// Pending transfers
// ============================================================================

pub struct PgPendingStore {
    pool: PgPool,
}

impl PgPendingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pending(row: &PgRow) -> Result<PendingTransfer, TransferError> {
        let code: String = row.get("code");
        let code = ConfirmationCode::parse(&code)
            .ok_or_else(|| TransferError::DatabaseError(format!("malformed code '{}'", code)))?;
        Ok(PendingTransfer::new(
            code,
            from_epoch(row.get("created_at")),
            Imsi::new(row.get::<String, _>("from_acct")),
            Imsi::new(row.get::<String, _>("to_acct")),
            row.get("amount"),
        ))
    }
}

#[async_trait]
impl PendingTransferStore for PgPendingStore {
    async fn insert(&self, pending: &PendingTransfer) -> Result<(), TransferError> {
        sqlx::query(
            r#"INSERT INTO pending_transfers (code, created_at, from_acct, to_acct, amount)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(pending.code.as_str())
        .bind(to_epoch(pending.created_at))
        .bind(pending.from.as_str())
        .bind(pending.to.as_str())
        .bind(pending.amount)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TransferError::DuplicateCode(pending.code.to_string())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>, window: Duration) -> Result<usize, TransferError> {
        let cutoff = to_epoch(now - window);
        let result = sqlx::query("DELETE FROM pending_transfers WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn find(
        &self,
        code: &ConfirmationCode,
        from: &Imsi,
    ) -> Result<Option<PendingTransfer>, TransferError> {
        let row = sqlx::query(
            r#"SELECT code, created_at, from_acct, to_acct, amount
               FROM pending_transfers WHERE code = $1 AND from_acct = $2"#,
        )
        .bind(code.as_str())
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_pending).transpose()
    }

    async fn remove(&self, code: &ConfirmationCode, from: &Imsi) -> Result<bool, TransferError> {
        let result = sqlx::query("DELETE FROM pending_transfers WHERE code = $1 AND from_acct = $2")
            .bind(code.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn len(&self) -> Result<usize, TransferError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pending_transfers")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n").max(0) as usize)
    }
}

// ============================================================================
// Settlement journal
// ============================================================================

pub struct PgSettlementLog {
    pool: PgPool,
}

impl PgSettlementLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<SettlementRecord, TransferError> {
        let state_id: i16 = row.get("state");
        let state = SettlementState::from_id(state_id).ok_or_else(|| {
            TransferError::InvalidStateTransition(format!("unknown settlement state {}", state_id))
        })?;
        let code: String = row.get("code");
        let code = ConfirmationCode::parse(&code)
            .ok_or_else(|| TransferError::DatabaseError(format!("malformed code '{}'", code)))?;
        Ok(SettlementRecord {
            settlement_id: row.get("settlement_id"),
            code,
            from: Imsi::new(row.get::<String, _>("from_acct")),
            to: Imsi::new(row.get::<String, _>("to_acct")),
            amount: row.get("amount"),
            validity_days: row.get::<i32, _>("validity_days").max(0) as u32,
            state,
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn cas(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"UPDATE transfer_settlements
               SET state = $3, error = COALESCE($4, error), updated_at = $5
               WHERE settlement_id = $1 AND state = $2"#,
        )
        .bind(settlement_id)
        .bind(from.id())
        .bind(to.id())
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get(settlement_id).await? {
            Some(_) => Ok(false),
            None => Err(TransferError::SettlementNotFound(settlement_id.to_string())),
        }
    }
}

const SETTLEMENT_COLUMNS: &str = "settlement_id, code, from_acct, to_acct, amount, validity_days, \
                                  state, error, created_at, updated_at";

#[async_trait]
impl SettlementLog for PgSettlementLog {
    async fn create(&self, record: &SettlementRecord) -> Result<(), TransferError> {
        sqlx::query(
            r#"INSERT INTO transfer_settlements
               (settlement_id, code, from_acct, to_acct, amount, validity_days,
                state, error, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&record.settlement_id)
        .bind(record.code.as_str())
        .bind(record.from.as_str())
        .bind(record.to.as_str())
        .bind(record.amount)
        .bind(record.validity_days as i32)
        .bind(record.state.id())
        .bind(record.error.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TransferError::InvalidStateTransition(format!(
                    "settlement {} already recorded",
                    record.settlement_id
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, TransferError> {
        let sql = format!(
            "SELECT {} FROM transfer_settlements WHERE settlement_id = $1",
            SETTLEMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update_state_if(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        self.cas(settlement_id, from, to, None, at).await
    }

    async fn update_state_with_error(
        &self,
        settlement_id: &str,
        from: SettlementState,
        to: SettlementState,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        self.cas(settlement_id, from, to, Some(error), at).await
    }

    async fn list_unfinished(&self) -> Result<Vec<SettlementRecord>, TransferError> {
        let sql = format!(
            "SELECT {} FROM transfer_settlements WHERE state IN ($1, $2) ORDER BY created_at",
            SETTLEMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(SettlementState::Recorded.id())
            .bind(SettlementState::Debited.id())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}

// ============================================================================
// Transfer events
// ============================================================================

pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferEventLog for PgEventLog {
    async fn record(&self, event: TransferEvent) -> Result<(), TransferError> {
        sqlx::query(
            r#"INSERT INTO transfer_events
               (imsi, old_balance, new_balance, reason, from_number, to_number, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(event.imsi.as_str())
        .bind(event.old_balance)
        .bind(event.new_balance)
        .bind(&event.reason)
        .bind(event.from_number.as_deref())
        .bind(event.to_number.as_deref())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for(&self, imsi: &Imsi) -> Result<Vec<TransferEvent>, TransferError> {
        let rows = sqlx::query(
            r#"SELECT imsi, old_balance, new_balance, reason, from_number, to_number, created_at
               FROM transfer_events WHERE imsi = $1 ORDER BY id"#,
        )
        .bind(imsi.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| TransferEvent {
                imsi: Imsi::new(r.get::<String, _>("imsi")),
                old_balance: r.get("old_balance"),
                new_balance: r.get("new_balance"),
                reason: r.get("reason"),
                from_number: r.get("from_number"),
                to_number: r.get("to_number"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

// ============================================================================
// Notification overrides
// ============================================================================

pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn get_notification(&self, event: &str) -> Result<Option<String>, NotificationError> {
        let row = sqlx::query("SELECT message FROM notification WHERE event = $1")
            .bind(event)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("message")))
    }

    async fn events(&self) -> Result<std::collections::BTreeSet<String>, NotificationError> {
        let rows = sqlx::query("SELECT event FROM notification")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("event")).collect())
    }

    async fn create_notification(&self, event: &str, message: &str) -> Result<(), NotificationError> {
        sqlx::query("INSERT INTO notification (event, message) VALUES ($1, $2)")
            .bind(event)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    NotificationError::Duplicate(event.to_string())
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn update_notification(&self, event: &str, message: &str) -> Result<(), NotificationError> {
        let result = sqlx::query("UPDATE notification SET message = $2 WHERE event = $1")
            .bind(event)
            .bind(message)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound(event.to_string()));
        }
        Ok(())
    }

    async fn delete_notification(&self, event: &str) -> Result<(), NotificationError> {
        let result = sqlx::query("DELETE FROM notification WHERE event = $1")
            .bind(event)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound(event.to_string()));
        }
        Ok(())
    }
}
