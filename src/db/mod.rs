//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Tables used by the PostgreSQL stores. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS subscribers (
        imsi TEXT PRIMARY KEY,
        balance TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS subscribers_status (
        imsi TEXT PRIMARY KEY,
        status TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS subscriber_numbers (
        number TEXT PRIMARY KEY,
        imsi TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_subscriber_numbers_imsi ON subscriber_numbers (imsi)",
    r#"CREATE TABLE IF NOT EXISTS pending_transfers (
        code TEXT PRIMARY KEY,
        created_at DOUBLE PRECISION NOT NULL,
        from_acct TEXT NOT NULL,
        to_acct TEXT NOT NULL,
        amount BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS denomination_store (
        id INTEGER PRIMARY KEY,
        start_amount BIGINT NOT NULL,
        end_amount BIGINT NOT NULL,
        validity_days INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS notification (
        event TEXT PRIMARY KEY,
        message TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transfer_settlements (
        settlement_id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        from_acct TEXT NOT NULL,
        to_acct TEXT NOT NULL,
        amount BIGINT NOT NULL,
        validity_days INTEGER NOT NULL,
        state SMALLINT NOT NULL,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_transfer_settlements_state ON transfer_settlements (state)",
    r#"CREATE TABLE IF NOT EXISTS transfer_events (
        id BIGSERIAL PRIMARY KEY,
        imsi TEXT NOT NULL,
        old_balance BIGINT NOT NULL,
        new_balance BIGINT NOT NULL,
        reason TEXT NOT NULL,
        from_number TEXT,
        to_number TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_transfer_events_imsi ON transfer_events (imsi)",
];

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create missing tables and indexes.
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(tables = SCHEMA.len(), "Database schema ready");
        Ok(())
    }
}

/// True for a unique/primary-key constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
