use std::sync::Arc;

use crate::credit_transfer::CreditTransferEngine;
use crate::db::Database;
use crate::subscriber::SubscriberSync;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Protocol engine
    pub engine: Arc<CreditTransferEngine>,
    /// Cloud push handler over the engine's stores
    pub sync: Arc<SubscriberSync>,
    /// PostgreSQL pool owner, when not running in-memory
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(engine: Arc<CreditTransferEngine>, pg_db: Option<Arc<Database>>) -> Self {
        let sync = Arc::new(engine.subscriber_sync());
        Self {
            engine,
            sync,
            pg_db,
        }
    }
}
