//! Cloud → cell-site subscriber sync
//!
//! The cloud periodically pushes the full subscriber set. Local rows absent
//! from the push are removed, present ones are reconciled, new ones are
//! provisioned. Balances reconcile by CRDT merge, never by overwrite.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::directory::SubscriberDirectory;
use super::error::SubscriberError;
use super::ledger::LedgerStore;
use super::status::{AccountState, LifecyclePhase, StatusStore, SubscriberStatus};
use crate::clock::Clock;
use crate::core_types::Imsi;
use crate::credit_transfer::events::{TransferEvent, TransferEventLog};
use crate::crdt::PNCounter;

const ZERO_BALANCE_REASON: &str = "Subscriber expired: setting balance zero (deduct_money)";

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberPush {
    #[serde(default)]
    pub numbers: Vec<String>,
    /// Serialized counter state `{"p": {...}, "n": {...}}`.
    pub balance: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPush {
    pub state: String,
    #[serde(default, deserialize_with = "super::status::deserialize_validity")]
    pub validity: Option<NaiveDate>,
    /// Normally local-only; absent in cloud pushes.
    #[serde(default)]
    pub ie_count: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct SubscriberSync {
    ledger: Arc<dyn LedgerStore>,
    status: Arc<dyn StatusStore>,
    directory: Arc<dyn SubscriberDirectory>,
    events: Arc<dyn TransferEventLog>,
    clock: Arc<dyn Clock>,
}

impl SubscriberSync {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        status: Arc<dyn StatusStore>,
        directory: Arc<dyn SubscriberDirectory>,
        events: Arc<dyn TransferEventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            status,
            directory,
            events,
            clock,
        }
    }

    // ========================================================================
    // Balances
    // ========================================================================

    pub async fn process_balance_update(
        &self,
        pushed: &HashMap<Imsi, SubscriberPush>,
    ) -> Result<SyncSummary, SubscriberError> {
        let local: BTreeSet<Imsi> = self.ledger.list_imsis().await?.into_iter().collect();
        let mut summary = SyncSummary::default();
        let mut to_add: BTreeSet<Imsi> = pushed
            .keys()
            .filter(|imsi| !local.contains(*imsi))
            .cloned()
            .collect();

        for imsi in local.iter().filter(|imsi| !pushed.contains_key(*imsi)) {
            match self.remove_subscriber(imsi).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "Subscriber removal failed");
                    summary.failed += 1;
                }
            }
        }

        for (imsi, sub) in pushed.iter().filter(|(imsi, _)| local.contains(*imsi)) {
            match self.merge_balance(imsi, &sub.balance).await {
                Ok(()) => summary.updated += 1,
                Err(e @ SubscriberError::NotFound(_)) => {
                    warn!(imsi = %imsi, error = %e, "Balance sync fail, subscriber not found");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "Balance sync fail, re-adding");
                    to_add.insert(imsi.clone());
                }
            }
        }

        for imsi in to_add {
            let Some(sub) = pushed.get(&imsi) else {
                continue;
            };
            match self.add_subscriber(&imsi, sub).await {
                Ok(true) => summary.added += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "Balance sync fail on add");
                    summary.failed += 1;
                }
            }
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            failed = summary.failed,
            "Subscriber balance sync complete"
        );
        Ok(summary)
    }

    async fn remove_subscriber(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        if let Err(e) = self.directory.deprovision(imsi).await {
            if !e.is_not_found() {
                return Err(e);
            }
            warn!(imsi = %imsi, "Subscriber missing from directory during removal");
        }
        self.ledger.delete_subscriber(imsi).await
    }

    async fn merge_balance(&self, imsi: &Imsi, state: &serde_json::Value) -> Result<(), SubscriberError> {
        let incoming = PNCounter::from_state(state)?;
        self.ledger.update_balance(imsi, &incoming).await?;
        Ok(())
    }

    /// Returns false if the push carried no number to provision.
    async fn add_subscriber(&self, imsi: &Imsi, sub: &SubscriberPush) -> Result<bool, SubscriberError> {
        let Some((primary, extra)) = sub.numbers.split_first() else {
            warn!(imsi = %imsi, "Pushed subscriber has no numbers, skipping");
            return Ok(false);
        };
        tolerate_duplicate(self.directory.provision(imsi, primary).await)?;
        for number in extra {
            self.directory.add_number(imsi, number).await?;
        }
        tolerate_duplicate(self.ledger.create_subscriber(imsi).await)?;
        self.merge_balance(imsi, &sub.balance).await?;
        Ok(true)
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Apply a status push. Any phase other than `active` zeroes the balance
    /// first (recorded as a transfer event).
    pub async fn process_status_update(
        &self,
        pushed: &HashMap<Imsi, StatusPush>,
    ) -> Result<SyncSummary, SubscriberError> {
        let local: BTreeSet<Imsi> = self.status.list_imsis().await?.into_iter().collect();
        let mut summary = SyncSummary::default();
        let mut to_add: BTreeSet<Imsi> = pushed
            .keys()
            .filter(|imsi| !local.contains(*imsi))
            .cloned()
            .collect();

        for imsi in local.iter().filter(|imsi| !pushed.contains_key(*imsi)) {
            match self.status.delete_status(imsi).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "Status removal failed");
                    summary.failed += 1;
                }
            }
        }

        for (imsi, push) in pushed.iter().filter(|(imsi, _)| local.contains(*imsi)) {
            match self.update_status(imsi, push).await {
                Ok(()) => summary.updated += 1,
                Err(e @ SubscriberError::NotFound(_)) => {
                    warn!(imsi = %imsi, error = %e, "State sync fail, subscriber not found");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "State sync fail, re-adding");
                    to_add.insert(imsi.clone());
                }
            }
        }

        for imsi in to_add {
            let Some(push) = pushed.get(&imsi) else {
                continue;
            };
            match self.add_status(&imsi, push).await {
                Ok(()) => summary.added += 1,
                Err(e) => {
                    error!(imsi = %imsi, error = %e, "State sync fail on add");
                    summary.failed += 1;
                }
            }
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            failed = summary.failed,
            "Subscriber status sync complete"
        );
        Ok(summary)
    }

    async fn update_status(&self, imsi: &Imsi, push: &StatusPush) -> Result<(), SubscriberError> {
        let state: AccountState = push.state.parse()?;
        self.zero_unless_active(imsi, state).await?;
        let validity = push.validity;
        let pushed_count = push.ie_count;
        self.status
            .modify_status(
                imsi,
                Box::new(move |current: &mut SubscriberStatus| {
                    current.state = state;
                    current.validity = validity;
                    if let Some(count) = pushed_count {
                        current.ie_count = count;
                    }
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    async fn add_status(&self, imsi: &Imsi, push: &StatusPush) -> Result<(), SubscriberError> {
        let state: AccountState = push.state.parse()?;
        self.zero_unless_active(imsi, state).await?;
        let status = SubscriberStatus {
            state,
            validity: push.validity,
            ie_count: push.ie_count.unwrap_or(0),
        };
        match self.status.create_status(imsi, &status).await {
            Err(SubscriberError::Duplicate(_)) => self.status.update_status(imsi, status).await,
            other => other,
        }
    }

    async fn zero_unless_active(&self, imsi: &Imsi, state: AccountState) -> Result<(), SubscriberError> {
        if state.phase == LifecyclePhase::Active {
            return Ok(());
        }
        let old_balance = self.ledger.get_balance(imsi).await?;
        if old_balance <= 0 {
            return Ok(());
        }
        let new_balance = self.ledger.subtract_credit(imsi, old_balance).await?;
        let event = TransferEvent::balance_change(
            imsi.clone(),
            old_balance,
            new_balance,
            ZERO_BALANCE_REASON,
            self.clock.now(),
        );
        if let Err(e) = self.events.record(event).await {
            warn!(imsi = %imsi, error = %e, "Failed to record balance zeroing event");
        }
        info!(imsi = %imsi, old_balance, state = %state, "Balance zeroed for inactive subscriber");
        Ok(())
    }
}

fn tolerate_duplicate(result: Result<(), SubscriberError>) -> Result<(), SubscriberError> {
    match result {
        Err(SubscriberError::Duplicate(_)) => Ok(()),
        other => other,
    }
}
