//! Subscriber Ledger Store
//!
//! Maps IMSI to a serialized PN-Counter balance. The ledger is the only
//! component allowed to mutate a stored counter.
//!
//! # Transaction model
//!
//! Every mutation is one read-modify-write of a single subscriber row under
//! a row lock ([`LedgerStore::modify_balance`]). Two concurrent operations on
//! the same IMSI serialize; there is no cross-row transaction. Multi-row
//! work (a transfer) is coordinated by the settlement journal on top of the
//! idempotent [`LedgerStore::apply_leg`].

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;

use super::error::SubscriberError;
use crate::core_types::{Imsi, RawAmount};
use crate::crdt::{PNCounter, Side};

/// Mutation applied under the row lock. Returns whether the counter changed.
pub type BalanceMutation<'a> =
    Box<dyn FnOnce(&mut PNCounter) -> Result<bool, SubscriberError> + Send + 'a>;

/// One half of a settled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Debit,
    Credit,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Debit => "debit",
            Leg::Credit => "credit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    Applied { balance_after: RawAmount },
    AlreadyApplied { balance: RawAmount },
}

impl LegOutcome {
    pub fn balance(&self) -> RawAmount {
        match self {
            LegOutcome::Applied { balance_after } => *balance_after,
            LegOutcome::AlreadyApplied { balance } => *balance,
        }
    }
}

/// Counter actor used for a settlement's legs.
pub fn settlement_actor(settlement_id: &str) -> String {
    format!("xfer:{}", settlement_id)
}

/// Parse a credit delta received as text (cloud pushes, operator tools).
pub fn parse_delta(raw: &str) -> Result<RawAmount, SubscriberError> {
    raw.trim().parse::<RawAmount>().map_err(|_| {
        SubscriberError::InvalidAmount(format!("value {} is not an integer amount", raw))
    })
}

/// Coerce a credit amount to a magnitude. Negative input is a caller defect.
fn credit_magnitude(imsi: &Imsi, amount: RawAmount) -> RawAmount {
    if amount < 0 {
        warn!(imsi = %imsi, amount, "negative credit delta");
        amount.saturating_neg()
    } else {
        amount
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a zero-balance row.
    async fn create_subscriber(&self, imsi: &Imsi) -> Result<(), SubscriberError>;

    async fn delete_subscriber(&self, imsi: &Imsi) -> Result<(), SubscriberError>;

    /// Explicit existence query; a zero balance is still a subscriber.
    async fn contains(&self, imsi: &Imsi) -> Result<bool, SubscriberError>;

    async fn balance_counter(&self, imsi: &Imsi) -> Result<PNCounter, SubscriberError>;

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError>;

    /// Row-locked read-modify-write. Writes back only if the mutation
    /// reports a change. Returns the counter as stored afterwards.
    async fn modify_balance(
        &self,
        imsi: &Imsi,
        mutation: BalanceMutation<'_>,
    ) -> Result<(PNCounter, bool), SubscriberError>;

    async fn get_balance(&self, imsi: &Imsi) -> Result<RawAmount, SubscriberError> {
        Ok(self.balance_counter(imsi).await?.value())
    }

    /// Adjust by a signed delta; decrements clamp at zero.
    ///
    /// Returns the balance afterwards.
    async fn adjust_credit(
        &self,
        imsi: &Imsi,
        delta: RawAmount,
    ) -> Result<RawAmount, SubscriberError> {
        if delta == 0 {
            return self.get_balance(imsi).await;
        }
        let (counter, _) = self
            .modify_balance(
                imsi,
                Box::new(move |bal: &mut PNCounter| {
                    if delta > 0 {
                        bal.increment(delta as u64);
                    } else {
                        let current = bal.value().max(0) as u64;
                        bal.decrement(delta.unsigned_abs().min(current));
                    }
                    Ok(true)
                }),
            )
            .await?;
        Ok(counter.value())
    }

    async fn add_credit(&self, imsi: &Imsi, amount: RawAmount) -> Result<RawAmount, SubscriberError> {
        self.adjust_credit(imsi, credit_magnitude(imsi, amount)).await
    }

    async fn subtract_credit(
        &self,
        imsi: &Imsi,
        amount: RawAmount,
    ) -> Result<RawAmount, SubscriberError> {
        self.adjust_credit(imsi, -credit_magnitude(imsi, amount)).await
    }

    /// Merge a counter pushed from another system of record.
    async fn update_balance(
        &self,
        imsi: &Imsi,
        incoming: &PNCounter,
    ) -> Result<RawAmount, SubscriberError> {
        let (counter, _) = self
            .modify_balance(
                imsi,
                Box::new(move |bal: &mut PNCounter| {
                    bal.merge_from(incoming);
                    Ok(true)
                }),
            )
            .await?;
        Ok(counter.value())
    }

    /// Apply one settlement leg exactly once.
    ///
    /// The leg is written under the settlement's own counter actor, so a
    /// replay finds the existing entry and does nothing. A debit larger than
    /// the balance fails with `InsufficientFunds` instead of clamping.
    async fn apply_leg(
        &self,
        imsi: &Imsi,
        settlement_id: &str,
        leg: Leg,
        amount: RawAmount,
    ) -> Result<LegOutcome, SubscriberError> {
        if amount <= 0 {
            return Err(SubscriberError::InvalidAmount(format!(
                "{} leg of {} must be positive, got {}",
                leg.as_str(),
                settlement_id,
                amount
            )));
        }
        let actor = settlement_actor(settlement_id);
        let owner = imsi.to_string();
        let (counter, changed) = self
            .modify_balance(
                imsi,
                Box::new(move |bal: &mut PNCounter| {
                    let side = match leg {
                        Leg::Debit => Side::Negative,
                        Leg::Credit => Side::Positive,
                    };
                    if bal.has_entry(side, &actor) {
                        return Ok(false);
                    }
                    let mut scoped = bal.clone().with_actor(actor);
                    match leg {
                        Leg::Debit => {
                            let balance = scoped.value();
                            if balance < amount {
                                return Err(SubscriberError::InsufficientFunds {
                                    imsi: owner,
                                    balance,
                                    requested: amount,
                                });
                            }
                            scoped.decrement(amount as u64);
                        }
                        Leg::Credit => scoped.increment(amount as u64),
                    }
                    bal.merge_from(&scoped);
                    Ok(true)
                }),
            )
            .await?;
        Ok(if changed {
            LegOutcome::Applied {
                balance_after: counter.value(),
            }
        } else {
            LegOutcome::AlreadyApplied {
                balance: counter.value(),
            }
        })
    }
}

/// In-memory ledger. Rows hold serialized counters, exactly as persisted.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: DashMap<Imsi, String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a raw row (corruption tests, fixtures).
    pub fn put_raw(&self, imsi: &Imsi, balance_json: impl Into<String>) {
        self.rows.insert(imsi.clone(), balance_json.into());
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_subscriber(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        match self.rows.entry(imsi.clone()) {
            Entry::Occupied(_) => Err(SubscriberError::Duplicate(imsi.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(PNCounter::new().to_json());
                Ok(())
            }
        }
    }

    async fn delete_subscriber(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        self.rows
            .remove(imsi)
            .map(|_| ())
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))
    }

    async fn contains(&self, imsi: &Imsi) -> Result<bool, SubscriberError> {
        Ok(self.rows.contains_key(imsi))
    }

    async fn balance_counter(&self, imsi: &Imsi) -> Result<PNCounter, SubscriberError> {
        let row = self
            .rows
            .get(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        Ok(PNCounter::from_json(row.value())?)
    }

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError> {
        let mut imsis: Vec<Imsi> = self.rows.iter().map(|r| r.key().clone()).collect();
        imsis.sort();
        Ok(imsis)
    }

    async fn modify_balance(
        &self,
        imsi: &Imsi,
        mutation: BalanceMutation<'_>,
    ) -> Result<(PNCounter, bool), SubscriberError> {
        // The shard write guard is the row lock.
        let mut row = self
            .rows
            .get_mut(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        let mut counter = PNCounter::from_json(row.value())?;
        let changed = mutation(&mut counter)?;
        if changed {
            *row = counter.to_json();
        }
        Ok((counter, changed))
    }
}
