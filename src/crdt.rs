//! PN-Counter CRDT used as the canonical subscriber balance.
//!
//! A balance is two grow-only maps keyed by actor id: `p` accumulates credits,
//! `n` accumulates debits, and the value is `sum(p) - sum(n)`. Replicas merge
//! by taking, per actor, the maximum of each map. That join is commutative,
//! associative and idempotent, so the cloud and a cell site can both mutate a
//! balance while disconnected and still converge without losing either update.
//!
//! Every counter instance carries a local actor id that is NOT serialized. A
//! counter loaded from storage gets a fresh id, so two independent
//! load-modify-store cycles never write to the same map entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core_types::RawAmount;

/// Raised when a serialized counter (or status row) cannot be trusted.
///
/// This indicates data corruption and is surfaced to operators, never repaired.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid state: {0}")]
pub struct InvalidStateError(pub String);

/// Serialized counter state: per-actor increment and decrement totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterState {
    pub p: BTreeMap<String, u64>,
    pub n: BTreeMap<String, u64>,
}

/// Which accumulator an actor entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
}

#[derive(Debug, Clone)]
pub struct PNCounter {
    actor: String,
    state: CounterState,
}

impl PNCounter {
    /// Zero counter with a fresh, unique actor id.
    pub fn new() -> Self {
        Self {
            actor: ulid::Ulid::new().to_string(),
            state: CounterState::default(),
        }
    }

    /// Rebind this counter to a caller-chosen actor.
    ///
    /// Writes under a deterministic actor are idempotent at the entry level:
    /// the settlement journal uses the settlement id so a replayed leg can be
    /// detected instead of applied twice.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    pub fn increment(&mut self, amount: u64) {
        let entry = self.state.p.entry(self.actor.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn decrement(&mut self, amount: u64) {
        let entry = self.state.n.entry(self.actor.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Sum of all increments across actors.
    pub fn positive_total(&self) -> u128 {
        self.state.p.values().map(|v| *v as u128).sum()
    }

    /// Sum of all decrements across actors.
    pub fn negative_total(&self) -> u128 {
        self.state.n.values().map(|v| *v as u128).sum()
    }

    /// `sum(P) - sum(N)`, saturated into the raw amount range.
    pub fn value(&self) -> RawAmount {
        let diff = self.positive_total() as i128 - self.negative_total() as i128;
        diff.clamp(RawAmount::MIN as i128, RawAmount::MAX as i128) as RawAmount
    }

    /// True if `actor` already has an entry on the given side.
    pub fn has_entry(&self, side: Side, actor: &str) -> bool {
        match side {
            Side::Positive => self.state.p.contains_key(actor),
            Side::Negative => self.state.n.contains_key(actor),
        }
    }

    /// Join two replicas. The result keeps `a`'s local actor id.
    pub fn merge(a: &PNCounter, b: &PNCounter) -> PNCounter {
        let mut merged = a.clone();
        merged.merge_from(b);
        merged
    }

    /// In-place join with another replica.
    pub fn merge_from(&mut self, other: &PNCounter) {
        for (actor, v) in &other.state.p {
            let entry = self.state.p.entry(actor.clone()).or_insert(0);
            *entry = (*entry).max(*v);
        }
        for (actor, v) in &other.state.n {
            let entry = self.state.n.entry(actor.clone()).or_insert(0);
            *entry = (*entry).max(*v);
        }
    }

    pub fn to_json(&self) -> String {
        // A map of String -> u64 always serializes.
        serde_json::to_string(&self.state).unwrap_or_else(|_| String::from("{\"p\":{},\"n\":{}}"))
    }

    pub fn from_json(json: &str) -> Result<Self, InvalidStateError> {
        let state: CounterState = serde_json::from_str(json)
            .map_err(|e| InvalidStateError(format!("malformed counter '{}': {}", json, e)))?;
        Ok(Self::from_counter_state(state))
    }

    /// Build from an already-decoded JSON value (e.g. a cloud sync payload).
    pub fn from_state(value: &serde_json::Value) -> Result<Self, InvalidStateError> {
        let state: CounterState = serde_json::from_value(value.clone())
            .map_err(|e| InvalidStateError(format!("malformed counter {}: {}", value, e)))?;
        Ok(Self::from_counter_state(state))
    }

    fn from_counter_state(state: CounterState) -> Self {
        Self {
            actor: ulid::Ulid::new().to_string(),
            state,
        }
    }
}

impl Default for PNCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality is on replicated state only; local actor ids are irrelevant.
impl PartialEq for PNCounter {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for PNCounter {}

impl Serialize for PNCounter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.state.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PNCounter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = CounterState::deserialize(deserializer)?;
        Ok(Self::from_counter_state(state))
    }
}
