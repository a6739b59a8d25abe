//! Subscriber Status Store
//!
//! Per-subscriber `{state, validity, ie_count}`:
//! - `state`: lifecycle phase plus a blocked flag (rendered as a `*` suffix)
//! - `validity`: date after which service lapses
//! - `ie_count`: consecutive invalid (abuse-flagged) transfer attempts

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::SubscriberError;
use crate::core_types::Imsi;
use crate::crdt::InvalidStateError;

/// Lifecycle phase without the blocked flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Active,
    FirstExpired,
    Expired,
    Recycle,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Active => "active",
            LifecyclePhase::FirstExpired => "first_expired",
            LifecyclePhase::Expired => "expired",
            LifecyclePhase::Recycle => "recycle",
        }
    }
}

/// Account state as stored: `active`, `active*`, `first_expired`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountState {
    pub phase: LifecyclePhase,
    pub blocked: bool,
}

impl AccountState {
    pub const ACTIVE: AccountState = AccountState {
        phase: LifecyclePhase::Active,
        blocked: false,
    };

    pub fn new(phase: LifecyclePhase, blocked: bool) -> Self {
        Self { phase, blocked }
    }

    /// Same phase with the blocked suffix.
    pub fn blocked(self) -> Self {
        Self {
            blocked: true,
            ..self
        }
    }

    /// Unblocked `active`: the only state allowed to originate traffic or
    /// transfer credit.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.phase == LifecyclePhase::Active && !self.blocked
    }

    /// States that may still receive SMS/credit.
    pub fn can_receive(&self) -> bool {
        matches!(
            self.phase,
            LifecyclePhase::Active | LifecyclePhase::FirstExpired
        )
    }

    #[inline]
    pub fn is_recycled(&self) -> bool {
        self.phase == LifecyclePhase::Recycle
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase.as_str())?;
        if self.blocked {
            f.write_str("*")?;
        }
        Ok(())
    }
}

impl FromStr for AccountState {
    type Err = InvalidStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (name, blocked) = match lowered.strip_suffix('*') {
            Some(rest) => (rest, true),
            None => (lowered.as_str(), false),
        };
        let phase = match name {
            "active" => LifecyclePhase::Active,
            "first_expired" => LifecyclePhase::FirstExpired,
            "expired" => LifecyclePhase::Expired,
            "recycle" => LifecyclePhase::Recycle,
            _ => return Err(InvalidStateError(format!("unknown account state '{}'", s))),
        };
        Ok(Self { phase, blocked })
    }
}

impl TryFrom<String> for AccountState {
    type Error = InvalidStateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountState> for String {
    fn from(state: AccountState) -> Self {
        state.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStatus {
    pub state: AccountState,
    #[serde(default, deserialize_with = "deserialize_validity")]
    pub validity: Option<NaiveDate>,
    #[serde(default)]
    pub ie_count: u32,
}

impl SubscriberStatus {
    pub fn new(state: AccountState, validity: Option<NaiveDate>) -> Self {
        Self {
            state,
            validity,
            ie_count: 0,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, InvalidStateError> {
        serde_json::from_str(json)
            .map_err(|e| InvalidStateError(format!("malformed status '{}': {}", json, e)))
    }
}

/// Accepts `null`, `""`, `"None"`, `YYYY-MM-DD`, or a timestamp starting
/// with a date (cloud pushes send `YYYY-MM-DD HH:MM:SS`).
pub(crate) fn deserialize_validity<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| D::Error::custom(format!("invalid validity '{}': {}", raw, e)))
}

/// Mutation applied under the row lock.
pub type StatusMutation<'a> =
    Box<dyn FnOnce(&mut SubscriberStatus) -> Result<(), SubscriberError> + Send + 'a>;

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get_status(&self, imsi: &Imsi) -> Result<SubscriberStatus, SubscriberError>;

    async fn create_status(
        &self,
        imsi: &Imsi,
        status: &SubscriberStatus,
    ) -> Result<(), SubscriberError>;

    async fn delete_status(&self, imsi: &Imsi) -> Result<(), SubscriberError>;

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError>;

    /// Row-locked read-modify-write; returns the stored status afterwards.
    async fn modify_status(
        &self,
        imsi: &Imsi,
        mutation: StatusMutation<'_>,
    ) -> Result<SubscriberStatus, SubscriberError>;

    async fn update_status(
        &self,
        imsi: &Imsi,
        status: SubscriberStatus,
    ) -> Result<(), SubscriberError> {
        self.modify_status(
            imsi,
            Box::new(move |current: &mut SubscriberStatus| {
                *current = status;
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }

    /// Count one invalid attempt; reaching `max_attempts` blocks the account
    /// and resets the counter.
    async fn set_invalid_count(
        &self,
        imsi: &Imsi,
        max_attempts: u32,
    ) -> Result<SubscriberStatus, SubscriberError> {
        self.modify_status(
            imsi,
            Box::new(move |status: &mut SubscriberStatus| {
                status.ie_count = status.ie_count.saturating_add(1);
                if status.ie_count >= max_attempts {
                    status.state = status.state.blocked();
                    status.ie_count = 0;
                }
                Ok(())
            }),
        )
        .await
    }

    async fn reset_invalid_count(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        self.modify_status(
            imsi,
            Box::new(|status: &mut SubscriberStatus| {
                status.ie_count = 0;
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }

    /// Push validity out to at least `today + additional_days`.
    ///
    /// Validity never moves backward. The phase becomes `active`; a blocked
    /// flag survives (recharging does not unblock).
    async fn extend_validity(
        &self,
        imsi: &Imsi,
        additional_days: u32,
        today: NaiveDate,
    ) -> Result<NaiveDate, SubscriberError> {
        let candidate = today + Duration::days(additional_days as i64);
        let status = self
            .modify_status(
                imsi,
                Box::new(move |status: &mut SubscriberStatus| {
                    let next = match status.validity {
                        Some(existing) if existing > candidate => existing,
                        _ => candidate,
                    };
                    status.validity = Some(next);
                    status.state = AccountState::new(LifecyclePhase::Active, status.state.blocked);
                    Ok(())
                }),
            )
            .await?;
        status
            .validity
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))
    }
}

/// Numbers shorter than this are toll-free service codes without an IMSI.
const TOLL_FREE_MAX_LEN: usize = 4;

/// Service gate consulted by the telephony switch.
///
/// Originating requires `active`. As a destination, `active`, `active*`,
/// `first_expired` and `first_expired*` may receive; toll-free short codes
/// always may. Unknown subscribers are refused.
pub async fn service_allowed(store: &dyn StatusStore, subscriber: &str, as_destination: bool) -> bool {
    if as_destination && subscriber.len() < TOLL_FREE_MAX_LEN {
        return true;
    }
    match store.get_status(&Imsi::new(subscriber)).await {
        Ok(status) if as_destination => status.state.can_receive(),
        Ok(status) => status.state.is_active(),
        Err(e) => {
            tracing::debug!(subscriber, error = %e, "service check on unknown subscriber");
            false
        }
    }
}

/// In-memory status store holding the serialized JSON rows.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    rows: DashMap<Imsi, String>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_raw(&self, imsi: &Imsi, status_json: impl Into<String>) {
        self.rows.insert(imsi.clone(), status_json.into());
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get_status(&self, imsi: &Imsi) -> Result<SubscriberStatus, SubscriberError> {
        let row = self
            .rows
            .get(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        Ok(SubscriberStatus::from_json(row.value())?)
    }

    async fn create_status(
        &self,
        imsi: &Imsi,
        status: &SubscriberStatus,
    ) -> Result<(), SubscriberError> {
        match self.rows.entry(imsi.clone()) {
            Entry::Occupied(_) => Err(SubscriberError::Duplicate(imsi.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(status.to_json());
                Ok(())
            }
        }
    }

    async fn delete_status(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        self.rows
            .remove(imsi)
            .map(|_| ())
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))
    }

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError> {
        let mut imsis: Vec<Imsi> = self.rows.iter().map(|r| r.key().clone()).collect();
        imsis.sort();
        Ok(imsis)
    }

    async fn modify_status(
        &self,
        imsi: &Imsi,
        mutation: StatusMutation<'_>,
    ) -> Result<SubscriberStatus, SubscriberError> {
        let mut row = self
            .rows
            .get_mut(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        let mut status = SubscriberStatus::from_json(row.value())?;
        mutation(&mut status)?;
        *row = status.to_json();
        Ok(status)
    }
}
