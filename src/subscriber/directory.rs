//! Subscriber Directory
//!
//! Number ↔ IMSI resolution owned by the radio-stack HLR. The service only
//! consumes it; `MemoryDirectory` stands in for the HLR in standalone mode
//! and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::SubscriberError;
use crate::core_types::Imsi;

#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn get_imsi_from_number(&self, number: &str) -> Result<Imsi, SubscriberError>;

    /// Numbers in provisioning order; the first is the primary number.
    async fn get_numbers_from_imsi(&self, imsi: &Imsi) -> Result<Vec<String>, SubscriberError>;

    /// Register a new subscriber with its primary number.
    async fn provision(&self, imsi: &Imsi, number: &str) -> Result<(), SubscriberError>;

    async fn add_number(&self, imsi: &Imsi, number: &str) -> Result<(), SubscriberError>;

    async fn deprovision(&self, imsi: &Imsi) -> Result<(), SubscriberError>;

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError>;

    async fn primary_number(&self, imsi: &Imsi) -> Result<String, SubscriberError> {
        self.get_numbers_from_imsi(imsi)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SubscriberError::NotFound(format!("{} has no number", imsi)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    numbers: DashMap<String, Imsi>,
    by_imsi: DashMap<Imsi, Vec<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriberDirectory for MemoryDirectory {
    async fn get_imsi_from_number(&self, number: &str) -> Result<Imsi, SubscriberError> {
        self.numbers
            .get(number)
            .map(|r| r.value().clone())
            .ok_or_else(|| SubscriberError::NotFound(number.to_string()))
    }

    async fn get_numbers_from_imsi(&self, imsi: &Imsi) -> Result<Vec<String>, SubscriberError> {
        self.by_imsi
            .get(imsi)
            .map(|r| r.value().clone())
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))
    }

    async fn provision(&self, imsi: &Imsi, number: &str) -> Result<(), SubscriberError> {
        if self.numbers.contains_key(number) {
            return Err(SubscriberError::Duplicate(number.to_string()));
        }
        match self.by_imsi.entry(imsi.clone()) {
            Entry::Occupied(_) => Err(SubscriberError::Duplicate(imsi.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(vec![number.to_string()]);
                self.numbers.insert(number.to_string(), imsi.clone());
                Ok(())
            }
        }
    }

    async fn add_number(&self, imsi: &Imsi, number: &str) -> Result<(), SubscriberError> {
        let mut numbers = self
            .by_imsi
            .get_mut(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        match self.numbers.entry(number.to_string()) {
            Entry::Occupied(owner) if owner.get() == imsi => Ok(()),
            Entry::Occupied(_) => Err(SubscriberError::Duplicate(number.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(imsi.clone());
                numbers.push(number.to_string());
                Ok(())
            }
        }
    }

    async fn deprovision(&self, imsi: &Imsi) -> Result<(), SubscriberError> {
        let (_, numbers) = self
            .by_imsi
            .remove(imsi)
            .ok_or_else(|| SubscriberError::NotFound(imsi.to_string()))?;
        for number in numbers {
            self.numbers.remove(&number);
        }
        Ok(())
    }

    async fn list_imsis(&self) -> Result<Vec<Imsi>, SubscriberError> {
        let mut imsis: Vec<Imsi> = self.by_imsi.iter().map(|r| r.key().clone()).collect();
        imsis.sort();
        Ok(imsis)
    }
}
