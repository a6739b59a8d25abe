//! Subscriber-facing message catalog
//!
//! Every reply is built from a [`MessageKey`] template with `%(name)s`
//! placeholders. Operators (or the cloud) may override any template in the
//! [`NotificationStore`]; an override that is missing or cannot be filled
//! falls back to the built-in English text.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    TransferSelfFail,
    TransferInvalidAmount,
    TransferAttemptsLeft,
    TransferDenominationError,
    TransferConfirm,
    TransferFromTo,
    TransferDetailsRecipient,
    TransferDetailsSender,
    TransferExpired,
    TransferHelp,
    TransferTryLater,
    InvalidNumber,
    LowCredit,
    SenderDontExists,
    RecipientRecycled,
    AccountBlocked,
    NoValidity,
    TopUpNotAllowed,
    TopUpNotAllowedDetail,
}

impl MessageKey {
    pub const ALL: [MessageKey; 19] = [
        MessageKey::TransferSelfFail,
        MessageKey::TransferInvalidAmount,
        MessageKey::TransferAttemptsLeft,
        MessageKey::TransferDenominationError,
        MessageKey::TransferConfirm,
        MessageKey::TransferFromTo,
        MessageKey::TransferDetailsRecipient,
        MessageKey::TransferDetailsSender,
        MessageKey::TransferExpired,
        MessageKey::TransferHelp,
        MessageKey::TransferTryLater,
        MessageKey::InvalidNumber,
        MessageKey::LowCredit,
        MessageKey::SenderDontExists,
        MessageKey::RecipientRecycled,
        MessageKey::AccountBlocked,
        MessageKey::NoValidity,
        MessageKey::TopUpNotAllowed,
        MessageKey::TopUpNotAllowedDetail,
    ];

    /// Event name used as the override key.
    pub fn event(&self) -> &'static str {
        match self {
            MessageKey::TransferSelfFail => "transfer_self_fail",
            MessageKey::TransferInvalidAmount => "transfer_invalid_amount",
            MessageKey::TransferAttemptsLeft => "transfer_attempts_left",
            MessageKey::TransferDenominationError => "transfer_denomination_error",
            MessageKey::TransferConfirm => "transfer_confirm",
            MessageKey::TransferFromTo => "transfer_from_to",
            MessageKey::TransferDetailsRecipient => "transfer_details_recipient",
            MessageKey::TransferDetailsSender => "transfer_details_sender",
            MessageKey::TransferExpired => "transfer_expired",
            MessageKey::TransferHelp => "transfer_help",
            MessageKey::TransferTryLater => "transfer_try_later",
            MessageKey::InvalidNumber => "invalid_number",
            MessageKey::LowCredit => "low_credit",
            MessageKey::SenderDontExists => "sender_dont_exists",
            MessageKey::RecipientRecycled => "recipient_recycled",
            MessageKey::AccountBlocked => "account_blocked",
            MessageKey::NoValidity => "no_validity",
            MessageKey::TopUpNotAllowed => "top_up_not_allowed",
            MessageKey::TopUpNotAllowedDetail => "top_up_not_allowed_detail",
        }
    }

    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.event() == event)
    }

    /// Built-in English template.
    pub fn base_template(&self) -> &'static str {
        match self {
            MessageKey::TransferSelfFail => {
                "Transaction Failed. Sharing load to your own account is not allowed."
            }
            MessageKey::TransferInvalidAmount => "Transfer amount must be greater than zero.",
            MessageKey::TransferAttemptsLeft => "Your left attempts %(attempts)s",
            MessageKey::TransferDenominationError => "Top-up not under denomination range.",
            MessageKey::TransferConfirm => {
                "Reply to this message with %(code)s to confirm your transfer of %(amount)s \
                 to %(to_number)s Code expires in ten minutes."
            }
            MessageKey::TransferFromTo => "SMS transfer from %(from_number)s to %(to_number)s",
            MessageKey::TransferDetailsRecipient => {
                "You've received %(amount)s. credits from %(from_number)s Now your balance \
                 %(new_balance)s and validity is %(validity)s."
            }
            MessageKey::TransferDetailsSender => {
                "You've transferred %(amount)s to %(to_number)s Your new balance is \
                 %(account_bal)s."
            }
            MessageKey::TransferExpired => {
                "That transfer confirmation code doesn't exist or has expired ."
            }
            MessageKey::TransferHelp => {
                "To transfer credit, reply with a message in the format 'NUMBER*AMOUNT'."
            }
            MessageKey::TransferTryLater => {
                "Your transfer could not be processed right now. Try again later."
            }
            MessageKey::InvalidNumber => "Invalid phone number: %(to_number)s",
            MessageKey::LowCredit => "Your account doesn't have sufficient funds for the transfer.",
            MessageKey::SenderDontExists => "The number you're sending to doesn't exist. Try again.",
            MessageKey::RecipientRecycled => "%(to_number)s does not exist.",
            MessageKey::AccountBlocked => "Your account is blocked",
            MessageKey::NoValidity => "Your account has no validity",
            MessageKey::TopUpNotAllowed => {
                "Top-up not allowed. Maximum balance limit crossed %(credit)s."
            }
            MessageKey::TopUpNotAllowedDetail => {
                "Top-up not allowed. Maximum balance limit crossed %(credit)s You can transfer \
                 upto %(transfer)s."
            }
        }
    }
}

/// Fill `%(name)s` placeholders. Returns `None` if a placeholder has no
/// value or is unterminated.
pub fn render(template: &str, params: &[(&str, &str)]) -> Option<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find(")s")?;
        let name = &after[..end];
        let (_, value) = params.iter().find(|(k, _)| *k == name)?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Some(out)
}

// ============================================================================
// Override store
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error("Notification already exists: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for NotificationError {
    fn from(e: sqlx::Error) -> Self {
        NotificationError::Database(e.to_string())
    }
}

/// Counts from one cloud push.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct NotificationSyncSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn get_notification(&self, event: &str) -> Result<Option<String>, NotificationError>;

    async fn events(&self) -> Result<BTreeSet<String>, NotificationError>;

    async fn create_notification(&self, event: &str, message: &str) -> Result<(), NotificationError>;

    async fn update_notification(&self, event: &str, message: &str) -> Result<(), NotificationError>;

    async fn delete_notification(&self, event: &str) -> Result<(), NotificationError>;

    /// Make the local overrides equal to `pushed`: drop events the cloud no
    /// longer sends, update the rest, add new ones.
    async fn sync_notifications(
        &self,
        pushed: &HashMap<String, String>,
    ) -> Result<NotificationSyncSummary, NotificationError> {
        let local = self.events().await?;
        let mut summary = NotificationSyncSummary::default();

        for event in local.iter().filter(|e| !pushed.contains_key(*e)) {
            self.delete_notification(event).await?;
            summary.deleted += 1;
        }

        for (event, message) in pushed {
            if local.contains(event) {
                match self.update_notification(event, message).await {
                    Ok(()) => summary.updated += 1,
                    Err(NotificationError::NotFound(_)) => {
                        warn!(event = %event, "notification vanished during sync, re-adding");
                        self.create_notification(event, message).await?;
                        summary.added += 1;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                self.create_notification(event, message).await?;
                summary.added += 1;
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    rows: DashMap<String, String>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn get_notification(&self, event: &str) -> Result<Option<String>, NotificationError> {
        Ok(self.rows.get(event).map(|r| r.value().clone()))
    }

    async fn events(&self) -> Result<BTreeSet<String>, NotificationError> {
        Ok(self.rows.iter().map(|r| r.key().clone()).collect())
    }

    async fn create_notification(&self, event: &str, message: &str) -> Result<(), NotificationError> {
        match self.rows.entry(event.to_string()) {
            Entry::Occupied(_) => Err(NotificationError::Duplicate(event.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(message.to_string());
                Ok(())
            }
        }
    }

    async fn update_notification(&self, event: &str, message: &str) -> Result<(), NotificationError> {
        let mut row = self
            .rows
            .get_mut(event)
            .ok_or_else(|| NotificationError::NotFound(event.to_string()))?;
        *row = message.to_string();
        Ok(())
    }

    async fn delete_notification(&self, event: &str) -> Result<(), NotificationError> {
        self.rows
            .remove(event)
            .map(|_| ())
            .ok_or_else(|| NotificationError::NotFound(event.to_string()))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Resolves templates (override first) and renders them.
#[derive(Clone)]
pub struct MessageCatalog {
    overrides: Arc<dyn NotificationStore>,
}

impl MessageCatalog {
    pub fn new(overrides: Arc<dyn NotificationStore>) -> Self {
        Self { overrides }
    }

    pub fn overrides(&self) -> &Arc<dyn NotificationStore> {
        &self.overrides
    }

    pub async fn text(&self, key: MessageKey, params: &[(&str, &str)]) -> String {
        match self.overrides.get_notification(key.event()).await {
            Ok(Some(template)) => {
                if let Some(text) = render(&template, params) {
                    return text;
                }
                warn!(event = key.event(), "override does not fit parameters, using default");
            }
            Ok(None) => {}
            Err(e) => warn!(event = key.event(), error = %e, "override lookup failed"),
        }
        Self::base_text(key, params)
    }

    /// Built-in text only; placeholders without a value stay verbatim.
    pub fn base_text(key: MessageKey, params: &[(&str, &str)]) -> String {
        let template = key.base_template();
        render(template, params).unwrap_or_else(|| template.to_string())
    }
}
