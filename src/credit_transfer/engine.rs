//! Credit Transfer Protocol Engine
//!
//! Request phase: validate sender, recipient, network cap and denomination,
//! then issue a confirmation code. Confirmation phase: match the code,
//! settle through the journal, notify both parties.
//!
//! Every inbound SMS is one awaited unit of work; concurrency comes only from
//! several messages being handled at once against the shared stores.

use chrono::Duration;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::command::{SmsCommand, parse_command};
use super::error::TransferError;
use super::events::{MemoryEventLog, TransferEvent, TransferEventLog};
use super::messages::{MemoryNotificationStore, MessageCatalog, MessageKey, NotificationStore};
use super::pending::{MemoryPendingStore, PendingTransferStore};
use super::settlement::{
    MemorySettlementLog, SettlementCoordinator, SettlementLog, SettlementOutcome, SettlementRecord,
};
use super::types::{ConfirmationCode, PendingTransfer, Rejection, TransferReply};
use crate::clock::Clock;
use crate::core_types::{Imsi, RawAmount};
use crate::denomination::{DenominationStore, MemoryDenominationStore};
use crate::money::{Currency, humanize_credits, parse_credits};
use crate::sms::SmsSender;
use crate::subscriber::{
    LedgerStore, MemoryDirectory, MemoryLedger, MemoryStatusStore, StatusStore,
    SubscriberDirectory, SubscriberError, SubscriberSync,
};

/// Fresh codes drawn before giving up on a request.
pub const MAX_CODE_ATTEMPTS: usize = 5;

/// Network-wide protocol parameters.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Short code replies are sent from.
    pub app_number: String,
    pub code_length: usize,
    pub network_max_balance: RawAmount,
    /// Abuse-flagged attempts before auto-block.
    pub network_mput: u32,
    pub currency: &'static Currency,
    pub pending_window: Duration,
}

// ============================================================================
// Confirmation codes
// ============================================================================

pub trait CodeSource: Send + Sync {
    fn next_code(&self, length: usize) -> ConfirmationCode;
}

/// Uniformly random digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self, length: usize) -> ConfirmationCode {
        let mut rng = rand::thread_rng();
        let digits: String = (0..length.max(1))
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        ConfirmationCode::from_digits(digits)
    }
}

/// Replays a scripted sequence, then falls back to random digits.
#[derive(Debug, Default)]
pub struct FixedCodes {
    codes: Mutex<VecDeque<String>>,
}

impl FixedCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }
}

impl CodeSource for FixedCodes {
    fn next_code(&self, length: usize) -> ConfirmationCode {
        let scripted = self
            .codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        scripted
            .and_then(|c| ConfirmationCode::parse(&c))
            .unwrap_or_else(|| RandomCodes.next_code(length))
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Every store the engine talks to, injected at construction.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub status: Arc<dyn StatusStore>,
    pub directory: Arc<dyn SubscriberDirectory>,
    pub denominations: Arc<dyn DenominationStore>,
    pub pending: Arc<dyn PendingTransferStore>,
    pub settlements: Arc<dyn SettlementLog>,
    pub notifications: Arc<dyn NotificationStore>,
    pub events: Arc<dyn TransferEventLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            status: Arc::new(MemoryStatusStore::new()),
            directory: Arc::new(MemoryDirectory::new()),
            denominations: Arc::new(MemoryDenominationStore::new()),
            pending: Arc::new(MemoryPendingStore::new()),
            settlements: Arc::new(MemorySettlementLog::new()),
            notifications: Arc::new(MemoryNotificationStore::new()),
            events: Arc::new(MemoryEventLog::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use super::db::{PgEventLog, PgNotificationStore, PgPendingStore, PgSettlementLog};
        use crate::denomination::PgDenominationStore;
        use crate::subscriber::{PgDirectory, PgLedger, PgStatusStore};

        Self {
            ledger: Arc::new(PgLedger::new(pool.clone())),
            status: Arc::new(PgStatusStore::new(pool.clone())),
            directory: Arc::new(PgDirectory::new(pool.clone())),
            denominations: Arc::new(PgDenominationStore::new(pool.clone())),
            pending: Arc::new(PgPendingStore::new(pool.clone())),
            settlements: Arc::new(PgSettlementLog::new(pool.clone())),
            notifications: Arc::new(PgNotificationStore::new(pool.clone())),
            events: Arc::new(PgEventLog::new(pool)),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct CreditTransferEngine {
    settings: TransferSettings,
    stores: Stores,
    catalog: MessageCatalog,
    settlement: SettlementCoordinator,
    sms: Arc<dyn SmsSender>,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn CodeSource>,
}

impl CreditTransferEngine {
    pub fn new(
        settings: TransferSettings,
        stores: Stores,
        sms: Arc<dyn SmsSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let catalog = MessageCatalog::new(stores.notifications.clone());
        let settlement = SettlementCoordinator::new(
            stores.settlements.clone(),
            stores.ledger.clone(),
            stores.status.clone(),
        );
        Self {
            settings,
            stores,
            catalog,
            settlement,
            sms,
            clock,
            codes: Arc::new(RandomCodes),
        }
    }

    pub fn with_code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.codes = codes;
        self
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Sync service sharing this engine's stores and clock.
    pub fn subscriber_sync(&self) -> SubscriberSync {
        SubscriberSync::new(
            self.stores.ledger.clone(),
            self.stores.status.clone(),
            self.stores.directory.clone(),
            self.stores.events.clone(),
            self.clock.clone(),
        )
    }

    /// Finish settlements interrupted by a crash. Run once at startup.
    pub async fn recover_settlements(&self) -> Result<usize, TransferError> {
        self.settlement.recover(self.clock.now()).await
    }

    /// Switch-side service gate; `subscriber` may be a number or an IMSI.
    pub async fn service_allowed(&self, subscriber: &str, as_destination: bool) -> bool {
        let imsi = match self.stores.directory.get_imsi_from_number(subscriber).await {
            Ok(imsi) => imsi.to_string(),
            Err(_) => subscriber.to_string(),
        };
        crate::subscriber::service_allowed(self.stores.status.as_ref(), &imsi, as_destination).await
    }

    // ========================================================================
    // Boundary
    // ========================================================================

    /// Handle one inbound SMS and send exactly one reply to the sender.
    pub async fn handle_incoming(
        &self,
        from: &Imsi,
        text: &str,
    ) -> Result<TransferReply, TransferError> {
        info!(target: "SMSFLOW", imsi = %from, text, "SMS in");

        let result = match parse_command(text, self.settings.code_length) {
            SmsCommand::Transfer { to_number, amount } => {
                self.handle_transfer_command(from, &to_number, &amount).await
            }
            SmsCommand::Confirm(code) => self.process_confirm(from, &code).await,
            SmsCommand::Help => Ok(self.reject(Rejection::Unrecognized, MessageKey::TransferHelp, &[]).await),
        };

        let (reply, failure) = match result {
            Ok(reply) => (reply, None),
            Err(e) => {
                error!(
                    imsi = %from,
                    error = %e,
                    code = e.code(),
                    rejection = Rejection::Internal.code(),
                    "Transfer processing failed"
                );
                let reply = self
                    .reject(Rejection::Internal, MessageKey::TransferTryLater, &[])
                    .await;
                (reply, Some(e))
            }
        };

        let from_number = self.stores.directory.primary_number(from).await?;
        self.notify(&from_number, &reply.message).await;
        match failure {
            Some(e) => Err(e),
            None => Ok(reply),
        }
    }

    async fn handle_transfer_command(
        &self,
        from: &Imsi,
        to_number: &str,
        amount_text: &str,
    ) -> Result<TransferReply, TransferError> {
        let amount = match parse_credits(amount_text, self.settings.currency) {
            Ok(money) => money.amount_raw(),
            Err(e) => {
                debug!(imsi = %from, amount = amount_text, error = %e, "Unparsable amount");
                return Ok(self
                    .reject(Rejection::InvalidAmount, MessageKey::TransferInvalidAmount, &[])
                    .await);
            }
        };
        let to = match self.stores.directory.get_imsi_from_number(to_number).await {
            Ok(imsi) => imsi,
            Err(SubscriberError::NotFound(_)) => {
                return Ok(self
                    .reject(
                        Rejection::InvalidNumber {
                            number: to_number.to_string(),
                        },
                        MessageKey::InvalidNumber,
                        &[("to_number", to_number)],
                    )
                    .await);
            }
            Err(e) => return Err(e.into()),
        };
        self.process_transfer(from, &to, amount).await
    }

    // ========================================================================
    // Request phase
    // ========================================================================

    pub async fn process_transfer(
        &self,
        from: &Imsi,
        to: &Imsi,
        amount: RawAmount,
    ) -> Result<TransferReply, TransferError> {
        if from == to {
            return Ok(self.reject(Rejection::SelfTransfer, MessageKey::TransferSelfFail, &[]).await);
        }
        if amount <= 0 {
            return Ok(self
                .reject(Rejection::InvalidAmount, MessageKey::TransferInvalidAmount, &[])
                .await);
        }

        let sender_status = self.stores.status.get_status(from).await?;
        if !sender_status.state.is_active() {
            return Ok(if sender_status.state.blocked {
                self.reject(Rejection::AccountBlocked, MessageKey::AccountBlocked, &[]).await
            } else {
                self.reject(Rejection::NoValidity, MessageKey::NoValidity, &[]).await
            });
        }
        let from_balance = self.stores.ledger.get_balance(from).await?;

        let to_number = self.number_or_imsi(to).await;
        if let Some(refusal) = self.refuse_recipient_status(to, &to_number).await? {
            return Ok(refusal);
        }

        if from_balance <= 0 || from_balance < amount {
            return Ok(self.reject(Rejection::InsufficientFunds, MessageKey::LowCredit, &[]).await);
        }
        if !self.stores.ledger.contains(to).await? {
            return Ok(self.recipient_not_found().await);
        }

        let max_balance = self.settings.network_max_balance;
        let to_balance = self.stores.ledger.get_balance(to).await?;
        let abuse = if to_balance > max_balance {
            let credit = self.humanize(max_balance);
            Some((
                Rejection::BalanceCapReached,
                MessageKey::TopUpNotAllowed,
                vec![("credit", credit)],
            ))
        } else if amount.saturating_add(to_balance) > max_balance {
            let max_transfer = max_balance - to_balance;
            Some((
                Rejection::BalanceCapExceeded { max_transfer },
                MessageKey::TopUpNotAllowedDetail,
                vec![
                    ("credit", self.humanize(max_balance)),
                    ("transfer", self.humanize(max_transfer)),
                ],
            ))
        } else if self
            .stores
            .denominations
            .lookup_validity_days(amount)
            .await?
            .is_none()
        {
            Some((
                Rejection::DenominationMiss,
                MessageKey::TransferDenominationError,
                Vec::new(),
            ))
        } else {
            None
        };

        if let Some((rejection, key, params)) = abuse {
            let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
            let from_number = self.number_or_imsi(from).await;
            let refused = TransferEvent::refused(
                from.clone(),
                from_balance,
                &MessageCatalog::base_text(key, &params),
                &from_number,
                &to_number,
                self.clock.now(),
            );
            let reason = self.catalog.text(key, &params).await;
            let message = self
                .flag_abuse(from, sender_status.ie_count, reason, refused)
                .await;
            info!(imsi = %from, to = %to, amount, rejection = rejection.code(), "Abuse-flagged transfer refused");
            return Ok(TransferReply::rejected(rejection, message));
        }

        let code = match self.issue_code(from, to, amount).await? {
            Some(code) => code,
            None => {
                return Ok(self
                    .reject(Rejection::CodeUnavailable, MessageKey::TransferTryLater, &[])
                    .await);
            }
        };
        let amount_str = self.humanize(amount);
        let message = self
            .catalog
            .text(
                MessageKey::TransferConfirm,
                &[
                    ("code", code.as_str()),
                    ("amount", &amount_str),
                    ("to_number", &to_number),
                ],
            )
            .await;
        info!(imsi = %from, to = %to, amount, "Transfer pending confirmation");
        Ok(TransferReply::pending(code, message))
    }

    /// Record the refusal, count the attempt against the sender and append
    /// the attempts-left notice.
    async fn flag_abuse(
        &self,
        from: &Imsi,
        ie_count: u32,
        reason: String,
        event: TransferEvent,
    ) -> String {
        let max_attempts = self.settings.network_mput;
        let left = (max_attempts as i64 - (ie_count as i64 + 1)).max(0).to_string();
        let notice = self
            .catalog
            .text(MessageKey::TransferAttemptsLeft, &[("attempts", &left)])
            .await;

        if let Err(e) = self.stores.events.record(event).await {
            warn!(imsi = %from, error = %e, "Failed to record refused transfer event");
        }
        match self.stores.status.set_invalid_count(from, max_attempts).await {
            Ok(status) if status.state.blocked => {
                info!(imsi = %from, state = %status.state, "Sender auto-blocked");
            }
            Ok(_) => {}
            Err(e) => {
                error!(imsi = %from, error = %e, "Failed to count invalid transfer attempt");
            }
        }
        format!("{} {}", reason, notice)
    }

    async fn issue_code(
        &self,
        from: &Imsi,
        to: &Imsi,
        amount: RawAmount,
    ) -> Result<Option<ConfirmationCode>, TransferError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = self.codes.next_code(self.settings.code_length);
            let pending = PendingTransfer::new(
                code.clone(),
                self.clock.now(),
                from.clone(),
                to.clone(),
                amount,
            );
            match self.stores.pending.insert(&pending).await {
                Ok(()) => return Ok(Some(code)),
                Err(TransferError::DuplicateCode(_)) => {
                    warn!(imsi = %from, attempt, "Confirmation code collision, drawing again");
                }
                Err(e) => return Err(e),
            }
        }
        error!(
            imsi = %from,
            attempts = MAX_CODE_ATTEMPTS,
            "No free confirmation code, transfer request dropped"
        );
        Ok(None)
    }

    // ========================================================================
    // Confirmation phase
    // ========================================================================

    pub async fn process_confirm(
        &self,
        from: &Imsi,
        code: &ConfirmationCode,
    ) -> Result<TransferReply, TransferError> {
        let now = self.clock.now();
        let window = self.settings.pending_window;
        let purged = self.stores.pending.purge_expired(now, window).await?;
        if purged > 0 {
            debug!(purged, "Expired pending transfers purged");
        }

        let pending = match self.stores.pending.find(code, from).await? {
            Some(p) if !p.is_expired(now, window) => p,
            _ => return Ok(self.expired().await),
        };
        // Removing the row claims it; a concurrent confirm finds nothing.
        if !self.stores.pending.remove(code, from).await? {
            return Ok(self.expired().await);
        }

        // Cloud sync may have removed or recycled the recipient since the request.
        let to_number = self.number_or_imsi(&pending.to).await;
        if let Some(refusal) = self.refuse_recipient_status(&pending.to, &to_number).await? {
            warn!(imsi = %from, to = %pending.to, "Recipient no longer eligible at confirmation");
            return Ok(refusal);
        }
        if !self.stores.ledger.contains(&pending.to).await? {
            warn!(imsi = %from, to = %pending.to, "Recipient ledger row gone at confirmation");
            return Ok(self.recipient_not_found().await);
        }

        let Some(validity_days) = self
            .stores
            .denominations
            .lookup_validity_days(pending.amount)
            .await?
        else {
            warn!(imsi = %from, amount = pending.amount, "Denomination removed before confirmation");
            return Ok(self
                .reject(Rejection::DenominationMiss, MessageKey::TransferDenominationError, &[])
                .await);
        };

        let record = SettlementRecord::from_pending(&pending, validity_days, now);
        let (sender_before, sender_after, recipient_before, recipient_after, validity) =
            match self.settlement.settle(record, now).await? {
                SettlementOutcome::Applied {
                    sender_before,
                    sender_after,
                    recipient_before,
                    recipient_after,
                    validity,
                } => (sender_before, sender_after, recipient_before, recipient_after, validity),
                SettlementOutcome::Declined { .. } => {
                    return Ok(self
                        .reject(Rejection::InsufficientFunds, MessageKey::LowCredit, &[])
                        .await);
                }
                SettlementOutcome::Reversed { .. } => return Ok(self.recipient_not_found().await),
            };

        let from_number = self.number_or_imsi(&pending.from).await;
        let reason = MessageCatalog::base_text(
            MessageKey::TransferFromTo,
            &[("from_number", &from_number), ("to_number", &to_number)],
        );
        for (imsi, before, after) in [
            (&pending.from, sender_before, sender_after),
            (&pending.to, recipient_before, recipient_after),
        ] {
            let event = TransferEvent::transfer(
                imsi.clone(),
                before,
                after,
                reason.clone(),
                &from_number,
                &to_number,
                now,
            );
            if let Err(e) = self.stores.events.record(event).await {
                warn!(imsi = %imsi, error = %e, "Failed to record transfer event");
            }
        }

        let amount_str = self.humanize(pending.amount);
        let validity_str = validity
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let recipient_text = self
            .catalog
            .text(
                MessageKey::TransferDetailsRecipient,
                &[
                    ("amount", &amount_str),
                    ("from_number", &from_number),
                    ("new_balance", &self.humanize(recipient_after)),
                    ("validity", &validity_str),
                ],
            )
            .await;
        self.notify(&to_number, &recipient_text).await;

        if let Err(e) = self.stores.status.reset_invalid_count(from).await {
            error!(imsi = %from, error = %e, "Failed to reset invalid attempt counter");
        }

        let message = self
            .catalog
            .text(
                MessageKey::TransferDetailsSender,
                &[
                    ("amount", &amount_str),
                    ("to_number", &to_number),
                    ("account_bal", &self.humanize(sender_after)),
                ],
            )
            .await;
        Ok(TransferReply::settled(message))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn reject(
        &self,
        rejection: Rejection,
        key: MessageKey,
        params: &[(&str, &str)],
    ) -> TransferReply {
        let message = self.catalog.text(key, params).await;
        TransferReply::rejected(rejection, message)
    }

    /// Refusal for a recipient that is recycled or has no status row.
    async fn refuse_recipient_status(
        &self,
        to: &Imsi,
        to_number: &str,
    ) -> Result<Option<TransferReply>, TransferError> {
        match self.stores.status.get_status(to).await {
            Ok(status) if status.state.is_recycled() => Ok(Some(
                self.reject(
                    Rejection::RecipientNotFound,
                    MessageKey::RecipientRecycled,
                    &[("to_number", to_number)],
                )
                .await,
            )),
            Ok(_) => Ok(None),
            Err(SubscriberError::NotFound(_)) => Ok(Some(self.recipient_not_found().await)),
            Err(e) => Err(e.into()),
        }
    }

    async fn recipient_not_found(&self) -> TransferReply {
        self.reject(Rejection::RecipientNotFound, MessageKey::SenderDontExists, &[])
            .await
    }

    async fn expired(&self) -> TransferReply {
        self.reject(Rejection::ExpiredOrUnknownCode, MessageKey::TransferExpired, &[])
            .await
    }

    fn humanize(&self, amount: RawAmount) -> String {
        humanize_credits(amount, self.settings.currency).to_string()
    }

    async fn number_or_imsi(&self, imsi: &Imsi) -> String {
        match self.stores.directory.primary_number(imsi).await {
            Ok(number) => number,
            Err(e) => {
                warn!(imsi = %imsi, error = %e, "No number for subscriber");
                imsi.to_string()
            }
        }
    }

    async fn notify(&self, to: &str, text: &str) {
        if let Err(e) = self.sms.send(to, &self.settings.app_number, text).await {
            warn!(to, error = %e, "SMS delivery failed");
        }
    }
}
