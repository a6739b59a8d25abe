//! End-to-end protocol scenarios against the in-memory stores.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use super::*;
use crate::clock::ManualClock;
use crate::core_types::{Imsi, RawAmount};
use crate::denomination::DenominationBracket;
use crate::money::USD;
use crate::sms::LogSmsSender;
use crate::sms::mock::FailingSmsSender;
use crate::subscriber::{AccountState, LifecyclePhase, SubscriberStatus};

const SENDER: &str = "IMSI001010000000001";
const RECIPIENT: &str = "IMSI001010000000002";
const SENDER_NUMBER: &str = "5551001";
const RECIPIENT_NUMBER: &str = "5551002";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
}

fn settings(max_balance: RawAmount) -> TransferSettings {
    TransferSettings {
        app_number: "101".into(),
        code_length: 5,
        network_max_balance: max_balance,
        network_mput: 3,
        currency: &USD,
        pending_window: Duration::seconds(DEFAULT_PENDING_WINDOW_SECS),
    }
}

struct Harness {
    engine: CreditTransferEngine,
    stores: Stores,
    sms: Arc<LogSmsSender>,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn new(max_balance: RawAmount) -> Self {
        Self::with_codes(max_balance, Arc::new(RandomCodes)).await
    }

    async fn with_codes(max_balance: RawAmount, codes: Arc<dyn CodeSource>) -> Self {
        let stores = Stores::in_memory();
        stores
            .denominations
            .replace_all(&[
                DenominationBracket::new(1, 1, 1_000, 7),
                DenominationBracket::new(2, 1_001, 10_000, 30),
            ])
            .await
            .unwrap();
        let sms = Arc::new(LogSmsSender::new());
        let clock = Arc::new(ManualClock::new(start()));
        let engine = CreditTransferEngine::new(
            settings(max_balance),
            stores.clone(),
            sms.clone(),
            clock.clone(),
        )
        .with_code_source(codes);
        Self {
            engine,
            stores,
            sms,
            clock,
        }
    }

    async fn add(&self, imsi: &str, number: &str, balance: RawAmount, state: AccountState) {
        let imsi = Imsi::new(imsi);
        self.stores.directory.provision(&imsi, number).await.unwrap();
        self.stores.ledger.create_subscriber(&imsi).await.unwrap();
        self.stores.ledger.add_credit(&imsi, balance).await.unwrap();
        self.stores
            .status
            .create_status(&imsi, &SubscriberStatus::new(state, None))
            .await
            .unwrap();
    }

    async fn pair(max_balance: RawAmount, sender: RawAmount, recipient: RawAmount) -> Self {
        let h = Self::new(max_balance).await;
        h.add(SENDER, SENDER_NUMBER, sender, AccountState::ACTIVE).await;
        h.add(RECIPIENT, RECIPIENT_NUMBER, recipient, AccountState::ACTIVE)
            .await;
        h
    }

    async fn balance(&self, imsi: &str) -> RawAmount {
        self.stores.ledger.get_balance(&Imsi::new(imsi)).await.unwrap()
    }

    async fn status(&self, imsi: &str) -> SubscriberStatus {
        self.stores.status.get_status(&Imsi::new(imsi)).await.unwrap()
    }

    async fn request(&self, amount: RawAmount) -> TransferReply {
        self.engine
            .process_transfer(&Imsi::new(SENDER), &Imsi::new(RECIPIENT), amount)
            .await
            .unwrap()
    }

    async fn confirm(&self, code: &ConfirmationCode) -> TransferReply {
        self.engine
            .process_confirm(&Imsi::new(SENDER), code)
            .await
            .unwrap()
    }
}

// ============================================================================
// Full flow
// ============================================================================

#[tokio::test]
async fn test_sms_transfer_end_to_end() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let sender = Imsi::new(SENDER);

    let reply = h
        .engine
        .handle_incoming(&sender, "5551002*20")
        .await
        .unwrap();
    assert_eq!(reply.state, TransferState::PendingConfirmation);
    let code = reply.code.clone().unwrap();
    assert_eq!(code.len(), 5);
    assert!(reply.message.contains(code.as_str()));
    assert!(reply.message.contains("$20.00"));
    assert!(reply.message.contains(RECIPIENT_NUMBER));
    assert_eq!(h.stores.pending.len().await.unwrap(), 1);

    let reply = h
        .engine
        .handle_incoming(&sender, code.as_str())
        .await
        .unwrap();
    assert_eq!(reply.state, TransferState::Settled);
    assert_eq!(
        reply.message,
        "You've transferred $20.00 to 5551002 Your new balance is $30.00."
    );

    assert_eq!(h.balance(SENDER).await, 3_000);
    assert_eq!(h.balance(RECIPIENT).await, 2_000);
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);

    let recipient = h.status(RECIPIENT).await;
    assert_eq!(
        recipient.validity,
        Some(NaiveDate::from_ymd_opt(2026, 11, 18).unwrap())
    );
    assert!(recipient.state.is_active());

    // Two replies to the sender, one notice to the recipient, all from the
    // service number.
    assert_eq!(h.sms.sent_to(SENDER_NUMBER).len(), 2);
    let notice = h.sms.sent_to(RECIPIENT_NUMBER);
    assert_eq!(notice.len(), 1);
    assert!(notice[0].contains("$20.00"));
    assert!(notice[0].contains(SENDER_NUMBER));
    assert!(notice[0].contains("2026-11-18"));
    assert!(h.sms.sent().iter().all(|m| m.from == "101"));

    let events = h.stores.events.events_for(&sender).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].old_balance, events[0].new_balance), (5_000, 3_000));
    assert_eq!(events[0].reason, "SMS transfer from 5551001 to 5551002");
    let events = h
        .stores
        .events
        .events_for(&Imsi::new(RECIPIENT))
        .await
        .unwrap();
    assert_eq!((events[0].old_balance, events[0].new_balance), (0, 2_000));
}

#[tokio::test]
async fn test_every_message_gets_exactly_one_reply() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let sender = Imsi::new(SENDER);
    for text in ["", "hello", "5551002*", "*20", "5551002*abc", "999*20", "00000"] {
        h.engine.handle_incoming(&sender, text).await.unwrap();
    }
    assert_eq!(h.sms.sent_to(SENDER_NUMBER).len(), 7);
    assert_eq!(h.balance(SENDER).await, 5_000);
}

#[tokio::test]
async fn test_help_and_parse_failures() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let sender = Imsi::new(SENDER);

    let reply = h.engine.handle_incoming(&sender, "what?").await.unwrap();
    assert_eq!(reply.state, TransferState::ParseRequest);
    assert_eq!(reply.rejection, Some(Rejection::Unrecognized));
    assert!(reply.message.contains("NUMBER*AMOUNT"));

    let reply = h
        .engine
        .handle_incoming(&sender, "5551002*2.005")
        .await
        .unwrap();
    assert_eq!(reply.rejection, Some(Rejection::InvalidAmount));

    let reply = h.engine.handle_incoming(&sender, "5559999*20").await.unwrap();
    assert_eq!(
        reply.rejection,
        Some(Rejection::InvalidNumber {
            number: "5559999".into()
        })
    );
    assert_eq!(reply.message, "Invalid phone number: 5559999");
}

// ============================================================================
// Request-phase validation
// ============================================================================

#[tokio::test]
async fn test_self_transfer_rejected_for_any_amount() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let sender = Imsi::new(SENDER);
    for amount in [0, -500, 2_000] {
        let reply = h
            .engine
            .process_transfer(&sender, &sender, amount)
            .await
            .unwrap();
        assert_eq!(reply.rejection, Some(Rejection::SelfTransfer));
    }
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);
    assert_eq!(h.status(SENDER).await.ie_count, 0);
}

#[tokio::test]
async fn test_non_positive_amount_rejected() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    for amount in [0, -100] {
        let reply = h.request(amount).await;
        assert_eq!(reply.rejection, Some(Rejection::InvalidAmount));
    }
    assert_eq!(h.status(SENDER).await.ie_count, 0);
}

#[tokio::test]
async fn test_sender_state_gates_transfer() {
    let h = Harness::new(20_000).await;
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE.blocked())
        .await;
    h.add(RECIPIENT, RECIPIENT_NUMBER, 0, AccountState::ACTIVE).await;
    assert_eq!(h.request(500).await.rejection, Some(Rejection::AccountBlocked));

    let mut status = h.status(SENDER).await;
    status.state = AccountState::new(LifecyclePhase::FirstExpired, false);
    h.stores
        .status
        .update_status(&Imsi::new(SENDER), status)
        .await
        .unwrap();
    let reply = h.request(500).await;
    assert_eq!(reply.rejection, Some(Rejection::NoValidity));
    assert_eq!(reply.message, "Your account has no validity");
}

#[tokio::test]
async fn test_recipient_checks_use_recipient_status() {
    let h = Harness::new(20_000).await;
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE).await;
    h.add(
        RECIPIENT,
        RECIPIENT_NUMBER,
        0,
        AccountState::new(LifecyclePhase::Recycle, false),
    )
    .await;
    let reply = h.request(500).await;
    assert_eq!(reply.rejection, Some(Rejection::RecipientNotFound));
    assert_eq!(reply.message, "5551002 does not exist.");

    // An expired (not recycled) recipient can still be topped up.
    let mut status = h.status(RECIPIENT).await;
    status.state = AccountState::new(LifecyclePhase::Expired, false);
    h.stores
        .status
        .update_status(&Imsi::new(RECIPIENT), status)
        .await
        .unwrap();
    assert_eq!(h.request(500).await.state, TransferState::PendingConfirmation);
}

#[tokio::test]
async fn test_recipient_without_records_does_not_exist() {
    let h = Harness::new(20_000).await;
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE).await;
    let reply = h.request(500).await;
    assert_eq!(reply.rejection, Some(Rejection::RecipientNotFound));
    assert_eq!(
        reply.message,
        "The number you're sending to doesn't exist. Try again."
    );
}

#[tokio::test]
async fn test_insufficient_funds() {
    let h = Harness::pair(20_000, 1_000, 0).await;
    let reply = h.request(1_001).await;
    assert_eq!(reply.rejection, Some(Rejection::InsufficientFunds));
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);

    let h = Harness::pair(20_000, 0, 0).await;
    assert_eq!(
        h.request(1).await.rejection,
        Some(Rejection::InsufficientFunds)
    );
}

#[tokio::test]
async fn test_network_cap() {
    let h = Harness::pair(10_000, 5_000, 9_000).await;

    let reply = h.request(1_500).await;
    assert_eq!(
        reply.rejection,
        Some(Rejection::BalanceCapExceeded {
            max_transfer: 1_000
        })
    );
    assert!(reply.message.starts_with(
        "Top-up not allowed. Maximum balance limit crossed $100.00 You can transfer upto $10.00."
    ));
    assert!(reply.message.ends_with("Your left attempts 2"));

    // Landing exactly on the cap is fine.
    let reply = h.request(1_000).await;
    assert_eq!(reply.state, TransferState::PendingConfirmation);
    let reply = h.request(900).await;
    assert_eq!(reply.state, TransferState::PendingConfirmation);
}

#[tokio::test]
async fn test_recipient_already_over_cap() {
    let h = Harness::pair(10_000, 5_000, 10_001).await;
    let reply = h.request(100).await;
    assert_eq!(reply.rejection, Some(Rejection::BalanceCapReached));
    assert!(reply.message.contains("$100.00"));
}

#[tokio::test]
async fn test_denomination_miss() {
    let h = Harness::pair(50_000, 20_000, 0).await;
    let reply = h.request(15_000).await;
    assert_eq!(reply.rejection, Some(Rejection::DenominationMiss));
    assert!(reply.message.starts_with("Top-up not under denomination range."));
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);

    let events = h
        .stores
        .events
        .events_for(&Imsi::new(SENDER))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
    assert_eq!(events[0].old_balance, events[0].new_balance);
    assert_eq!(
        events[0].reason,
        "Top-up not under denomination range. error_transfer"
    );
}

// ============================================================================
// Auto-block
// ============================================================================

#[tokio::test]
async fn test_auto_block_after_repeated_abuse() {
    let h = Harness::pair(50_000, 20_000, 0).await;
    for left in ["2", "1", "0"] {
        let reply = h.request(15_000).await;
        assert_eq!(reply.rejection, Some(Rejection::DenominationMiss));
        assert!(reply.message.ends_with(&format!("Your left attempts {}", left)));
    }

    let status = h.status(SENDER).await;
    assert_eq!(status.state.to_string(), "active*");
    assert_eq!(status.ie_count, 0);

    // Blocked accounts cannot even make a valid request.
    assert_eq!(h.request(500).await.rejection, Some(Rejection::AccountBlocked));
    assert!(!h.engine.service_allowed(SENDER_NUMBER, false).await);
    assert!(h.engine.service_allowed(SENDER_NUMBER, true).await);
}

#[tokio::test]
async fn test_successful_confirm_resets_abuse_counter() {
    let h = Harness::pair(50_000, 20_000, 0).await;
    h.request(15_000).await;
    h.request(15_000).await;
    assert_eq!(h.status(SENDER).await.ie_count, 2);

    // Non-abuse rejections and new requests leave the counter alone.
    h.request(0).await;
    let pending = h.request(2_000).await;
    assert_eq!(h.status(SENDER).await.ie_count, 2);

    let reply = h.confirm(&pending.code.unwrap()).await;
    assert_eq!(reply.state, TransferState::Settled);
    assert_eq!(h.status(SENDER).await.ie_count, 0);
}

// ============================================================================
// Confirmation phase
// ============================================================================

#[tokio::test]
async fn test_confirmation_window_edges() {
    for (elapsed, settled) in [(599, true), (600, true), (601, false)] {
        let h = Harness::pair(20_000, 5_000, 0).await;
        let code = h.request(2_000).await.code.unwrap();
        h.clock.advance(Duration::seconds(elapsed));

        let reply = h.confirm(&code).await;
        if settled {
            assert_eq!(reply.state, TransferState::Settled, "elapsed {}", elapsed);
            assert_eq!(h.balance(RECIPIENT).await, 2_000);
        } else {
            assert_eq!(reply.state, TransferState::Expired, "elapsed {}", elapsed);
            assert_eq!(
                reply.message,
                "That transfer confirmation code doesn't exist or has expired ."
            );
            assert_eq!(h.balance(SENDER).await, 5_000);
            assert_eq!(h.balance(RECIPIENT).await, 0);
            assert_eq!(h.stores.pending.len().await.unwrap(), 0);
        }
    }
}

#[tokio::test]
async fn test_code_only_valid_for_its_sender() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();

    let reply = h
        .engine
        .process_confirm(&Imsi::new(RECIPIENT), &code)
        .await
        .unwrap();
    assert_eq!(reply.state, TransferState::Expired);
    assert_eq!(h.stores.pending.len().await.unwrap(), 1);

    assert_eq!(h.confirm(&code).await.state, TransferState::Settled);
}

#[tokio::test]
async fn test_replayed_confirmation_settles_once() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();
    assert_eq!(h.confirm(&code).await.state, TransferState::Settled);
    assert_eq!(h.confirm(&code).await.state, TransferState::Expired);
    assert_eq!(h.balance(SENDER).await, 3_000);
    assert_eq!(h.balance(RECIPIENT).await, 2_000);
}

#[tokio::test]
async fn test_funds_spent_before_confirmation() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(4_000).await.code.unwrap();
    h.stores
        .ledger
        .subtract_credit(&Imsi::new(SENDER), 3_000)
        .await
        .unwrap();

    let reply = h.confirm(&code).await;
    assert_eq!(reply.rejection, Some(Rejection::InsufficientFunds));
    assert_eq!(h.balance(SENDER).await, 2_000);
    assert_eq!(h.balance(RECIPIENT).await, 0);
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);
    assert!(h.stores.settlements.list_unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recipient_ledger_row_removed_before_confirmation() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();
    h.stores
        .ledger
        .delete_subscriber(&Imsi::new(RECIPIENT))
        .await
        .unwrap();

    let reply = h
        .engine
        .handle_incoming(&Imsi::new(SENDER), code.as_str())
        .await
        .unwrap();
    assert_eq!(reply.rejection, Some(Rejection::RecipientNotFound));
    assert_eq!(
        reply.message,
        "The number you're sending to doesn't exist. Try again."
    );
    assert_eq!(h.balance(SENDER).await, 5_000);
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);
    assert!(h.stores.settlements.list_unfinished().await.unwrap().is_empty());
    assert!(h.sms.sent_to(RECIPIENT_NUMBER).is_empty());
    assert_eq!(h.engine.recover_settlements().await.unwrap(), 0);
    assert_eq!(h.balance(SENDER).await, 5_000);
}

#[tokio::test]
async fn test_recipient_status_row_removed_before_confirmation() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();
    h.stores
        .status
        .delete_status(&Imsi::new(RECIPIENT))
        .await
        .unwrap();

    let reply = h.confirm(&code).await;
    assert_eq!(reply.rejection, Some(Rejection::RecipientNotFound));
    assert_eq!(
        reply.message,
        "The number you're sending to doesn't exist. Try again."
    );
    assert_eq!(h.balance(SENDER).await, 5_000);
    assert_eq!(h.balance(RECIPIENT).await, 0);
    assert!(h.sms.sent_to(RECIPIENT_NUMBER).is_empty());
    assert!(h.stores.settlements.list_unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recipient_recycled_before_confirmation() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();
    let mut status = h.status(RECIPIENT).await;
    status.state = AccountState::new(LifecyclePhase::Recycle, false);
    h.stores
        .status
        .update_status(&Imsi::new(RECIPIENT), status)
        .await
        .unwrap();

    let reply = h.confirm(&code).await;
    assert_eq!(reply.rejection, Some(Rejection::RecipientNotFound));
    assert_eq!(reply.message, "5551002 does not exist.");
    assert_eq!(h.balance(SENDER).await + h.balance(RECIPIENT).await, 5_000);
    assert_eq!(h.balance(SENDER).await, 5_000);
    assert_eq!(h.stores.pending.len().await.unwrap(), 0);

    // The code is spent; confirming again finds nothing.
    assert_eq!(h.confirm(&code).await.state, TransferState::Expired);
}

#[tokio::test]
async fn test_internal_failure_replies_try_later() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    h.stores
        .status
        .delete_status(&Imsi::new(SENDER))
        .await
        .unwrap();

    let result = h
        .engine
        .handle_incoming(&Imsi::new(SENDER), "5551002*20")
        .await;
    assert!(result.is_err());
    assert_eq!(
        h.sms.sent_to(SENDER_NUMBER),
        vec!["Your transfer could not be processed right now. Try again later.".to_string()]
    );
    assert_eq!(h.balance(SENDER).await, 5_000);
}

#[tokio::test]
async fn test_value_is_conserved_across_transfers() {
    let h = Harness::pair(20_000, 9_000, 1_000).await;
    for amount in [1_000, 2_500, 700, 4_000] {
        let code = h.request(amount).await.code.unwrap();
        h.confirm(&code).await;
        assert_eq!(h.balance(SENDER).await + h.balance(RECIPIENT).await, 10_000);
    }
    assert_eq!(h.balance(SENDER).await, 800);
    assert!(h.stores.settlements.list_unfinished().await.unwrap().is_empty());
    assert_eq!(h.engine.recover_settlements().await.unwrap(), 0);
}

#[tokio::test]
async fn test_validity_only_moves_forward() {
    let h = Harness::pair(20_000, 9_000, 0).await;
    let code = h.request(2_000).await.code.unwrap();
    h.confirm(&code).await;
    // 7-day bracket after a 30-day one keeps the later date.
    let code = h.request(500).await.code.unwrap();
    h.confirm(&code).await;
    assert_eq!(
        h.status(RECIPIENT).await.validity,
        Some(NaiveDate::from_ymd_opt(2026, 11, 18).unwrap())
    );
}

// ============================================================================
// Codes
// ============================================================================

#[tokio::test]
async fn test_code_collision_draws_again() {
    let codes = Arc::new(FixedCodes::new(["11111", "11111", "22222"]));
    let h = Harness::with_codes(20_000, codes).await;
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE).await;
    h.add(RECIPIENT, RECIPIENT_NUMBER, 0, AccountState::ACTIVE).await;

    let first = h.request(500).await.code.unwrap();
    let second = h.request(700).await.code.unwrap();
    assert_eq!(first.as_str(), "11111");
    assert_eq!(second.as_str(), "22222");

    // The earlier request is untouched by the collision.
    h.confirm(&first).await;
    assert_eq!(h.balance(RECIPIENT).await, 500);
}

#[tokio::test]
async fn test_code_exhaustion_asks_to_retry() {
    let codes = Arc::new(FixedCodes::new(["11111"; 1 + MAX_CODE_ATTEMPTS]));
    let h = Harness::with_codes(20_000, codes).await;
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE).await;
    h.add(RECIPIENT, RECIPIENT_NUMBER, 0, AccountState::ACTIVE).await;

    h.request(500).await;
    let reply = h.request(700).await;
    assert_eq!(reply.rejection, Some(Rejection::CodeUnavailable));
    assert!(reply.message.contains("Try again later"));
    assert_eq!(h.stores.pending.len().await.unwrap(), 1);
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn test_operator_override_is_used() {
    let h = Harness::pair(20_000, 5_000, 0).await;
    h.stores
        .notifications
        .create_notification("low_credit", "Not enough load, %(missing)s")
        .await
        .unwrap();
    // Unfillable override falls back to the default text.
    assert_eq!(
        h.request(9_000).await.message,
        "Your account doesn't have sufficient funds for the transfer."
    );

    h.stores
        .notifications
        .update_notification("low_credit", "Kulang ang load mo.")
        .await
        .unwrap();
    assert_eq!(h.request(9_000).await.message, "Kulang ang load mo.");
}

#[tokio::test]
async fn test_sms_failure_does_not_change_outcome() {
    let stores = Stores::in_memory();
    stores
        .denominations
        .replace_all(&[DenominationBracket::new(1, 1, 10_000, 30)])
        .await
        .unwrap();
    let sms = Arc::new(FailingSmsSender::default());
    let engine = CreditTransferEngine::new(
        settings(20_000),
        stores.clone(),
        sms.clone(),
        Arc::new(ManualClock::new(start())),
    );
    let h = Harness {
        engine,
        stores,
        sms: Arc::new(LogSmsSender::new()),
        clock: Arc::new(ManualClock::new(start())),
    };
    h.add(SENDER, SENDER_NUMBER, 5_000, AccountState::ACTIVE).await;
    h.add(RECIPIENT, RECIPIENT_NUMBER, 0, AccountState::ACTIVE).await;

    let sender = Imsi::new(SENDER);
    let code = h
        .engine
        .handle_incoming(&sender, "5551002*20")
        .await
        .unwrap()
        .code
        .unwrap();
    let reply = h
        .engine
        .handle_incoming(&sender, code.as_str())
        .await
        .unwrap();
    assert_eq!(reply.state, TransferState::Settled);
    assert_eq!(h.balance(RECIPIENT).await, 2_000);
    assert_eq!(sms.attempts(), 3);
}
