//! Credit transfer data types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::TransferState;
use crate::core_types::{Imsi, RawAmount};

/// Fixed-length numeric confirmation code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationCode(String);

impl ConfirmationCode {
    /// Accepts only ASCII digits.
    pub fn parse(code: &str) -> Option<Self> {
        (!code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(code.to_string()))
    }

    /// Wrap digits the caller generated itself.
    pub(crate) fn from_digits(digits: String) -> Self {
        debug_assert!(!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
        Self(digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated request waiting for its confirmation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub code: ConfirmationCode,
    pub created_at: DateTime<Utc>,
    pub from: Imsi,
    pub to: Imsi,
    pub amount: RawAmount,
}

impl PendingTransfer {
    pub fn new(
        code: ConfirmationCode,
        created_at: DateTime<Utc>,
        from: Imsi,
        to: Imsi,
        amount: RawAmount,
    ) -> Self {
        Self {
            code,
            created_at,
            from,
            to,
            amount,
        }
    }

    /// Expired once strictly more than `window` has elapsed; a row exactly
    /// `window` old is still live.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.created_at > window
    }
}

/// Business-rule outcome that ends an attempt without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    SelfTransfer,
    InvalidAmount,
    AccountBlocked,
    NoValidity,
    RecipientNotFound,
    InvalidNumber { number: String },
    InsufficientFunds,
    /// Recipient already holds more than the network cap.
    BalanceCapReached,
    /// Amount plus the recipient's balance would pass the cap.
    BalanceCapExceeded { max_transfer: RawAmount },
    DenominationMiss,
    ExpiredOrUnknownCode,
    /// No free confirmation code could be drawn.
    CodeUnavailable,
    /// A store or transport failed while handling the message.
    Internal,
    Unrecognized,
}

impl Rejection {
    /// Rejections that count toward the sender's auto-block.
    #[inline]
    pub fn is_abuse(&self) -> bool {
        matches!(
            self,
            Rejection::BalanceCapReached
                | Rejection::BalanceCapExceeded { .. }
                | Rejection::DenominationMiss
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::SelfTransfer => "SELF_TRANSFER",
            Rejection::InvalidAmount => "INVALID_AMOUNT",
            Rejection::AccountBlocked => "ACCOUNT_BLOCKED",
            Rejection::NoValidity => "NO_VALIDITY",
            Rejection::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            Rejection::InvalidNumber { .. } => "INVALID_NUMBER",
            Rejection::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Rejection::BalanceCapReached => "BALANCE_CAP_REACHED",
            Rejection::BalanceCapExceeded { .. } => "BALANCE_CAP_EXCEEDED",
            Rejection::DenominationMiss => "DENOMINATION_MISS",
            Rejection::ExpiredOrUnknownCode => "EXPIRED_OR_UNKNOWN_CODE",
            Rejection::CodeUnavailable => "CODE_UNAVAILABLE",
            Rejection::Internal => "INTERNAL_ERROR",
            Rejection::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// Result of one protocol step: the terminal (or pending) state and the
/// single SMS text owed to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReply {
    pub state: TransferState,
    pub rejection: Option<Rejection>,
    pub code: Option<ConfirmationCode>,
    pub message: String,
}

impl TransferReply {
    pub fn pending(code: ConfirmationCode, message: String) -> Self {
        Self {
            state: TransferState::PendingConfirmation,
            rejection: None,
            code: Some(code),
            message,
        }
    }

    pub fn settled(message: String) -> Self {
        Self {
            state: TransferState::Settled,
            rejection: None,
            code: None,
            message,
        }
    }

    pub fn rejected(rejection: Rejection, message: String) -> Self {
        let state = match rejection {
            Rejection::ExpiredOrUnknownCode => TransferState::Expired,
            Rejection::Unrecognized => TransferState::ParseRequest,
            _ => TransferState::Rejected,
        };
        Self {
            state,
            rejection: Some(rejection),
            code: None,
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.rejection.is_none()
    }
}
