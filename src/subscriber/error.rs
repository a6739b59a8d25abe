//! Subscriber store errors.

use thiserror::Error;

use crate::core_types::RawAmount;
use crate::crdt::InvalidStateError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    #[error("Subscriber not found: {0}")]
    NotFound(String),

    #[error("Subscriber already exists: {0}")]
    Duplicate(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds for {imsi}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        imsi: String,
        balance: RawAmount,
        requested: RawAmount,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl SubscriberError {
    pub fn code(&self) -> &'static str {
        match self {
            SubscriberError::NotFound(_) => "SUBSCRIBER_NOT_FOUND",
            SubscriberError::Duplicate(_) => "DUPLICATE_SUBSCRIBER",
            SubscriberError::InvalidState(_) => "INVALID_STATE",
            SubscriberError::InvalidAmount(_) => "INVALID_AMOUNT",
            SubscriberError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SubscriberError::Database(_) => "DATABASE_ERROR",
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SubscriberError::NotFound(_))
    }
}

impl From<sqlx::Error> for SubscriberError {
    fn from(e: sqlx::Error) -> Self {
        SubscriberError::Database(e.to_string())
    }
}
