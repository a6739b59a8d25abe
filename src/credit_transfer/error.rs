//! Credit Transfer Error Types
//!
//! Infrastructure failures only. Business-rule rejections (self transfer,
//! low credit, cap exceeded, ...) are [`super::types::Rejection`] values
//! carried in a normal reply.

use thiserror::Error;

use super::messages::NotificationError;
use crate::denomination::DenominationError;
use crate::money::MoneyError;
use crate::subscriber::SubscriberError;

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// Another live pending transfer already holds this code.
    #[error("Confirmation code already pending: {0}")]
    DuplicateCode(String),

    #[error(transparent)]
    Subscriber(#[from] SubscriberError),

    #[error(transparent)]
    Denomination(#[from] DenominationError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("Settlement not found: {0}")]
    SettlementNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("SMS delivery failed: {0}")]
    SmsFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::DuplicateCode(_) => "DUPLICATE_CODE",
            TransferError::Subscriber(e) => e.code(),
            TransferError::Denomination(e) => e.code(),
            TransferError::Money(_) => "INVALID_AMOUNT",
            TransferError::Notification(NotificationError::NotFound(_)) => "NOTIFICATION_NOT_FOUND",
            TransferError::Notification(NotificationError::Duplicate(_)) => "DUPLICATE_NOTIFICATION",
            TransferError::Notification(NotificationError::Database(_)) => "DATABASE_ERROR",
            TransferError::SettlementNotFound(_) => "SETTLEMENT_NOT_FOUND",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::SmsFailed(_) => "SMS_FAILED",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Money(_) => 400,
            TransferError::Subscriber(e) if e.is_not_found() => 404,
            TransferError::Notification(NotificationError::NotFound(_)) => 404,
            TransferError::SettlementNotFound(_) => 404,
            TransferError::DuplicateCode(_) => 409,
            TransferError::SmsFailed(_) => 502,
            _ => 500,
        }
    }

    #[inline]
    pub fn is_subscriber_not_found(&self) -> bool {
        matches!(self, TransferError::Subscriber(e) if e.is_not_found())
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}
