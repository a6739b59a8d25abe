//! API request/response types
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` envelope
//! - `error_codes`: numeric codes carried in `code`

use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::core_types::Imsi;
use crate::credit_transfer::{TransferError, TransferReply};
use crate::subscriber::SubscriberError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn api_error(status: StatusCode, code: i32, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

impl From<TransferError> for (StatusCode, Json<ApiResponse<()>>) {
    fn from(e: TransferError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match status {
            StatusCode::BAD_REQUEST => error_codes::INVALID_PARAMETER,
            StatusCode::NOT_FOUND => error_codes::NOT_FOUND,
            StatusCode::CONFLICT => error_codes::CONFLICT,
            StatusCode::BAD_GATEWAY => error_codes::SMS_UNAVAILABLE,
            _ => error_codes::INTERNAL_ERROR,
        };
        api_error(status, code, format!("{}: {}", e.code(), e))
    }
}

impl From<SubscriberError> for (StatusCode, Json<ApiResponse<()>>) {
    fn from(e: SubscriberError) -> Self {
        TransferError::from(e).into()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One SMS handed over by the switch.
#[derive(Debug, Deserialize)]
pub struct IncomingSms {
    pub from_imsi: Imsi,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    #[serde(default)]
    pub destination: bool,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Reply sent to the subscriber for one SMS.
#[derive(Debug, Serialize, Deserialize)]
pub struct SmsReplyData {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_code: Option<String>,
    pub reply: String,
}

impl From<TransferReply> for SmsReplyData {
    fn from(reply: TransferReply) -> Self {
        Self {
            state: reply.state.as_str().to_string(),
            rejection: reply.rejection.as_ref().map(|r| r.code().to_string()),
            confirmation_code: reply.code.map(|c| c.to_string()),
            reply: reply.message,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceData {
    pub subscriber: String,
    pub destination: bool,
    pub allowed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthData {
    pub timestamp_ms: i64,
    pub backend: String,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const SMS_UNAVAILABLE: i32 = 5002;
}
