//! Outbound SMS transport
//!
//! `send(to, from, text)` is fire-and-forget from the protocol's point of
//! view: a delivery failure is logged by the caller and never changes a
//! transfer outcome.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::credit_transfer::TransferError;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, from: &str, text: &str) -> Result<(), TransferError>;
}

#[derive(Serialize)]
struct OutboundSms<'a> {
    to: &'a str,
    from: &'a str,
    body: &'a str,
}

/// Posts each message as JSON `{to, from, body}` to an SMS gateway.
pub struct HttpSmsSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSmsSender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::SmsFailed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, from: &str, text: &str) -> Result<(), TransferError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OutboundSms { to, from, body: text })
            .send()
            .await
            .map_err(|e| TransferError::SmsFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::SmsFailed(format!(
                "gateway answered {} for message to {}",
                status, to
            )));
        }
        debug!(to, from, "SMS handed to gateway");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub to: String,
    pub from: String,
    pub text: String,
}

/// Logs messages and keeps them in an outbox. Used when no gateway is
/// configured.
#[derive(Debug, Default)]
pub struct LogSmsSender {
    outbox: Mutex<Vec<SentSms>>,
}

impl LogSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages addressed to `to`, oldest first.
    pub fn sent_to(&self, to: &str) -> Vec<String> {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.to == to)
            .map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, to: &str, from: &str, text: &str) -> Result<(), TransferError> {
        info!(target: "SMSFLOW", to, from, text, "SMS out");
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentSms {
                to: to.to_string(),
                from: from.to_string(),
                text: text.to_string(),
            });
        Ok(())
    }
}
