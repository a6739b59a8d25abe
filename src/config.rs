use anyhow::{Context, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::credit_transfer::{DEFAULT_PENDING_WINDOW_SECS, TransferSettings};
use crate::denomination::DenominationBracket;
use crate::money::currency;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// When false, the per-message `SMSFLOW` target is silenced.
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    /// PostgreSQL connection URL; in-memory stores when absent.
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Seed brackets, amounts in raw subunits. Replaces the stored set when
    /// non-empty.
    #[serde(default)]
    pub denominations: Vec<DenominationBracket>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Short code replies are sent from.
    pub app_number: String,
    pub code_length: usize,
    /// Balance cap in raw subunits.
    pub network_max_balance: i64,
    /// Abuse-flagged attempts before auto-block.
    pub network_mput: u32,
    pub currency_code: String,
    #[serde(default = "default_pending_window_secs")]
    pub pending_window_secs: i64,
}

fn default_pending_window_secs() -> i64 {
    DEFAULT_PENDING_WINDOW_SECS
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SmsConfig {
    /// HTTP endpoint of the SMS gateway; messages are only logged when unset.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=9).contains(&self.code_length) {
            bail!("network.code_length must be 1..=9, got {}", self.code_length);
        }
        if self.network_mput < 1 {
            bail!("network.network_mput must be at least 1");
        }
        if self.network_max_balance <= 0 {
            bail!("network.network_max_balance must be positive");
        }
        if self.pending_window_secs <= 0 {
            bail!("network.pending_window_secs must be positive");
        }
        if self.app_number.trim().is_empty() {
            bail!("network.app_number must not be empty");
        }
        currency(&self.currency_code)?;
        Ok(())
    }

    pub fn settings(&self) -> anyhow::Result<TransferSettings> {
        self.validate()?;
        Ok(TransferSettings {
            app_number: self.app_number.clone(),
            code_length: self.code_length,
            network_max_balance: self.network_max_balance,
            network_mput: self.network_mput,
            currency: currency(&self.currency_code)?,
            pending_window: Duration::seconds(self.pending_window_secs),
        })
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.network.validate()?;
        for bracket in &config.denominations {
            bracket.validate()?;
        }
        Ok(config)
    }
}
