//! cellcredit - SMS credit-transfer service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  Switch  │───▶│ Gateway  │───▶│   Transfer   │───▶│  Stores  │
//! │  (SMS)   │    │  (HTTP)  │    │    Engine    │    │ (PG/mem) │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//!                      ▲                  │
//!                 cloud sync         reply SMS
//! ```
//!
//! Usage: `cellcredit [--env dev] [--port 8080]`

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use cellcredit::clock::SystemClock;
use cellcredit::config::AppConfig;
use cellcredit::credit_transfer::{CreditTransferEngine, Stores};
use cellcredit::db::Database;
use cellcredit::gateway::{self, state::AppState};
use cellcredit::sms::{HttpSmsSender, LogSmsSender, SmsSender};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = get_arg(&["--port", "-p"]) {
        app_config.gateway.port = port.parse().context("--port must be a number")?;
    }
    let _log_guard = cellcredit::logging::init_logging(&app_config);
    tracing::info!(env = %env, "Starting cellcredit");

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(app_config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let settings = config.network.settings()?;

    let (stores, pg_db) = match config.postgres_url {
        Some(ref url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.init_schema().await.context("Failed to init schema")?;
            let stores = Stores::postgres(db.pool().clone());
            (stores, Some(Arc::new(db)))
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory stores (state is lost on exit)");
            (Stores::in_memory(), None)
        }
    };

    if !config.denominations.is_empty() {
        stores
            .denominations
            .replace_all(&config.denominations)
            .await
            .context("Failed to seed denominations")?;
        tracing::info!(brackets = config.denominations.len(), "Denominations seeded");
    }

    let sms: Arc<dyn SmsSender> = match config.sms.endpoint {
        Some(ref endpoint) => {
            tracing::info!(%endpoint, "Outbound SMS via HTTP gateway");
            Arc::new(HttpSmsSender::new(
                endpoint.clone(),
                Duration::from_millis(config.sms.timeout_ms),
            )?)
        }
        None => {
            tracing::warn!("sms.endpoint not set, outbound SMS are only logged");
            Arc::new(LogSmsSender::new())
        }
    };

    let engine = Arc::new(CreditTransferEngine::new(
        settings,
        stores,
        sms,
        Arc::new(SystemClock),
    ));

    let recovered = engine.recover_settlements().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Finished interrupted settlements");
    }

    let state = Arc::new(AppState::new(engine, pg_db));
    gateway::run_server(&config.gateway.host, config.gateway.port, state).await
}
