//! Cloud sync → SMS request → confirmation, driven over HTTP against an
//! in-memory gateway.

use chrono::Duration;
use serde_json::{Value, json};
use std::sync::Arc;

use cellcredit::clock::SystemClock;
use cellcredit::credit_transfer::{CreditTransferEngine, FixedCodes, Stores, TransferSettings};
use cellcredit::denomination::DenominationBracket;
use cellcredit::gateway::{router, state::AppState};
use cellcredit::money::USD;
use cellcredit::sms::LogSmsSender;

const ALICE: &str = "IMSI001010000000101";
const BOB: &str = "IMSI001010000000102";

struct Gateway {
    base: String,
    client: reqwest::Client,
    sms: Arc<LogSmsSender>,
}

impl Gateway {
    async fn start() -> Self {
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
        let settings = TransferSettings {
            app_number: "101".into(),
            code_length: 5,
            network_max_balance: 20_000,
            network_mput: 3,
            currency: &USD,
            pending_window: Duration::seconds(600),
        };
        let engine = CreditTransferEngine::new(settings, stores, sms.clone(), Arc::new(SystemClock))
            .with_code_source(Arc::new(FixedCodes::new(["48213"])));
        let app = router(Arc::new(AppState::new(Arc::new(engine), None)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            sms,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_transfer_over_http() {
    let gw = Gateway::start().await;

    let (status, body) = gw
        .post(
            "/api/v1/sync/subscribers",
            json!({
                ALICE: { "numbers": ["5551001"], "balance": { "p": { "cloud": 5000 }, "n": {} } },
                BOB:   { "numbers": ["5551002"], "balance": { "p": {}, "n": {} } },
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["added"], 2);

    let (status, body) = gw
        .post(
            "/api/v1/sync/status",
            json!({
                ALICE: { "state": "active", "validity": "2030-01-01" },
                BOB:   { "state": "active", "validity": null },
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["added"], 2);

    let (status, body) = gw
        .post(
            "/api/v1/sms/incoming",
            json!({ "from_imsi": ALICE, "text": "5551002*20" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["state"], "PENDING_CONFIRMATION");
    assert_eq!(body["data"]["confirmation_code"], "48213");

    let (_, body) = gw
        .post(
            "/api/v1/sms/incoming",
            json!({ "from_imsi": ALICE, "text": "48213" }),
        )
        .await;
    assert_eq!(body["data"]["state"], "SETTLED");
    assert_eq!(
        body["data"]["reply"],
        "You've transferred $20.00 to 5551002 Your new balance is $30.00."
    );

    assert_eq!(gw.sms.sent_to("5551001").len(), 2);
    let notice = gw.sms.sent_to("5551002");
    assert_eq!(notice.len(), 1);
    assert!(notice[0].starts_with("You've received $20.00. credits from 5551001"));
}

#[tokio::test]
async fn test_service_gate_and_health() {
    let gw = Gateway::start().await;
    gw.post(
        "/api/v1/sync/subscribers",
        json!({ ALICE: { "numbers": ["5551001"], "balance": { "p": {}, "n": {} } } }),
    )
    .await;
    gw.post(
        "/api/v1/sync/status",
        json!({ ALICE: { "state": "first_expired", "validity": "2020-01-01" } }),
    )
    .await;

    let (_, body) = gw
        .get("/api/v1/subscribers/5551001/service?destination=false")
        .await;
    assert_eq!(body["data"]["allowed"], false);
    let (_, body) = gw
        .get("/api/v1/subscribers/5551001/service?destination=true")
        .await;
    assert_eq!(body["data"]["allowed"], true);
    let (_, body) = gw
        .get("/api/v1/subscribers/911/service?destination=true")
        .await;
    assert_eq!(body["data"]["allowed"], true);

    let (status, body) = gw.get("/api/v1/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["backend"], "memory");
}

#[tokio::test]
async fn test_notification_sync_overrides_replies() {
    let gw = Gateway::start().await;
    let (status, body) = gw
        .post(
            "/api/v1/sync/notifications",
            json!({ "transfer_help": "Send NUMBER*AMOUNT to 101." }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["added"], 1);

    gw.post(
        "/api/v1/sync/subscribers",
        json!({ ALICE: { "numbers": ["5551001"], "balance": { "p": {}, "n": {} } } }),
    )
    .await;
    let (_, body) = gw
        .post(
            "/api/v1/sms/incoming",
            json!({ "from_imsi": ALICE, "text": "help" }),
        )
        .await;
    assert_eq!(body["data"]["reply"], "Send NUMBER*AMOUNT to 101.");
    assert_eq!(gw.sms.sent_to("5551001"), vec!["Send NUMBER*AMOUNT to 101."]);
}
