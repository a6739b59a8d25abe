use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core_types::Imsi;
use crate::credit_transfer::{NotificationSyncSummary, TransferError};
use crate::subscriber::{StatusPush, SubscriberPush, SyncSummary};

use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, HealthData, IncomingSms, ServiceData, ServiceQuery,
    SmsReplyData, error_codes, ok,
};

/// POST /api/v1/sms/incoming
///
/// The reply SMS has already been sent when this returns; the body echoes it.
pub async fn incoming_sms(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IncomingSms>,
) -> ApiResult<SmsReplyData> {
    let reply = state
        .engine
        .handle_incoming(&req.from_imsi, &req.text)
        .await
        .map_err(ApiError::from)?;
    ok(reply.into())
}

/// GET /api/v1/subscribers/{subscriber}/service?destination=bool
pub async fn service_allowed(
    State(state): State<Arc<AppState>>,
    Path(subscriber): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> ApiResult<ServiceData> {
    let allowed = state
        .engine
        .service_allowed(&subscriber, query.destination)
        .await;
    ok(ServiceData {
        subscriber,
        destination: query.destination,
        allowed,
    })
}

/// POST /api/v1/sync/subscribers
pub async fn sync_subscribers(
    State(state): State<Arc<AppState>>,
    Json(push): Json<HashMap<Imsi, SubscriberPush>>,
) -> ApiResult<SyncSummary> {
    let summary = state
        .sync
        .process_balance_update(&push)
        .await
        .map_err(ApiError::from)?;
    ok(summary)
}

/// POST /api/v1/sync/status
pub async fn sync_status(
    State(state): State<Arc<AppState>>,
    Json(push): Json<HashMap<Imsi, StatusPush>>,
) -> ApiResult<SyncSummary> {
    let summary = state
        .sync
        .process_status_update(&push)
        .await
        .map_err(ApiError::from)?;
    ok(summary)
}

/// POST /api/v1/sync/notifications
pub async fn sync_notifications(
    State(state): State<Arc<AppState>>,
    Json(push): Json<HashMap<String, String>>,
) -> ApiResult<NotificationSyncSummary> {
    let summary = state
        .engine
        .stores()
        .notifications
        .sync_notifications(&push)
        .await
        .map_err(|e| ApiError::from(TransferError::from(e)))?;
    ok(summary)
}

/// GET /api/v1/health
///
/// 503 when the configured database does not answer.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthData> {
    let backend = match state.pg_db {
        Some(ref db) => {
            if let Err(e) = db.health_check().await {
                tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
                return Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse::<()>::error(
                        error_codes::SERVICE_UNAVAILABLE,
                        "unavailable",
                    )),
                ));
            }
            "postgres"
        }
        None => "memory",
    };
    ok(HealthData {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        backend: backend.to_string(),
    })
}
