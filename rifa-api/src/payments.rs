use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use rifa_gateway::signature;
use rifa_raffle::RawNotification;

use crate::{error::AppError, state::AppState};

/// Any client-side amount in the body is ignored; the claim sets the price.
#[derive(Debug, Deserialize)]
pub struct PreferenceRequest {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct PreferenceResponse {
    pub preference_id: String,
    pub init_point: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/mercadopago/preference", post(create_preference))
        .route(WEBHOOK_PATH, post(handle_webhook))
}

pub const WEBHOOK_PATH: &str = "/api/mercadopago/webhook";

/// POST /api/mercadopago/preference
async fn create_preference(
    State(state): State<AppState>,
    Json(payload): Json<PreferenceRequest>,
) -> Result<Json<PreferenceResponse>, AppError> {
    let reference = payload.reference.trim();
    if reference.is_empty() {
        return Err(AppError::ValidationError("reference is required".to_string()));
    }

    let session = state.checkout.start(reference).await?;
    Ok(Json(PreferenceResponse {
        preference_id: session.id,
        init_point: session.init_point,
    }))
}

/// POST /api/mercadopago/webhook
///
/// Acknowledged as soon as it is authenticated. Reconciliation runs in the
/// background so a slow gateway lookup never makes the sender retry.
async fn handle_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let raw = RawNotification::new(query, body);

    if let Some(secret) = &state.webhook_secret {
        let header = headers.get("x-signature").and_then(|h| h.to_str().ok());
        let request_id = headers
            .get("x-request-id")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        let data_id = raw.data_id().unwrap_or_default();

        if let Err(e) = signature::verify(secret, header, request_id, &data_id) {
            tracing::warn!(kind = %raw.kind(), %data_id, "Rejected webhook: {}", e);
            state.metrics.record_reconciliation("bad_signature");
            return Err(AppError::AuthenticationError(e.to_string()));
        }
    }

    tracing::info!(kind = %raw.kind(), data_id = ?raw.data_id(), "Webhook received");

    let reconciler = state.reconciler.clone();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        let outcome = reconciler.handle_notification(raw).await;
        metrics.record_reconciliation(outcome.label());
    });

    Ok(Json(json!({ "status": "received" })))
}
