use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use rifa_core::{PendingClaim, Sale, WebhookPage, WebhookQuery};
use rifa_shared::AvailabilityEvent;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Paid,
}

/// A sale or a live claim, flattened for the admin table.
#[derive(Debug, Serialize)]
pub struct AdminTicket {
    pub id: Uuid,
    pub reference: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub buyer_phone: String,
    pub numbers: Vec<String>,
    pub amount: i64,
    pub status: PaymentState,
    pub payment_method: Option<String>,
    pub external_payment_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Sale> for AdminTicket {
    fn from(sale: Sale) -> Self {
        Self {
            id: sale.id,
            numbers: sale.number_strings(),
            reference: sale.reference,
            buyer_name: sale.buyer_name,
            buyer_email: sale.buyer_email,
            buyer_phone: sale.buyer_phone,
            amount: sale.amount_paid,
            status: PaymentState::Paid,
            payment_method: Some(sale.payment_method),
            external_payment_id: Some(sale.external_payment_id),
            paid_at: Some(sale.paid_at),
            created_at: sale.created_at,
        }
    }
}

impl From<PendingClaim> for AdminTicket {
    fn from(claim: PendingClaim) -> Self {
        Self {
            id: claim.id,
            numbers: claim.number_strings(),
            reference: claim.reference,
            buyer_name: claim.buyer_name,
            buyer_email: claim.buyer_email,
            buyer_phone: claim.buyer_phone,
            amount: claim.amount,
            status: PaymentState::Pending,
            payment_method: None,
            external_payment_id: None,
            paid_at: None,
            created_at: claim.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminTicketsResponse {
    pub tickets: Vec<AdminTicket>,
}

/// Mounted behind `admin_auth_middleware` by `app()`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/tickets", get(list_tickets))
        .route("/api/admin/tickets/{id}", delete(delete_ticket))
        .route("/api/admin/webhooks", get(list_webhooks))
}

/// GET /api/admin/tickets
async fn list_tickets(State(state): State<AppState>) -> Result<Json<AdminTicketsResponse>, AppError> {
    let sales = state.tickets.list_sales().await?;
    let claims = state.tickets.list_claims().await?;

    let mut tickets: Vec<AdminTicket> = sales
        .into_iter()
        .map(AdminTicket::from)
        .chain(claims.into_iter().map(AdminTicket::from))
        .collect();
    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(AdminTicketsResponse { tickets }))
}

/// DELETE /api/admin/tickets/{id}
///
/// Removes a sale or a claim and frees its numbers.
async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let held = find_ticket(&state, id).await?;

    if !state.tickets.delete_record(id).await? {
        return Err(AppError::NotFoundError(format!("Ticket {} not found", id)));
    }

    if let Some(ticket) = held {
        tracing::info!(%id, reference = %ticket.reference, numbers = %ticket.numbers.join(","), "Admin deleted ticket");
        let _ = state.sse_tx.send(AvailabilityEvent::released(&ticket.reference, ticket.numbers));
    }

    Ok(Json(json!({ "deleted": id })))
}

async fn find_ticket(state: &AppState, id: Uuid) -> Result<Option<AdminTicket>, AppError> {
    if let Some(sale) = state.tickets.list_sales().await?.into_iter().find(|s| s.id == id) {
        return Ok(Some(sale.into()));
    }
    Ok(state
        .tickets
        .list_claims()
        .await?
        .into_iter()
        .find(|c| c.id == id)
        .map(AdminTicket::from))
}

/// GET /api/admin/webhooks?page&limit&q
async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
) -> Result<Json<WebhookPage>, AppError> {
    Ok(Json(state.webhooks.list(&query).await?))
}
