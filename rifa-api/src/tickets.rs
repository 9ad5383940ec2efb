use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use rifa_raffle::{NumberStatus, Progress, ReferenceStatus, ReservationError, ReservationRequest};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub price: i64,
    pub max_numbers: usize,
    pub total_numbers: u16,
    pub currency: String,
    pub raffle_name: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub numbers: Vec<NumberStatus>,
}

/// Storefront form. Field names of the original Spanish form are accepted too.
#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    #[serde(default, alias = "nombre")]
    pub buyer_name: String,
    #[serde(default, alias = "correo")]
    pub buyer_email: String,
    #[serde(default, alias = "telefono")]
    pub buyer_phone: String,
    /// Strings (`"007"`) or bare integers (`7`).
    #[serde(default, alias = "numeros")]
    pub numbers: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub reference: String,
    pub numbers: Vec<String>,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct ReferenceStatusResponse {
    pub reference: String,
    pub status: ReferenceStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/config", get(get_config))
        .route("/api/tickets/numeros", get(get_numbers))
        .route("/api/tickets/consulta", get(get_progress))
        .route("/api/tickets/stream", get(availability_stream))
        .route("/api/tickets/guardar-pendiente", post(reserve_numbers))
        .route("/api/tickets/reference/{reference}", get(get_reference_status))
}

/// GET /api/config
async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        price: state.terms.price_per_ticket,
        max_numbers: state.terms.max_numbers_per_purchase,
        total_numbers: state.terms.total_numbers(),
        currency: state.terms.currency.clone(),
        raffle_name: state.terms.raffle_name.clone(),
    })
}

/// GET /api/tickets/numeros
async fn get_numbers(State(state): State<AppState>) -> Result<Json<AvailabilityResponse>, AppError> {
    let numbers = state.ledger.availability().await?;
    Ok(Json(AvailabilityResponse { numbers }))
}

/// GET /api/tickets/consulta
async fn get_progress(State(state): State<AppState>) -> Result<Json<Progress>, AppError> {
    Ok(Json(state.ledger.progress().await?))
}

/// GET /api/tickets/stream
///
/// Availability changes as server-sent events. Slow listeners skip what they
/// missed and are expected to refetch `/api/tickets/numeros`.
async fn availability_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse_tx.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default().event(event.name()).json_data(&event).ok().map(Ok),
            Err(lagged) => {
                tracing::debug!("SSE listener lagged: {}", lagged);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/tickets/guardar-pendiente
async fn reserve_numbers(
    State(state): State<AppState>,
    body: Result<Json<ReserveBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ReserveResponse>), AppError> {
    let Json(body) = body.map_err(|e| {
        state.metrics.record_reservation("invalid");
        AppError::ValidationError(e.body_text())
    })?;

    let numbers = match raw_numbers(&body.numbers) {
        Ok(numbers) => numbers,
        Err(e) => {
            state.metrics.record_reservation("invalid");
            return Err(e);
        }
    };

    let request = ReservationRequest {
        buyer_name: body.buyer_name,
        buyer_email: body.buyer_email,
        buyer_phone: body.buyer_phone,
        numbers,
    };

    match state.reservations.reserve(request).await {
        Ok(claim) => {
            state.metrics.record_reservation("created");
            Ok((
                StatusCode::CREATED,
                Json(ReserveResponse {
                    numbers: claim.number_strings(),
                    reference: claim.reference,
                    amount: claim.amount,
                }),
            ))
        }
        Err(e) => {
            state.metrics.record_reservation(match &e {
                ReservationError::Validation(_) => "invalid",
                ReservationError::Conflict(_) => "conflict",
                ReservationError::Store(_) => "error",
            });
            Err(e.into())
        }
    }
}

fn raw_numbers(values: &[Value]) -> Result<Vec<String>, AppError> {
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(AppError::ValidationError(format!("Invalid ticket number: {}", other))),
        })
        .collect()
}

/// GET /api/tickets/reference/{reference}
async fn get_reference_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ReferenceStatusResponse>, AppError> {
    let status = state.checkout.reference_status(&reference).await?;
    Ok(Json(ReferenceStatusResponse { reference, status }))
}
