use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use rifa_core::ticket::join;
use rifa_core::{StoreError, TicketNumber};
use rifa_raffle::{CheckoutError, ReservationError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    /// Numbers some other buyer holds; listed back so the client can drop them.
    #[error("Ticket numbers already taken: {}", join(.0))]
    ConflictError(Vec<TicketNumber>),
    #[error("Payment gateway error: {0}")]
    BadGateway(String),
    #[error("Internal Server Error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::AuthenticationError(_) => (StatusCode::UNAUTHORIZED, json!({ "error": self.to_string() })),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            AppError::NotFoundError(_) => (StatusCode::NOT_FOUND, json!({ "error": self.to_string() })),
            AppError::ConflictError(numbers) => {
                let conflicts: Vec<String> = numbers.iter().map(ToString::to_string).collect();
                (StatusCode::CONFLICT, json!({ "error": self.to_string(), "conflicts": conflicts }))
            }
            AppError::BadGateway(_) => {
                tracing::error!("{}", self);
                (StatusCode::BAD_GATEWAY, json!({ "error": "Payment gateway unavailable" }))
            }
            AppError::InternalServerError(_) => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NumbersTaken(numbers) => AppError::ConflictError(numbers),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Validation(msg) => AppError::ValidationError(msg),
            ReservationError::Conflict(numbers) => AppError::ConflictError(numbers),
            ReservationError::Store(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::ClaimNotFound(reference) => {
                AppError::NotFoundError(format!("No pending reservation for reference {}", reference))
            }
            CheckoutError::Gateway(e) => AppError::BadGateway(e.to_string()),
            CheckoutError::Store(e) => e.into(),
        }
    }
}
