use serde::Serialize;
use std::sync::Arc;

use rifa_core::payment::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};
use rifa_core::repository::TicketRepository;
use rifa_core::StoreError;

use crate::pricing::RaffleTerms;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("No pending reservation for reference {0}")]
    ClaimNotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a payment reference stands, as seen by the buyer's return page.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Pending,
    Paid,
    Unknown,
}

/// Hosted checkout for live claims, priced from the claim.
#[derive(Clone)]
pub struct CheckoutService {
    tickets: Arc<dyn TicketRepository>,
    gateway: Arc<dyn PaymentGateway>,
    terms: RaffleTerms,
    base_url: String,
}

impl CheckoutService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        gateway: Arc<dyn PaymentGateway>,
        terms: RaffleTerms,
        base_url: &str,
    ) -> Self {
        Self {
            tickets,
            gateway,
            terms,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn start(&self, reference: &str) -> Result<CheckoutSession, CheckoutError> {
        let claim = self
            .tickets
            .find_claim(reference)
            .await?
            .ok_or_else(|| CheckoutError::ClaimNotFound(reference.to_string()))?;

        let request = CheckoutRequest {
            reference: claim.reference.clone(),
            title: format!("Tickets de {} - Ref: {}", self.terms.raffle_name, claim.reference),
            amount: claim.amount,
            currency: self.terms.currency.clone(),
            payer_name: claim.buyer_name.clone(),
            payer_email: claim.buyer_email.clone(),
            payer_phone: claim.buyer_phone.clone(),
            return_url: format!("{}/verificar-pago.html?ref={}", self.base_url, claim.reference),
            notification_url: format!("{}/api/mercadopago/webhook", self.base_url),
        };

        let session = self.gateway.create_checkout(&request).await?;
        tracing::info!(%reference, amount = claim.amount, "Checkout started");
        Ok(session)
    }

    /// Read-only; never changes the claim or sale it looks at.
    pub async fn reference_status(&self, reference: &str) -> Result<ReferenceStatus, StoreError> {
        if self.tickets.find_sale(None, reference).await?.is_some() {
            return Ok(ReferenceStatus::Paid);
        }
        if self.tickets.find_claim(reference).await?.is_some() {
            return Ok(ReferenceStatus::Pending);
        }
        Ok(ReferenceStatus::Unknown)
    }
}
