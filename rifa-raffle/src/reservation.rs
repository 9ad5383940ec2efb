use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use rifa_core::repository::{overlapping, TicketRepository};
use rifa_core::ticket::join;
use rifa_core::{PendingClaim, StoreError, TicketNumber};
use rifa_shared::{mask_email, AvailabilityEvent};

use crate::ledger::NumberLedger;
use crate::pricing::RaffleTerms;

/// Fresh references tried before a collision is reported as a storage error.
const REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub buyer_name: String,
    pub buyer_email: String,
    pub buyer_phone: String,
    /// Raw ticket numbers as the buyer sent them (`"7"`, `"007"`).
    pub numbers: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("{0}")]
    Validation(String),
    #[error("Ticket numbers already taken: {}", join(.0))]
    Conflict(Vec<TicketNumber>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `RIFA-<unix millis>-<4 random alphanumerics>`.
pub fn generate_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("RIFA-{}-{}", Utc::now().timestamp_millis(), suffix.to_uppercase())
}

/// `local@domain.tld` with no whitespace anywhere.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain
                    .char_indices()
                    .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
        }
        None => false,
    }
}

fn required(value: &str, field: &str) -> Result<String, ReservationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ReservationError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Validates purchase requests and turns them into pending claims.
#[derive(Clone)]
pub struct ReservationManager {
    tickets: Arc<dyn TicketRepository>,
    ledger: NumberLedger,
    terms: RaffleTerms,
    events: broadcast::Sender<AvailabilityEvent>,
}

impl ReservationManager {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        terms: RaffleTerms,
        events: broadcast::Sender<AvailabilityEvent>,
    ) -> Self {
        Self {
            ledger: NumberLedger::new(tickets.clone()),
            tickets,
            terms,
            events,
        }
    }

    /// Normalize and bound the requested numbers.
    pub fn parse_numbers(&self, raw: &[String]) -> Result<BTreeSet<TicketNumber>, ReservationError> {
        if raw.is_empty() {
            return Err(ReservationError::Validation("At least one ticket number is required".to_string()));
        }

        let numbers = raw
            .iter()
            .map(|n| {
                n.parse::<TicketNumber>()
                    .map_err(|e| ReservationError::Validation(e.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        if numbers.len() > self.terms.max_numbers_per_purchase {
            return Err(ReservationError::Validation(format!(
                "At most {} numbers per purchase",
                self.terms.max_numbers_per_purchase
            )));
        }
        Ok(numbers)
    }

    /// Hold the requested numbers for the buyer under a new payment reference.
    ///
    /// Either every number is reserved or none is. Numbers already held by a
    /// claim or a sale come back as `Conflict`, including ones lost to a
    /// concurrent reservation between the availability check and the write.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<PendingClaim, ReservationError> {
        let buyer_name = required(&request.buyer_name, "Buyer name")?;
        let buyer_email = required(&request.buyer_email, "Buyer e-mail")?.to_lowercase();
        let buyer_phone = required(&request.buyer_phone, "Buyer phone")?;
        if !is_valid_email(&buyer_email) {
            return Err(ReservationError::Validation("Buyer e-mail is not valid".to_string()));
        }

        let numbers = self.parse_numbers(&request.numbers)?;

        let occupied = self.ledger.occupied_numbers().await?;
        let conflicts = overlapping(&numbers, occupied);
        if !conflicts.is_empty() {
            tracing::info!(conflicts = %join(&conflicts), "Reservation rejected, numbers taken");
            return Err(ReservationError::Conflict(conflicts));
        }

        let amount = self
            .terms
            .amount_for(numbers.len())
            .ok_or_else(|| ReservationError::Validation("Purchase amount out of range".to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let claim = PendingClaim::new(
                generate_reference(),
                buyer_name.clone(),
                buyer_email.clone(),
                buyer_phone.clone(),
                numbers.clone(),
                amount,
            );

            match self.tickets.insert_claim(&claim).await {
                Ok(()) => {
                    tracing::info!(
                        reference = %claim.reference,
                        numbers = %join(&claim.numbers),
                        amount,
                        buyer = %mask_email(&claim.buyer_email),
                        "Numbers reserved"
                    );
                    let _ = self
                        .events
                        .send(AvailabilityEvent::reserved(&claim.reference, claim.number_strings()));
                    return Ok(claim);
                }
                Err(StoreError::NumbersTaken(lost)) => {
                    tracing::info!(conflicts = %join(&lost), "Reservation lost a race for numbers");
                    return Err(ReservationError::Conflict(lost));
                }
                Err(StoreError::DuplicateReference(reference)) if attempt < REFERENCE_ATTEMPTS => {
                    tracing::debug!(%reference, "Reference collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
