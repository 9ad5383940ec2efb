pub mod notifier;
pub mod payment;
pub mod records;
pub mod repository;
pub mod ticket;

pub use records::{Occupancy, PendingClaim, PromoteOutcome, Sale, WebhookPage, WebhookQuery, WebhookRecord};
pub use ticket::{TicketNumber, TicketNumberError, TOTAL_NUMBERS};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Ticket numbers already taken: {}", ticket::join(.0))]
    NumbersTaken(Vec<TicketNumber>),
    #[error("Reference already exists: {0}")]
    DuplicateReference(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
