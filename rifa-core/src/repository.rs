use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::records::{
    Occupancy, PendingClaim, PromoteOutcome, Sale, WebhookPage, WebhookQuery, WebhookRecord,
};
use crate::ticket::TicketNumber;
use crate::StoreResult;

/// Persistence for claims and sales.
///
/// Implementations must keep every ticket number owned by at most one live
/// claim or sale; the guarantee has to hold under concurrent callers, not
/// just for callers that check availability first.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Every unavailable number and whether it is reserved or sold.
    async fn occupied_numbers(&self) -> StoreResult<Vec<(TicketNumber, Occupancy)>>;

    /// Persist a claim. Fails with `StoreError::NumbersTaken` naming the numbers
    /// some other claim or sale already owns; nothing is written in that case.
    async fn insert_claim(&self, claim: &PendingClaim) -> StoreResult<()>;

    async fn find_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>>;

    /// Sale matching either the gateway payment id (when given) or the reference.
    async fn find_sale(&self, external_payment_id: Option<&str>, reference: &str) -> StoreResult<Option<Sale>>;

    /// Create `sale` and delete the claim with the same reference, atomically.
    async fn promote_claim(&self, sale: &Sale) -> StoreResult<PromoteOutcome>;

    /// Delete the claim for `reference`, releasing its numbers.
    async fn discard_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>>;

    /// Delete claims created before `cutoff`, returning them.
    async fn expire_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PendingClaim>>;

    async fn list_claims(&self) -> StoreResult<Vec<PendingClaim>>;

    async fn list_sales(&self) -> StoreResult<Vec<Sale>>;

    /// Admin delete by id on either collection. Returns false if neither had it.
    async fn delete_record(&self, id: Uuid) -> StoreResult<bool>;
}

/// Audit trail of inbound gateway notifications.
#[async_trait]
pub trait WebhookLogRepository: Send + Sync {
    async fn record(&self, entry: &WebhookRecord) -> StoreResult<()>;

    async fn list(&self, query: &WebhookQuery) -> StoreResult<WebhookPage>;
}

/// Numbers of `requested` that appear in `taken`, ascending.
pub fn overlapping(
    requested: &BTreeSet<TicketNumber>,
    taken: impl IntoIterator<Item = TicketNumber>,
) -> Vec<TicketNumber> {
    let taken: BTreeSet<TicketNumber> = taken.into_iter().collect();
    requested.intersection(&taken).copied().collect()
}
