use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::ticket::TicketNumber;

/// A temporary hold on a set of ticket numbers while the buyer pays.
///
/// Claims are never edited: the reconciler either promotes one to a [`Sale`]
/// or discards it, and the reaper deletes the ones nobody paid for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingClaim {
    pub id: Uuid,
    pub reference: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub buyer_phone: String,
    pub numbers: BTreeSet<TicketNumber>,
    /// Price per ticket times ticket count, fixed when the claim is created.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl PendingClaim {
    pub fn new(
        reference: String,
        buyer_name: String,
        buyer_email: String,
        buyer_phone: String,
        numbers: BTreeSet<TicketNumber>,
        amount: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            buyer_name,
            buyer_email,
            buyer_phone,
            numbers,
            amount,
            created_at: Utc::now(),
        }
    }

    pub fn number_strings(&self) -> Vec<String> {
        self.numbers.iter().map(|n| n.to_string()).collect()
    }
}

/// A paid, final purchase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sale {
    pub id: Uuid,
    pub reference: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub buyer_phone: String,
    pub numbers: BTreeSet<TicketNumber>,
    pub amount_paid: i64,
    pub payment_method: String,
    pub paid_at: DateTime<Utc>,
    pub external_payment_id: String,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// Materialize the sale for an approved payment. The amount comes from the
    /// claim, never from the gateway or the client.
    pub fn confirm(
        claim: &PendingClaim,
        external_payment_id: String,
        payment_method: String,
        paid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: claim.reference.clone(),
            buyer_name: claim.buyer_name.clone(),
            buyer_email: claim.buyer_email.clone(),
            buyer_phone: claim.buyer_phone.clone(),
            numbers: claim.numbers.clone(),
            amount_paid: claim.amount,
            payment_method,
            paid_at,
            external_payment_id,
            created_at: Utc::now(),
        }
    }

    pub fn number_strings(&self) -> Vec<String> {
        self.numbers.iter().map(|n| n.to_string()).collect()
    }
}

/// Raw copy of an inbound gateway notification, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub kind: String,
    pub resource_id: Option<String>,
    pub raw_body: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl WebhookRecord {
    pub fn new(kind: String, resource_id: Option<String>, raw_body: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            resource_id,
            raw_body,
            received_at: Utc::now(),
        }
    }

    /// Case-insensitive match on kind, resource id, or anywhere in the raw body.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.kind.to_lowercase().contains(&needle)
            || self
                .resource_id
                .as_deref()
                .is_some_and(|id| id.to_lowercase().contains(&needle))
            || self.raw_body.to_string().to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub q: Option<String>,
}

fn default_page() -> u32 { 1 }
fn default_limit() -> u32 { 50 }

impl Default for WebhookQuery {
    fn default() -> Self {
        Self { page: default_page(), limit: default_limit(), q: None }
    }
}

impl WebhookQuery {
    pub const MAX_LIMIT: u32 = 200;

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.effective_limit())
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    pub fn search_term(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPage {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub records: Vec<WebhookRecord>,
}

/// Why a ticket number is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Reserved,
    Sold,
}

/// Result of atomically turning a claim into a sale.
#[derive(Debug, Clone, PartialEq)]
pub enum PromoteOutcome {
    Created(Sale),
    /// A sale for this payment or reference already exists.
    AlreadyRecorded,
    /// No live claim for the reference (resolved, expired, or deleted).
    ClaimMissing,
}
