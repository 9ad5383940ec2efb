use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use rifa_core::repository::{overlapping, TicketRepository, WebhookLogRepository};
use rifa_core::{
    Occupancy, PendingClaim, PromoteOutcome, Sale, StoreError, StoreResult, TicketNumber,
    WebhookPage, WebhookQuery, WebhookRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Claim(Uuid),
    Sale(Uuid),
}

#[derive(Default)]
struct MemoryState {
    claims: HashMap<String, PendingClaim>,
    sales: Vec<Sale>,
    numbers: BTreeMap<TicketNumber, Holder>,
    webhooks: Vec<WebhookRecord>,
}

impl MemoryState {
    fn release(&mut self, holder: Holder) {
        self.numbers.retain(|_, h| *h != holder);
    }

    fn take_claim(&mut self, reference: &str) -> Option<PendingClaim> {
        let claim = self.claims.remove(reference)?;
        self.release(Holder::Claim(claim.id));
        Some(claim)
    }
}

/// Single-process store for development and tests.
///
/// Every operation runs under one lock, which gives it the same atomicity the
/// Postgres store gets from its constraints and transactions.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn occupied_numbers(&self) -> StoreResult<Vec<(TicketNumber, Occupancy)>> {
        let state = self.state.lock().await;
        Ok(state
            .numbers
            .iter()
            .map(|(number, holder)| {
                let occupancy = match holder {
                    Holder::Claim(_) => Occupancy::Reserved,
                    Holder::Sale(_) => Occupancy::Sold,
                };
                (*number, occupancy)
            })
            .collect())
    }

    async fn insert_claim(&self, claim: &PendingClaim) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        if state.claims.contains_key(&claim.reference)
            || state.sales.iter().any(|s| s.reference == claim.reference)
        {
            return Err(StoreError::DuplicateReference(claim.reference.clone()));
        }

        let taken = overlapping(&claim.numbers, state.numbers.keys().copied());
        if !taken.is_empty() {
            return Err(StoreError::NumbersTaken(taken));
        }

        for number in &claim.numbers {
            state.numbers.insert(*number, Holder::Claim(claim.id));
        }
        state.claims.insert(claim.reference.clone(), claim.clone());
        Ok(())
    }

    async fn find_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        Ok(self.state.lock().await.claims.get(reference).cloned())
    }

    async fn find_sale(&self, external_payment_id: Option<&str>, reference: &str) -> StoreResult<Option<Sale>> {
        let state = self.state.lock().await;
        Ok(state
            .sales
            .iter()
            .find(|s| {
                external_payment_id.is_some_and(|id| s.external_payment_id == id) || s.reference == reference
            })
            .cloned())
    }

    async fn promote_claim(&self, sale: &Sale) -> StoreResult<PromoteOutcome> {
        let mut state = self.state.lock().await;

        let recorded = state
            .sales
            .iter()
            .any(|s| s.external_payment_id == sale.external_payment_id || s.reference == sale.reference);
        if recorded {
            return Ok(PromoteOutcome::AlreadyRecorded);
        }

        let Some(claim) = state.claims.remove(&sale.reference) else {
            return Ok(PromoteOutcome::ClaimMissing);
        };

        for holder in state.numbers.values_mut() {
            if *holder == Holder::Claim(claim.id) {
                *holder = Holder::Sale(sale.id);
            }
        }
        state.sales.push(sale.clone());
        Ok(PromoteOutcome::Created(sale.clone()))
    }

    async fn discard_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        Ok(self.state.lock().await.take_claim(reference))
    }

    async fn expire_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PendingClaim>> {
        let mut state = self.state.lock().await;
        let stale: Vec<String> = state
            .claims
            .values()
            .filter(|c| c.created_at < cutoff)
            .map(|c| c.reference.clone())
            .collect();

        Ok(stale.iter().filter_map(|r| state.take_claim(r)).collect())
    }

    async fn list_claims(&self) -> StoreResult<Vec<PendingClaim>> {
        let mut claims: Vec<PendingClaim> = self.state.lock().await.claims.values().cloned().collect();
        claims.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(claims)
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        let mut sales = self.state.lock().await.sales.clone();
        sales.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sales)
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        if let Some(pos) = state.sales.iter().position(|s| s.id == id) {
            state.sales.remove(pos);
            state.release(Holder::Sale(id));
            return Ok(true);
        }

        let reference = state
            .claims
            .values()
            .find(|c| c.id == id)
            .map(|c| c.reference.clone());
        Ok(match reference {
            Some(reference) => state.take_claim(&reference).is_some(),
            None => false,
        })
    }
}

#[async_trait]
impl WebhookLogRepository for InMemoryStore {
    async fn record(&self, entry: &WebhookRecord) -> StoreResult<()> {
        self.state.lock().await.webhooks.push(entry.clone());
        Ok(())
    }

    async fn list(&self, query: &WebhookQuery) -> StoreResult<WebhookPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<&WebhookRecord> = state
            .webhooks
            .iter()
            .filter(|w| query.search_term().map_or(true, |q| w.matches(q)))
            .collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = query.effective_limit();
        Ok(WebhookPage {
            total: matching.len() as u64,
            page: query.page.max(1),
            limit,
            records: matching
                .into_iter()
                .skip(offset)
                .take(limit as usize)
                .cloned()
                .collect(),
        })
    }
}
