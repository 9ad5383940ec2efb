use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use rifa_core::repository::TicketRepository;
use rifa_core::{PendingClaim, StoreResult};
use rifa_shared::AvailabilityEvent;

/// Releases claims nobody paid for within the configured window.
#[derive(Clone)]
pub struct ClaimReaper {
    tickets: Arc<dyn TicketRepository>,
    ttl: Duration,
    events: broadcast::Sender<AvailabilityEvent>,
}

impl ClaimReaper {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        ttl: std::time::Duration,
        events: broadcast::Sender<AvailabilityEvent>,
    ) -> Self {
        Self {
            tickets,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36500)),
            events,
        }
    }

    /// Delete every claim created before `now - ttl` and return them.
    pub async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<Vec<PendingClaim>> {
        let cutoff = now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = self.tickets.expire_claims(cutoff).await?;

        for claim in &expired {
            tracing::info!(reference = %claim.reference, created_at = %claim.created_at, "Expired unpaid claim");
            let _ = self.events.send(AvailabilityEvent::released(&claim.reference, claim.number_strings()));
        }
        Ok(expired)
    }
}
