use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use rifa_core::notifier::Notifier;
use rifa_core::payment::PaymentGateway;
use rifa_core::repository::{TicketRepository, WebhookLogRepository};
use rifa_raffle::{
    CheckoutService, ClaimReaper, NumberLedger, PaymentReconciler, RaffleTerms, ReservationManager,
};
use rifa_shared::AvailabilityEvent;
use rifa_store::app_config::Config;
use rifa_store::RedisClient;

use crate::metrics::ApiMetrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub admin_user: String,
    pub admin_password: String,
}

#[derive(Clone)]
pub struct AppState {
    pub tickets: Arc<dyn TicketRepository>,
    pub webhooks: Arc<dyn WebhookLogRepository>,
    pub redis: Option<Arc<RedisClient>>,
    pub ledger: NumberLedger,
    pub reservations: ReservationManager,
    pub reconciler: PaymentReconciler,
    pub checkout: CheckoutService,
    pub sse_tx: broadcast::Sender<AvailabilityEvent>,
    pub auth: AuthConfig,
    pub terms: RaffleTerms,
    pub webhook_secret: Option<String>,
    pub rate_limit_per_minute: i64,
    pub metrics: Arc<ApiMetrics>,
}

impl AppState {
    /// Wire the raffle services over the given store, gateway and notifier.
    pub fn new(
        config: &Config,
        tickets: Arc<dyn TicketRepository>,
        webhooks: Arc<dyn WebhookLogRepository>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        redis: Option<Arc<RedisClient>>,
    ) -> Result<Self, prometheus::Error> {
        let rules = &config.business_rules;
        let terms = RaffleTerms {
            price_per_ticket: rules.price_per_ticket,
            max_numbers_per_purchase: rules.max_numbers_per_purchase,
            currency: rules.currency.clone(),
            raffle_name: rules.raffle_name.clone(),
        };

        // SSE Broadcast Channel
        let (sse_tx, _) = broadcast::channel(100);

        let reconciler = PaymentReconciler::new(
            tickets.clone(),
            webhooks.clone(),
            gateway.clone(),
            notifier,
            sse_tx.clone(),
        )
        .with_claim_lookup_retry(Duration::from_millis(rules.claim_lookup_retry_ms));

        Ok(Self {
            ledger: NumberLedger::new(tickets.clone()),
            reservations: ReservationManager::new(tickets.clone(), terms.clone(), sse_tx.clone()),
            checkout: CheckoutService::new(tickets.clone(), gateway, terms.clone(), &rules.base_url),
            reconciler,
            tickets,
            webhooks,
            redis,
            sse_tx,
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
                admin_user: config.auth.admin_user.clone(),
                admin_password: config.auth.admin_password.clone(),
            },
            terms,
            webhook_secret: config.gateway.webhook_secret.clone().filter(|s| !s.is_empty()),
            rate_limit_per_minute: config
                .redis
                .as_ref()
                .map(|r| r.rate_limit_per_minute)
                .unwrap_or(100),
            metrics: Arc::new(ApiMetrics::new()?),
        })
    }

    /// Reaper for claims older than `ttl`, publishing on this state's channel.
    pub fn claim_reaper(&self, ttl: Duration) -> ClaimReaper {
        ClaimReaper::new(self.tickets.clone(), ttl, self.sse_tx.clone())
    }
}
