use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use rifa_core::notifier::Notifier;
use rifa_core::payment::{GatewayError, PaymentGateway};
use rifa_core::repository::{TicketRepository, WebhookLogRepository};
use rifa_core::ticket::join;
use rifa_core::{PendingClaim, PromoteOutcome, Sale, WebhookRecord};
use rifa_shared::{mask_email, AvailabilityEvent};

use crate::notification::{GatewayNotification, RawNotification, ResolvedPayment};
use crate::retry::RetryPolicy;

/// What handling one notification amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Claim promoted to a sale.
    Confirmed(Sale),
    /// Claim discarded after a rejected or cancelled payment.
    Released(PendingClaim),
    /// The payment was already recorded.
    Duplicate { reference: String },
    Ignored(String),
    /// Gateway unreachable. This delivery was already acknowledged, so the
    /// payment is only picked up again by a later notification for it.
    Deferred(String),
    Failed(String),
}

impl Reconciliation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "confirmed",
            Self::Released(_) => "released",
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored(_) => "ignored",
            Self::Deferred(_) => "deferred",
            Self::Failed(_) => "failed",
        }
    }
}

/// Applies gateway payment notifications to pending claims.
///
/// Sales are only ever created from payment data fetched from the gateway,
/// never from the notification body itself.
#[derive(Clone)]
pub struct PaymentReconciler {
    tickets: Arc<dyn TicketRepository>,
    webhooks: Arc<dyn WebhookLogRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<AvailabilityEvent>,
    claim_lookup_retry: Duration,
    retry: RetryPolicy,
}

impl PaymentReconciler {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        webhooks: Arc<dyn WebhookLogRepository>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        events: broadcast::Sender<AvailabilityEvent>,
    ) -> Self {
        Self {
            tickets,
            webhooks,
            gateway,
            notifier,
            events,
            claim_lookup_retry: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }

    /// Wait before looking a missing claim up a second time.
    pub fn with_claim_lookup_retry(mut self, delay: Duration) -> Self {
        self.claim_lookup_retry = delay;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn handle_notification(&self, raw: RawNotification) -> Reconciliation {
        let record = WebhookRecord::new(
            raw.kind(),
            raw.data_id().or_else(|| raw.resource()),
            raw.audit_body(),
        );
        if let Err(e) = self.webhooks.record(&record).await {
            tracing::warn!(error = %e, kind = %record.kind, "Failed to store webhook log");
        }

        let Some(notification) = GatewayNotification::parse(&raw) else {
            tracing::debug!(kind = %record.kind, "Notification without usable topic or id");
            return Reconciliation::Ignored("unrecognized notification".to_string());
        };

        let payment = match notification.resolve(self.gateway.as_ref()).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                return Reconciliation::Ignored("no actionable payment".to_string());
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, ?notification, "Gateway lookup failed, awaiting redelivery");
                return Reconciliation::Deferred(e.to_string());
            }
            Err(GatewayError::NotFound(what)) => {
                tracing::info!(%what, "Notification refers to unknown gateway resource");
                return Reconciliation::Ignored(format!("not found: {}", what));
            }
            Err(e) => {
                tracing::error!(error = %e, ?notification, "Gateway lookup failed");
                return Reconciliation::Failed(e.to_string());
            }
        };

        tracing::info!(
            reference = %payment.reference,
            payment_id = %payment.external_payment_id,
            status = ?payment.status,
            "Payment notification resolved"
        );

        if payment.status.is_approved() {
            self.confirm(payment).await
        } else if payment.status.is_rejection() {
            self.release(payment).await
        } else {
            Reconciliation::Ignored(format!("payment status {:?}", payment.status))
        }
    }

    async fn find_claim_with_retry(&self, reference: &str) -> Result<Option<PendingClaim>, String> {
        let lookup = move || async move { self.tickets.find_claim(reference).await };

        if let Some(claim) = self.retry.run("find_claim", lookup).await.map_err(|e| e.to_string())? {
            return Ok(Some(claim));
        }

        // Payment notifications can overtake the reservation write.
        tracing::warn!(%reference, delay_ms = self.claim_lookup_retry.as_millis() as u64, "Claim not found, looking again");
        tokio::time::sleep(self.claim_lookup_retry).await;
        self.retry.run("find_claim", lookup).await.map_err(|e| e.to_string())
    }

    async fn confirm(&self, payment: ResolvedPayment) -> Reconciliation {
        let reference = payment.reference.clone();

        let existing = self
            .retry
            .run("find_sale", || self.tickets.find_sale(Some(payment.external_payment_id.as_str()), &reference))
            .await;
        match existing {
            Ok(Some(_)) => {
                tracing::debug!(%reference, payment_id = %payment.external_payment_id, "Payment already recorded");
                return Reconciliation::Duplicate { reference };
            }
            Ok(None) => {}
            Err(e) => return self.unrecorded(&payment, e.to_string()),
        }

        let claim = match self.find_claim_with_retry(&reference).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                // A concurrent delivery of the same payment may have promoted it meanwhile.
                if let Ok(Some(_)) = self.tickets.find_sale(Some(payment.external_payment_id.as_str()), &reference).await {
                    return Reconciliation::Duplicate { reference };
                }
                tracing::error!(
                    %reference,
                    payment_id = %payment.external_payment_id,
                    "Approved payment has no pending claim"
                );
                return Reconciliation::Ignored("no pending claim".to_string());
            }
            Err(e) => return self.unrecorded(&payment, e),
        };

        if payment.amount != Some(claim.amount) {
            tracing::warn!(
                %reference,
                expected = claim.amount,
                reported = ?payment.amount,
                "Gateway amount differs from claim amount"
            );
        }

        let sale = Sale::confirm(
            &claim,
            payment.external_payment_id.clone(),
            payment.method.clone().unwrap_or_else(|| "unknown".to_string()),
            payment.paid_at.unwrap_or_else(Utc::now),
        );

        match self.retry.run("promote_claim", || self.tickets.promote_claim(&sale)).await {
            Ok(PromoteOutcome::Created(sale)) => {
                tracing::info!(
                    %reference,
                    numbers = %join(&sale.numbers),
                    amount = sale.amount_paid,
                    buyer = %mask_email(&sale.buyer_email),
                    "Sale recorded"
                );
                let _ = self.events.send(AvailabilityEvent::sold(&reference, sale.number_strings()));

                if let Err(e) = self.notifier.send_confirmation(&sale).await {
                    tracing::warn!(%reference, error = %e, "Confirmation notification failed");
                }
                Reconciliation::Confirmed(sale)
            }
            Ok(PromoteOutcome::AlreadyRecorded) => Reconciliation::Duplicate { reference },
            Ok(PromoteOutcome::ClaimMissing) => {
                tracing::info!(%reference, "Claim resolved concurrently");
                Reconciliation::Ignored("claim resolved concurrently".to_string())
            }
            Err(e) => self.unrecorded(&payment, e.to_string()),
        }
    }

    fn unrecorded(&self, payment: &ResolvedPayment, error: String) -> Reconciliation {
        tracing::error!(
            reference = %payment.reference,
            payment_id = %payment.external_payment_id,
            error = %error,
            "Payment received but sale not recorded"
        );
        Reconciliation::Failed(error)
    }

    async fn release(&self, payment: ResolvedPayment) -> Reconciliation {
        let reference = payment.reference;
        let discarded = self
            .retry
            .run("discard_claim", || self.tickets.discard_claim(&reference))
            .await;

        match discarded {
            Ok(Some(claim)) => {
                tracing::info!(
                    %reference,
                    numbers = %join(&claim.numbers),
                    status = ?payment.status,
                    "Claim released after unsuccessful payment"
                );
                let _ = self.events.send(AvailabilityEvent::released(&reference, claim.number_strings()));

                if let Err(e) = self.notifier.send_rejection(&claim).await {
                    tracing::warn!(%reference, error = %e, "Rejection notification failed");
                }
                Reconciliation::Released(claim)
            }
            Ok(None) => Reconciliation::Ignored("no pending claim".to_string()),
            Err(e) => {
                tracing::error!(%reference, error = %e, "Failed to release claim");
                Reconciliation::Failed(e.to_string())
            }
        }
    }
}
