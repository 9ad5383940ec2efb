use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use rifa_core::payment::{MerchantOrder, OrderPayment, PaymentStatus};
use rifa_core::repository::{TicketRepository, WebhookLogRepository};
use rifa_core::{
    Occupancy, PendingClaim, PromoteOutcome, Sale, StoreError, StoreResult, TicketNumber, WebhookQuery,
};
use rifa_gateway::{MockPaymentGateway, RecordingNotifier};
use rifa_raffle::{
    CheckoutError, CheckoutService, ClaimReaper, NumberLedger, PaymentReconciler, RaffleTerms,
    RawNotification, Reconciliation, ReferenceStatus, ReservationError, ReservationManager,
    ReservationRequest, RetryPolicy,
};
use rifa_shared::AvailabilityEvent;
use rifa_store::InMemoryStore;

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<MockPaymentGateway>,
    notifier: Arc<RecordingNotifier>,
    reservations: ReservationManager,
    reconciler: PaymentReconciler,
    ledger: NumberLedger,
    checkout: CheckoutService,
    events: broadcast::Sender<AvailabilityEvent>,
}

fn terms() -> RaffleTerms {
    RaffleTerms {
        price_per_ticket: 5000,
        max_numbers_per_purchase: 20,
        currency: "COP".to_string(),
        raffle_name: "Rifa".to_string(),
    }
}

fn harness_with(notifier: RecordingNotifier) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(notifier);
    let (events, _) = broadcast::channel(64);

    let tickets: Arc<dyn TicketRepository> = store.clone();
    let webhooks: Arc<dyn WebhookLogRepository> = store.clone();

    Harness {
        reservations: ReservationManager::new(tickets.clone(), terms(), events.clone()),
        reconciler: PaymentReconciler::new(
            tickets.clone(),
            webhooks,
            gateway.clone(),
            notifier.clone(),
            events.clone(),
        )
        .with_claim_lookup_retry(Duration::from_millis(10))
        .with_retry_policy(RetryPolicy::immediate(2)),
        ledger: NumberLedger::new(tickets.clone()),
        checkout: CheckoutService::new(tickets, gateway.clone(), terms(), "https://rifa.example/"),
        store,
        gateway,
        notifier,
        events,
    }
}

fn harness() -> Harness {
    harness_with(RecordingNotifier::new())
}

fn request(name: &str, email: &str, numbers: &[&str]) -> ReservationRequest {
    ReservationRequest {
        buyer_name: name.to_string(),
        buyer_email: email.to_string(),
        buyer_phone: "3001234567".to_string(),
        numbers: numbers.iter().map(|n| n.to_string()).collect(),
    }
}

fn payment_notice(payment_id: &str) -> RawNotification {
    RawNotification::new(
        HashMap::new(),
        json!({ "type": "payment", "action": "payment.updated", "data": { "id": payment_id } }),
    )
}

fn numbers(raw: &[&str]) -> BTreeSet<TicketNumber> {
    raw.iter().map(|n| n.parse().unwrap()).collect()
}

async fn occupied(h: &Harness) -> Vec<String> {
    h.ledger
        .occupied_numbers()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.to_string())
        .collect()
}

#[tokio::test]
async fn test_reserve_conflict_then_approval() {
    let h = harness();

    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["007", "008"])).await.unwrap();
    assert!(claim.reference.starts_with("RIFA-"));
    assert_eq!(claim.amount, 10000);

    let err = h.reservations.reserve(request("Beto", "beto@example.com", &["008", "009"])).await.unwrap_err();
    match err {
        ReservationError::Conflict(conflicts) => assert_eq!(conflicts, vec!["008".parse().unwrap()]),
        other => panic!("expected conflict, got {other:?}"),
    }

    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-1", PaymentStatus::Approved, &claim.reference, 10000))
        .await;

    let sale = match h.reconciler.handle_notification(payment_notice("pay-1")).await {
        Reconciliation::Confirmed(sale) => sale,
        other => panic!("expected confirmation, got {other:?}"),
    };
    assert_eq!(sale.number_strings(), vec!["007", "008"]);
    assert_eq!(sale.amount_paid, 10000);
    assert_eq!(sale.external_payment_id, "pay-1");

    assert!(h.store.find_claim(&claim.reference).await.unwrap().is_none());
    assert_eq!(occupied(&h).await, vec!["007", "008"]);
    assert_eq!(h.notifier.confirmations().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_reservations_never_share_a_number() {
    let h = harness();
    let mut handles = Vec::new();
    for i in 0..12 {
        let reservations = h.reservations.clone();
        handles.push(tokio::spawn(async move {
            let own = format!("{}", 100 + i);
            reservations
                .reserve(request("Buyer", &format!("buyer{i}@example.com"), &["500", own.as_str()]))
                .await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(claim) => winners.push(claim),
            Err(ReservationError::Conflict(lost)) => assert!(lost.contains(&"500".parse().unwrap())),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners.len(), 1);

    // Occupied numbers are exactly the union of live claims, with no duplicates.
    let claims = h.store.list_claims().await.unwrap();
    let union: BTreeSet<TicketNumber> = claims.iter().flat_map(|c| c.numbers.iter().copied()).collect();
    let total: usize = claims.iter().map(|c| c.numbers.len()).sum();
    assert_eq!(union.len(), total);
    assert_eq!(h.ledger.occupied_numbers().await.unwrap(), union);
}

#[tokio::test]
async fn test_duplicate_approval_creates_one_sale() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["001"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-9", PaymentStatus::Approved, &claim.reference, 5000))
        .await;

    let first = h.reconciler.handle_notification(payment_notice("pay-9")).await;
    let second = h.reconciler.handle_notification(payment_notice("pay-9")).await;

    assert_eq!(first.label(), "confirmed");
    assert_eq!(second, Reconciliation::Duplicate { reference: claim.reference.clone() });
    assert_eq!(h.store.list_sales().await.unwrap().len(), 1);
    assert_eq!(h.notifier.confirmations().await.len(), 1);

    // Both deliveries are in the audit log.
    let log = h.store.list(&WebhookQuery::default()).await.unwrap();
    assert_eq!(log.total, 2);
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["002", "003"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-2", PaymentStatus::Approved, &claim.reference, 10000))
        .await;

    let (a, b) = tokio::join!(
        h.reconciler.handle_notification(payment_notice("pay-2")),
        h.reconciler.handle_notification(payment_notice("pay-2")),
    );

    let confirmed = [&a, &b].iter().filter(|r| r.label() == "confirmed").count();
    assert_eq!(confirmed, 1, "got {a:?} and {b:?}");
    assert_eq!(h.store.list_sales().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejection_releases_numbers() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["042"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-r", PaymentStatus::Rejected, &claim.reference, 5000))
        .await;

    let outcome = h.reconciler.handle_notification(payment_notice("pay-r")).await;
    assert!(matches!(outcome, Reconciliation::Released(ref c) if c.reference == claim.reference));
    assert!(occupied(&h).await.is_empty());
    assert_eq!(h.notifier.rejections().await.len(), 1);

    let again = h.reservations.reserve(request("Beto", "beto@example.com", &["42"])).await.unwrap();
    assert_eq!(again.number_strings(), vec!["042"]);
}

#[tokio::test]
async fn test_pending_status_changes_nothing() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["010"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-p", PaymentStatus::InProcess, &claim.reference, 5000))
        .await;

    let outcome = h.reconciler.handle_notification(payment_notice("pay-p")).await;
    assert_eq!(outcome.label(), "ignored");
    assert!(h.store.find_claim(&claim.reference).await.unwrap().is_some());
}

#[tokio::test]
async fn test_gateway_outage_defers() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["011"])).await.unwrap();
    h.gateway.set_unavailable(true);

    let outcome = h.reconciler.handle_notification(payment_notice("pay-x")).await;
    assert_eq!(outcome.label(), "deferred");
    assert!(h.store.find_claim(&claim.reference).await.unwrap().is_some());
}

#[tokio::test]
async fn test_notification_failure_keeps_sale() {
    let h = harness_with(RecordingNotifier::failing());
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["123"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-3", PaymentStatus::Approved, &claim.reference, 5000))
        .await;

    let outcome = h.reconciler.handle_notification(payment_notice("pay-3")).await;
    assert_eq!(outcome.label(), "confirmed");
    assert_eq!(h.notifier.confirmations().await.len(), 1);
    assert_eq!(h.store.list_sales().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_merchant_order_with_approved_payment() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["700"])).await.unwrap();

    let mut payment = MockPaymentGateway::payment("pay-m", PaymentStatus::Approved, &claim.reference, 5000);
    payment.external_reference = None;
    h.gateway.insert_payment(payment).await;
    h.gateway
        .insert_order(MerchantOrder {
            id: "4242".to_string(),
            external_reference: Some(claim.reference.clone()),
            payments: vec![
                OrderPayment { id: "pay-old".to_string(), status: PaymentStatus::Rejected },
                OrderPayment { id: "pay-m".to_string(), status: PaymentStatus::Approved },
            ],
        })
        .await;

    let notice = RawNotification::new(
        HashMap::new(),
        json!({ "topic": "merchant_order", "resource": "https://api.mercadolibre.com/merchant_orders/4242" }),
    );
    let outcome = h.reconciler.handle_notification(notice).await;
    assert!(matches!(outcome, Reconciliation::Confirmed(ref s) if s.external_payment_id == "pay-m"));
}

#[tokio::test]
async fn test_unknown_reference_is_ignored() {
    let h = harness();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-u", PaymentStatus::Approved, "RIFA-0-NOPE", 5000))
        .await;

    let outcome = h.reconciler.handle_notification(payment_notice("pay-u")).await;
    assert_eq!(outcome, Reconciliation::Ignored("no pending claim".to_string()));
    assert!(h.store.list_sales().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unusable_notification_is_logged_and_ignored() {
    let h = harness();
    let outcome = h
        .reconciler
        .handle_notification(RawNotification::new(HashMap::new(), json!({ "hello": "world" })))
        .await;

    assert_eq!(outcome.label(), "ignored");
    assert_eq!(h.gateway.lookups(), 0);
    let log = h.store.list(&WebhookQuery::default()).await.unwrap();
    assert_eq!(log.records[0].kind, "unknown");
}

#[tokio::test]
async fn test_reservation_validation() {
    let h = harness();
    let cases = vec![
        request("  ", "ana@example.com", &["001"]),
        request("Ana", "not-an-email", &["001"]),
        request("Ana", "ana@example.com", &[]),
        request("Ana", "ana@example.com", &["1000"]),
        request("Ana", "ana@example.com", &["abc"]),
    ];
    for case in cases {
        let err = h.reservations.reserve(case).await.unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)), "got {err:?}");
    }

    let too_many: Vec<String> = (0..21).map(|n| n.to_string()).collect();
    let mut big = request("Ana", "ana@example.com", &[]);
    big.numbers = too_many;
    assert!(matches!(h.reservations.reserve(big).await, Err(ReservationError::Validation(_))));

    assert!(occupied(&h).await.is_empty());
}

#[tokio::test]
async fn test_reservation_normalizes_input() {
    let h = harness();
    let claim = h
        .reservations
        .reserve(request(" Ana ", " Ana@Example.COM ", &["7", "007", " 7 "]))
        .await
        .unwrap();

    assert_eq!(claim.numbers, numbers(&["007"]));
    assert_eq!(claim.amount, 5000);
    assert_eq!(claim.buyer_email, "ana@example.com");
    assert_eq!(claim.buyer_name, "Ana");
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let h = harness();
    let mut rx = h.events.subscribe();

    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["300"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-e", PaymentStatus::Approved, &claim.reference, 5000))
        .await;
    h.reconciler.handle_notification(payment_notice("pay-e")).await;

    assert_eq!(rx.recv().await.unwrap().name(), "numbers_reserved");
    assert_eq!(rx.recv().await.unwrap().name(), "numbers_sold");
}

#[tokio::test]
async fn test_reaper_expires_only_stale_claims() {
    let h = harness();
    let mut stale = PendingClaim::new(
        "RIFA-1-OLD".to_string(),
        "Ana".to_string(),
        "ana@example.com".to_string(),
        "300".to_string(),
        numbers(&["900"]),
        5000,
    );
    stale.created_at = Utc::now() - chrono::Duration::hours(2);
    h.store.insert_claim(&stale).await.unwrap();
    let fresh = h.reservations.reserve(request("Beto", "beto@example.com", &["901"])).await.unwrap();

    let mut rx = h.events.subscribe();
    let tickets: Arc<dyn TicketRepository> = h.store.clone();
    let reaper = ClaimReaper::new(tickets, Duration::from_secs(1800), h.events.clone());

    let expired = reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].reference, "RIFA-1-OLD");
    assert!(h.store.find_claim(&fresh.reference).await.unwrap().is_some());
    assert_eq!(occupied(&h).await, vec!["901"]);
    assert_eq!(rx.recv().await.unwrap().name(), "numbers_released");
}

#[tokio::test]
async fn test_checkout_uses_claim_amount() {
    let h = harness();
    let claim = h.reservations.reserve(request("Ana", "ana@example.com", &["050", "051", "052"])).await.unwrap();

    let session = h.checkout.start(&claim.reference).await.unwrap();
    assert!(session.init_point.contains(&claim.reference));

    let sent = h.gateway.checkouts().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].amount, 15000);
    assert_eq!(sent[0].notification_url, "https://rifa.example/api/mercadopago/webhook");
    assert_eq!(
        sent[0].return_url,
        format!("https://rifa.example/verificar-pago.html?ref={}", claim.reference)
    );

    assert!(matches!(h.checkout.start("RIFA-0-NONE").await, Err(CheckoutError::ClaimNotFound(_))));
}

#[tokio::test]
async fn test_reference_status_and_progress() {
    let h = harness();
    let paid = h.reservations.reserve(request("Ana", "ana@example.com", &["001", "002"])).await.unwrap();
    let pending = h.reservations.reserve(request("Beto", "beto@example.com", &["003"])).await.unwrap();
    h.gateway
        .insert_payment(MockPaymentGateway::payment("pay-s", PaymentStatus::Approved, &paid.reference, 10000))
        .await;
    h.reconciler.handle_notification(payment_notice("pay-s")).await;

    assert_eq!(h.checkout.reference_status(&paid.reference).await.unwrap(), ReferenceStatus::Paid);
    assert_eq!(h.checkout.reference_status(&pending.reference).await.unwrap(), ReferenceStatus::Pending);
    assert_eq!(h.checkout.reference_status("RIFA-0-NONE").await.unwrap(), ReferenceStatus::Unknown);

    let progress = h.ledger.progress().await.unwrap();
    assert_eq!(progress.sold, 2);
    assert_eq!(progress.reserved, 1);
    assert_eq!(progress.percentage, 0);

    let availability = h.ledger.availability().await.unwrap();
    assert_eq!(availability.len(), 1000);
    assert!(!availability[1].available);
    assert!(availability[4].available);
}

/// Delegates to the in-memory store but fails the first `failures` promotions.
struct FlakyPromotions {
    inner: Arc<InMemoryStore>,
    failures: AtomicUsize,
    promote_calls: AtomicUsize,
}

impl FlakyPromotions {
    fn new(inner: Arc<InMemoryStore>, failures: usize) -> Self {
        Self { inner, failures: AtomicUsize::new(failures), promote_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TicketRepository for FlakyPromotions {
    async fn occupied_numbers(&self) -> StoreResult<Vec<(TicketNumber, Occupancy)>> {
        self.inner.occupied_numbers().await
    }

    async fn insert_claim(&self, claim: &PendingClaim) -> StoreResult<()> {
        self.inner.insert_claim(claim).await
    }

    async fn find_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        self.inner.find_claim(reference).await
    }

    async fn find_sale(&self, external_payment_id: Option<&str>, reference: &str) -> StoreResult<Option<Sale>> {
        self.inner.find_sale(external_payment_id, reference).await
    }

    async fn promote_claim(&self, sale: &Sale) -> StoreResult<PromoteOutcome> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.promote_claim(sale).await
    }

    async fn discard_claim(&self, reference: &str) -> StoreResult<Option<PendingClaim>> {
        self.inner.discard_claim(reference).await
    }

    async fn expire_claims(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PendingClaim>> {
        self.inner.expire_claims(cutoff).await
    }

    async fn list_claims(&self) -> StoreResult<Vec<PendingClaim>> {
        self.inner.list_claims().await
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        self.inner.list_sales().await
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_record(id).await
    }
}

/// Reserve one number, approve it, and reconcile through a store whose first
/// `failures` sale writes fail. The reconciler retries writes 3 times.
async fn approve_through_flaky_store(
    failures: usize,
) -> (Reconciliation, Arc<FlakyPromotions>, Arc<InMemoryStore>, PendingClaim, Arc<RecordingNotifier>) {
    let store = Arc::new(InMemoryStore::new());
    let flaky = Arc::new(FlakyPromotions::new(store.clone(), failures));
    let gateway = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let (events, _) = broadcast::channel(16);

    let reservations = ReservationManager::new(store.clone(), terms(), events.clone());
    let claim = reservations.reserve(request("Ana", "ana@example.com", &["321"])).await.unwrap();
    gateway
        .insert_payment(MockPaymentGateway::payment("pay-flaky", PaymentStatus::Approved, &claim.reference, 5000))
        .await;

    let reconciler = PaymentReconciler::new(flaky.clone(), store.clone(), gateway, notifier.clone(), events)
        .with_claim_lookup_retry(Duration::from_millis(10))
        .with_retry_policy(RetryPolicy::immediate(3));

    let outcome = reconciler.handle_notification(payment_notice("pay-flaky")).await;
    (outcome, flaky, store, claim, notifier)
}

#[tokio::test]
async fn test_sale_write_recovers_within_retry_budget() {
    let (outcome, flaky, store, claim, notifier) = approve_through_flaky_store(2).await;

    assert_eq!(outcome.label(), "confirmed");
    assert_eq!(flaky.promote_calls.load(Ordering::SeqCst), 3);
    let sales = store.list_sales().await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].reference, claim.reference);
    assert!(store.find_claim(&claim.reference).await.unwrap().is_none());
    assert_eq!(notifier.confirmations().await.len(), 1);
}

#[tokio::test]
async fn test_sale_write_gives_up_after_retry_budget() {
    let (outcome, flaky, store, claim, notifier) = approve_through_flaky_store(10).await;

    match outcome {
        Reconciliation::Failed(error) => assert!(error.contains("connection reset")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(flaky.promote_calls.load(Ordering::SeqCst), 4);
    assert!(store.list_sales().await.unwrap().is_empty());

    // The buyer's claim and numbers stay held for a later delivery.
    assert!(store.find_claim(&claim.reference).await.unwrap().is_some());
    assert_eq!(
        store.occupied_numbers().await.unwrap(),
        vec![("321".parse().unwrap(), Occupancy::Reserved)]
    );
    assert!(notifier.confirmations().await.is_empty());
}
