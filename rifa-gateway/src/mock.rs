use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use rifa_core::notifier::{NotifyError, Notifier};
use rifa_core::payment::{
    CheckoutRequest, CheckoutSession, GatewayError, GatewayResult, MerchantOrder, PaymentDetails,
    PaymentGateway, PaymentStatus,
};
use rifa_core::{PendingClaim, Sale};

/// In-process stand-in for the payment gateway, seeded by the caller.
#[derive(Default)]
pub struct MockPaymentGateway {
    payments: Mutex<HashMap<String, PaymentDetails>>,
    orders: Mutex<HashMap<String, MerchantOrder>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A card payment for `reference` with the given status.
    pub fn payment(id: &str, status: PaymentStatus, reference: &str, amount: i64) -> PaymentDetails {
        let approved = status.is_approved();
        PaymentDetails {
            id: id.to_string(),
            status,
            external_reference: Some(reference.to_string()),
            amount: Some(amount),
            method: Some("visa".to_string()),
            paid_at: approved.then(Utc::now),
            payer_email: None,
        }
    }

    pub async fn insert_payment(&self, payment: PaymentDetails) {
        self.payments.lock().await.insert(payment.id.clone(), payment);
    }

    pub async fn insert_order(&self, order: MerchantOrder) {
        self.orders.lock().await.insert(order.id.clone(), order);
    }

    /// While set, every call fails the way a network outage would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().await.clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> GatewayResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient("mock gateway unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> GatewayResult<CheckoutSession> {
        self.check_available()?;
        self.checkouts.lock().await.push(request.clone());
        Ok(CheckoutSession {
            id: format!("mock_pref_{}", request.reference),
            init_point: format!("https://mock.gateway/checkout?pref=mock_pref_{}", request.reference),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> GatewayResult<PaymentDetails> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.payments
            .lock()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("payment {}", payment_id)))
    }

    async fn get_merchant_order(&self, order_id: &str) -> GatewayResult<MerchantOrder> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("merchant order {}", order_id)))
    }
}

/// Notifier that remembers what it was asked to send. Can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    confirmations: Mutex<Vec<Sale>>,
    rejections: Mutex<Vec<PendingClaim>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub async fn confirmations(&self) -> Vec<Sale> {
        self.confirmations.lock().await.clone()
    }

    pub async fn rejections(&self) -> Vec<PendingClaim> {
        self.rejections.lock().await.clone()
    }

    fn outcome(&self) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("mailbox unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_confirmation(&self, sale: &Sale) -> Result<(), NotifyError> {
        self.confirmations.lock().await.push(sale.clone());
        self.outcome()
    }

    async fn send_rejection(&self, claim: &PendingClaim) -> Result<(), NotifyError> {
        self.rejections.lock().await.push(claim.clone());
        self.outcome()
    }
}
