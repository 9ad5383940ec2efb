use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, PaymentStatus::Approved)
    }

    /// Terminal outcomes that release the claim.
    pub fn is_rejection(&self) -> bool {
        matches!(self, PaymentStatus::Rejected | PaymentStatus::Cancelled)
    }
}

/// Authoritative payment details fetched from the gateway by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentDetails {
    pub id: String,
    pub status: PaymentStatus,
    pub external_reference: Option<String>,
    /// Amount in whole currency units, as charged by the gateway.
    pub amount: Option<i64>,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderPayment {
    pub id: String,
    pub status: PaymentStatus,
}

/// Gateway order grouping one or more payment attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MerchantOrder {
    pub id: String,
    pub external_reference: Option<String>,
    pub payments: Vec<OrderPayment>,
}

impl MerchantOrder {
    pub fn approved_payment(&self) -> Option<&OrderPayment> {
        self.payments.iter().find(|p| p.status.is_approved())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub reference: String,
    pub title: String,
    pub amount: i64,
    pub currency: String,
    pub payer_name: String,
    pub payer_email: String,
    pub payer_phone: String,
    pub return_url: String,
    pub notification_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub init_point: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout, throttling, or 5xx. Safe to retry later.
    #[error("Payment gateway unavailable: {0}")]
    Transient(String),
    #[error("Not found at payment gateway: {0}")]
    NotFound(String),
    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Unexpected payment gateway response: {0}")]
    Decode(String),
    #[error("Payment gateway client misconfigured: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout for a claim.
    async fn create_checkout(&self, request: &CheckoutRequest) -> GatewayResult<CheckoutSession>;

    /// Retrieve a payment by its gateway id.
    async fn get_payment(&self, payment_id: &str) -> GatewayResult<PaymentDetails>;

    /// Retrieve a merchant order by its gateway id.
    async fn get_merchant_order(&self, order_id: &str) -> GatewayResult<MerchantOrder>;
}
