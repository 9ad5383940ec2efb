use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use rifa_core::payment::{GatewayResult, PaymentGateway, PaymentStatus};

/// Webhook exactly as received: query string plus JSON body.
#[derive(Debug, Clone, Default)]
pub struct RawNotification {
    pub query: HashMap<String, String>,
    pub body: Value,
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RawNotification {
    pub fn new(query: HashMap<String, String>, body: Value) -> Self {
        Self { query, body }
    }

    /// Notification topic. The gateway sends it as `type` or `topic`, in the
    /// body or the query string.
    pub fn kind(&self) -> String {
        ["type", "topic"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(text))
            .or_else(|| {
                ["type", "topic"]
                    .iter()
                    .find_map(|key| self.query.get(*key).filter(|v| !v.is_empty()).cloned())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn data_id(&self) -> Option<String> {
        self.body
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(text)
            .or_else(|| self.query.get("data.id").filter(|v| !v.is_empty()).cloned())
            .or_else(|| self.query.get("id").filter(|v| !v.is_empty()).cloned())
    }

    pub fn resource(&self) -> Option<String> {
        self.body.get("resource").and_then(text)
    }

    /// Payload kept in the audit log.
    pub fn audit_body(&self) -> Value {
        if self.query.is_empty() {
            return self.body.clone();
        }
        serde_json::json!({ "query": self.query, "body": self.body })
    }
}

/// Last path segment of a resource URL, if it looks like a gateway id.
fn trailing_id(resource: &str) -> Option<String> {
    let path = resource.split(['?', '#']).next().unwrap_or_default();
    let id = path.trim_end_matches('/').rsplit('/').next()?;
    is_plain_id(id).then(|| id.to_string())
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// What a notification refers to, whatever shape it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayNotification {
    Payment { payment_id: String },
    MerchantOrder { order_id: String },
}

impl GatewayNotification {
    pub fn parse(raw: &RawNotification) -> Option<Self> {
        let kind = raw.kind().to_lowercase();
        let id = raw
            .data_id()
            .filter(|id| is_plain_id(id))
            .or_else(|| raw.resource().as_deref().and_then(trailing_id))?;

        if kind.contains("merchant_order") {
            Some(Self::MerchantOrder { order_id: id })
        } else if kind.contains("payment") {
            Some(Self::Payment { payment_id: id })
        } else {
            None
        }
    }

    /// Fetch the authoritative payment behind the notification.
    ///
    /// Ok(None) when there is nothing to act on: no reference on the payment,
    /// or a merchant order without an approved payment yet.
    pub async fn resolve(&self, gateway: &dyn PaymentGateway) -> GatewayResult<Option<ResolvedPayment>> {
        let (payment, fallback_reference) = match self {
            Self::Payment { payment_id } => (gateway.get_payment(payment_id).await?, None),
            Self::MerchantOrder { order_id } => {
                let order = gateway.get_merchant_order(order_id).await?;
                let Some(approved) = order.approved_payment() else {
                    tracing::debug!(%order_id, "Merchant order has no approved payment yet");
                    return Ok(None);
                };
                (gateway.get_payment(&approved.id).await?, order.external_reference.clone())
            }
        };

        let Some(reference) = payment.external_reference.clone().or(fallback_reference) else {
            return Ok(None);
        };

        Ok(Some(ResolvedPayment {
            external_payment_id: payment.id,
            reference,
            status: payment.status,
            amount: payment.amount,
            method: payment.method,
            paid_at: payment.paid_at,
        }))
    }
}

/// Gateway-confirmed facts about one payment.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayment {
    pub external_payment_id: String,
    pub reference: String,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}
