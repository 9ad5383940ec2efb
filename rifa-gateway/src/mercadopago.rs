use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use rifa_core::payment::{
    CheckoutRequest, CheckoutSession, GatewayError, GatewayResult, MerchantOrder, OrderPayment,
    PaymentDetails, PaymentGateway, PaymentStatus,
};

/// Mercado Pago REST client.
///
/// Every request goes to the configured `api_base`; resource URLs found in
/// notifications are reduced to their id first, so the access token is never
/// sent anywhere else.
#[derive(Clone)]
pub struct MercadoPagoClient {
    client: Client,
    access_token: String,
    api_base: String,
}

impl MercadoPagoClient {
    pub fn new(access_token: String, api_base: String, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            client,
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        decode(path, response).await
    }
}

async fn decode<T: DeserializeOwned>(what: &str, response: Response) -> GatewayResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(format!("{what}: {e}")));
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(what.to_string()),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::Transient(format!("{what}: throttled")),
        s if s.is_server_error() => GatewayError::Transient(format!("{what}: {s}")),
        s => GatewayError::Rejected(format!("{what}: {s} {body}")),
    })
}

/// Mercado Pago ids are numbers on some resources and strings on others.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct WirePayer {
    email: Option<String>,
}

#[derive(Deserialize)]
struct WirePayment {
    id: WireId,
    status: PaymentStatus,
    external_reference: Option<String>,
    transaction_amount: Option<f64>,
    payment_method_id: Option<String>,
    date_approved: Option<String>,
    payer: Option<WirePayer>,
}

impl From<WirePayment> for PaymentDetails {
    fn from(wire: WirePayment) -> Self {
        PaymentDetails {
            id: wire.id.into(),
            status: wire.status,
            external_reference: wire.external_reference.filter(|r| !r.is_empty()),
            amount: wire.transaction_amount.map(|a| a.round() as i64),
            method: wire.payment_method_id,
            paid_at: wire
                .date_approved
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc)),
            payer_email: wire.payer.and_then(|p| p.email),
        }
    }
}

#[derive(Deserialize)]
struct WireOrderPayment {
    id: WireId,
    status: PaymentStatus,
}

#[derive(Deserialize)]
struct WireOrder {
    id: WireId,
    external_reference: Option<String>,
    #[serde(default)]
    payments: Vec<WireOrderPayment>,
}

impl From<WireOrder> for MerchantOrder {
    fn from(wire: WireOrder) -> Self {
        MerchantOrder {
            id: wire.id.into(),
            external_reference: wire.external_reference.filter(|r| !r.is_empty()),
            payments: wire
                .payments
                .into_iter()
                .map(|p| OrderPayment { id: p.id.into(), status: p.status })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct PreferenceItem<'a> {
    id: &'a str,
    title: &'a str,
    quantity: u32,
    unit_price: i64,
    currency_id: &'a str,
}

#[derive(Serialize)]
struct PreferencePhone<'a> {
    number: &'a str,
}

#[derive(Serialize)]
struct PreferencePayer<'a> {
    name: &'a str,
    email: &'a str,
    phone: PreferencePhone<'a>,
}

#[derive(Serialize)]
struct BackUrls<'a> {
    success: &'a str,
    failure: &'a str,
    pending: &'a str,
}

#[derive(Serialize)]
struct PreferenceBody<'a> {
    items: [PreferenceItem<'a>; 1],
    payer: PreferencePayer<'a>,
    external_reference: &'a str,
    auto_return: &'a str,
    back_urls: BackUrls<'a>,
    notification_url: &'a str,
}

#[derive(Deserialize)]
struct WirePreference {
    id: WireId,
    init_point: String,
}

impl<'a> From<&'a CheckoutRequest> for PreferenceBody<'a> {
    fn from(req: &'a CheckoutRequest) -> Self {
        PreferenceBody {
            items: [PreferenceItem {
                id: &req.reference,
                title: &req.title,
                quantity: 1,
                unit_price: req.amount,
                currency_id: &req.currency,
            }],
            payer: PreferencePayer {
                name: &req.payer_name,
                email: &req.payer_email,
                phone: PreferencePhone { number: &req.payer_phone },
            },
            external_reference: &req.reference,
            auto_return: "approved",
            back_urls: BackUrls {
                success: &req.return_url,
                failure: &req.return_url,
                pending: &req.return_url,
            },
            notification_url: &req.notification_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn create_checkout(&self, request: &CheckoutRequest) -> GatewayResult<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.reference)
            .json(&PreferenceBody::from(request))
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let preference: WirePreference = decode("/checkout/preferences", response).await?;
        tracing::info!(reference = %request.reference, "Checkout preference created");

        Ok(CheckoutSession {
            id: preference.id.into(),
            init_point: preference.init_point,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> GatewayResult<PaymentDetails> {
        let wire: WirePayment = self.get_json(&format!("/v1/payments/{}", payment_id)).await?;
        Ok(wire.into())
    }

    async fn get_merchant_order(&self, order_id: &str) -> GatewayResult<MerchantOrder> {
        let wire: WireOrder = self.get_json(&format!("/merchant_orders/{}", order_id)).await?;
        Ok(wire.into())
    }
}
