use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use rifa_api::{app, AppState};
use rifa_core::payment::PaymentStatus;
use rifa_core::repository::TicketRepository;
use rifa_core::Sale;
use rifa_gateway::{signature, MockPaymentGateway, RecordingNotifier};
use rifa_store::app_config::Config;
use rifa_store::InMemoryStore;

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<InMemoryStore>,
    gateway: Arc<MockPaymentGateway>,
    notifier: Arc<RecordingNotifier>,
}

fn test_config(webhook_secret: Option<&str>) -> Config {
    let secret = webhook_secret
        .map(|s| format!("webhook_secret = \"{}\"", s))
        .unwrap_or_default();
    let raw = format!(
        r#"
        [server]
        port = 0

        [auth]
        jwt_secret = "test-secret"
        jwt_expiration_seconds = 3600
        admin_user = "admin"
        admin_password = "hunter2"

        [business_rules]
        price_per_ticket = 5000
        max_numbers_per_purchase = 5
        claim_lookup_retry_ms = 10
        base_url = "https://rifa.example"

        [gateway]
        access_token = "TEST-token"
        {secret}
        "#
    );

    config::Config::builder()
        .add_source(config::File::from_str(&raw, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

fn test_app_with(webhook_secret: Option<&str>) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let state = AppState::new(
        &test_config(webhook_secret),
        store.clone(),
        store.clone(),
        gateway.clone(),
        notifier.clone(),
        None,
    )
    .unwrap();

    TestApp { router: app(state.clone()), state, store, gateway, notifier }
}

fn test_app() -> TestApp {
    test_app_with(None)
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn reserve(&self, numbers: Value) -> Response {
        self.post_json(
            "/api/tickets/guardar-pendiente",
            json!({
                "nombre": "Ana Gómez",
                "correo": "Ana@Example.com",
                "telefono": "3001234567",
                "numeros": numbers,
            }),
        )
        .await
    }

    async fn admin_token(&self) -> String {
        let response = self
            .post_json("/api/admin/login", json!({ "username": "admin", "password": "hunter2" }))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["token"].as_str().unwrap().to_string()
    }

    async fn admin(&self, method: &str, uri: &str, token: &str) -> Response {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn wait_for_sale(&self, reference: &str) -> Option<Sale> {
        for _ in 0..200 {
            if let Some(sale) = self.store.find_sale(None, reference).await.unwrap() {
                return Some(sale);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn payment_notification(payment_id: &str) -> Value {
    json!({ "type": "payment", "action": "payment.updated", "data": { "id": payment_id } })
}

#[tokio::test]
async fn test_public_config() {
    let app = test_app();
    let response = app.get("/api/config").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["price"], 5000);
    assert_eq!(body["max_numbers"], 5);
    assert_eq!(body["total_numbers"], 1000);
}

#[tokio::test]
async fn test_reserve_then_conflict() {
    let app = test_app();

    let response = app.reserve(json!(["007", 8])).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let reference = body["reference"].as_str().unwrap();
    assert!(reference.starts_with("RIFA-"));
    assert_eq!(body["numbers"], json!(["007", "008"]));
    assert_eq!(body["amount"], 10000);

    let claim = app.store.find_claim(reference).await.unwrap().unwrap();
    assert_eq!(claim.buyer_email, "ana@example.com");

    let response = app.reserve(json!(["008", "009"])).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["conflicts"], json!(["008"]));

    let numbers = body_json(app.get("/api/tickets/numeros").await).await;
    let numbers = numbers["numbers"].as_array().unwrap();
    assert_eq!(numbers.len(), 1000);
    assert_eq!(numbers[7], json!({ "number": "007", "available": false }));
    assert_eq!(numbers[9], json!({ "number": "009", "available": true }));

    assert_eq!(app.state.metrics.reservation_count("created"), 1);
    assert_eq!(app.state.metrics.reservation_count("conflict"), 1);
}

#[tokio::test]
async fn test_reserve_validation_errors() {
    let app = test_app();

    let response = app
        .post_json(
            "/api/tickets/guardar-pendiente",
            json!({ "nombre": "Ana", "correo": "not-an-email", "telefono": "300", "numeros": ["1"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    assert_eq!(app.reserve(json!([true])).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.reserve(json!(["1000"])).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.reserve(json!([])).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.reserve(json!(["1", "2", "3", "4", "5", "6"])).await.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/tickets/guardar-pendiente")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.store.list_claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_preference_prices_from_claim() {
    let app = test_app();

    let response = app
        .post_json("/api/mercadopago/preference", json!({ "reference": "RIFA-missing" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let reserved = body_json(app.reserve(json!(["007", "008"])).await).await;
    let reference = reserved["reference"].as_str().unwrap();

    let response = app
        .post_json("/api/mercadopago/preference", json!({ "reference": reference, "monto": 1 }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["init_point"].as_str().unwrap().contains(reference));

    let checkouts = app.gateway.checkouts().await;
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].amount, 10000);
    assert_eq!(checkouts[0].notification_url, "https://rifa.example/api/mercadopago/webhook");
}

#[tokio::test]
async fn test_approved_webhook_records_sale() {
    let app = test_app();
    let reserved = body_json(app.reserve(json!(["007", "008"])).await).await;
    let reference = reserved["reference"].as_str().unwrap().to_string();

    app.gateway
        .insert_payment(MockPaymentGateway::payment("123", PaymentStatus::Approved, &reference, 10000))
        .await;

    let response = app
        .post_json("/api/mercadopago/webhook?type=payment&data.id=123", payment_notification("123"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let sale = app.wait_for_sale(&reference).await.expect("sale recorded");
    assert_eq!(sale.amount_paid, 10000);
    assert_eq!(sale.external_payment_id, "123");
    assert!(app.store.find_claim(&reference).await.unwrap().is_none());

    let status = body_json(app.get(&format!("/api/tickets/reference/{}", reference)).await).await;
    assert_eq!(status["status"], "paid");

    let progress = body_json(app.get("/api/tickets/consulta").await).await;
    assert_eq!(progress["sold"], 2);
    assert_eq!(progress["reserved"], 0);

    // A redelivery acks and changes nothing.
    let response = app
        .post_json("/api/mercadopago/webhook?type=payment&data.id=123", payment_notification("123"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    for _ in 0..200 {
        if app.state.metrics.reconciliation_count("duplicate") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.state.metrics.reconciliation_count("duplicate"), 1);
    assert_eq!(app.store.list_sales().await.unwrap().len(), 1);
    assert_eq!(app.notifier.confirmations().await.len(), 1);
}

#[tokio::test]
async fn test_webhook_acks_garbage_and_unknown_payments() {
    let app = test_app();

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/mercadopago/webhook")
                .body(Body::from("not json at all"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json("/api/mercadopago/webhook", payment_notification("does-not-exist"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_signature_enforced_when_configured() {
    let app = test_app_with(Some("whsec"));

    let response = app
        .post_json("/api/mercadopago/webhook?type=payment&data.id=123", payment_notification("123"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.metrics.reconciliation_count("bad_signature"), 1);

    let v1 = signature::sign("whsec", "123", "req-1", "1704908010").unwrap();
    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/mercadopago/webhook?type=payment&data.id=123")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-request-id", "req-1")
                .header("x-signature", format!("ts=1704908010,v1={}", v1))
                .body(Body::from(payment_notification("123").to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_requires_token() {
    let app = test_app();

    assert_eq!(app.get("/api/admin/tickets").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.admin("GET", "/api/admin/tickets", "not-a-jwt").await.status(),
        StatusCode::UNAUTHORIZED
    );

    let response = app
        .post_json("/api/admin/login", json!({ "username": "admin", "password": "wrong" }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_login_checks_both_credentials() {
    let app = test_app();

    for (username, password) in [("admin", "wrong"), ("admin", "hunter"), ("admin", "hunter22"), ("root", "hunter2"), ("", "")] {
        let response = app
            .post_json("/api/admin/login", json!({ "username": username, "password": password }))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}:{}", username, password);
        assert_eq!(body_json(response).await["error"], "Invalid credentials");
    }

    let token = app.admin_token().await;
    assert_eq!(app.admin("GET", "/api/admin/tickets", &token).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_lists_and_deletes_tickets() {
    let app = test_app();
    let first = body_json(app.reserve(json!(["001"])).await).await;
    let second = body_json(app.reserve(json!(["002", "003"])).await).await;
    let paid_reference = second["reference"].as_str().unwrap().to_string();

    app.gateway
        .insert_payment(MockPaymentGateway::payment("77", PaymentStatus::Approved, &paid_reference, 10000))
        .await;
    app.post_json("/api/mercadopago/webhook", payment_notification("77")).await;
    app.wait_for_sale(&paid_reference).await.expect("sale recorded");

    let token = app.admin_token().await;
    let response = app.admin("GET", "/api/admin/tickets", &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let tickets = body["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 2);

    let pending = tickets.iter().find(|t| t["reference"] == first["reference"]).unwrap();
    assert_eq!(pending["status"], "pending");
    let paid = tickets.iter().find(|t| t["reference"] == paid_reference.as_str()).unwrap();
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["payment_method"], "visa");

    let mut events = app.state.sse_tx.subscribe();
    let id = pending["id"].as_str().unwrap();
    let uri = format!("/api/admin/tickets/{}", id);
    assert_eq!(app.admin("DELETE", &uri, &token).await.status(), StatusCode::OK);
    assert_eq!(app.admin("DELETE", &uri, &token).await.status(), StatusCode::NOT_FOUND);
    let mut released = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.name() == "numbers_released" {
            released.push(event);
        }
    }
    assert_eq!(released.len(), 1);

    let numbers = body_json(app.get("/api/tickets/numeros").await).await;
    assert_eq!(numbers["numbers"][1]["available"], true);

    let webhooks = body_json(app.admin("GET", "/api/admin/webhooks?page=1&limit=10&q=77", &token).await).await;
    assert_eq!(webhooks["total"], 1);
    assert_eq!(webhooks["records"][0]["kind"], "payment");
}

#[tokio::test]
async fn test_stream_and_metrics_endpoints() {
    let app = test_app();

    let response = app.get("/api/tickets/stream").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    app.reserve(json!(["010"])).await;
    let response = app.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("rifa_reservations_total{outcome=\"created\"} 1"));
}
