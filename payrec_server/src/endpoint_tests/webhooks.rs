use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use futures::FutureExt;
use payrec_common::{MinorUnits, Secret};
use payrec_engine::{
    db_types::{NewOrder, NewPayment, NewRefundRequest, OrderStatus, RefundStatus},
    events::{EventBus, InProcessEventBus, TOPIC_PAYMENT_SUCCEEDED, TOPIC_REFUND_STATUS_UPDATED},
    test_utils::{prepare_env::prepare_test_db, TestGateway},
    IdempotencyStore,
    LedgerDatabase,
    LedgerManagement,
    RefundFlowApi,
    SqliteDatabase,
    WebhookRouter,
};
use serde_json::{json, Value};

use super::helpers::{paid_order, send_request, signed_webhook, TEST_WEBHOOK_SECRET};
use crate::{
    config::{ProxyOptions, WebhookSecret},
    helpers::calculate_hmac,
    webhook_routes::{GatewayWebhookRoute, SIGNATURE_HEADER},
};

struct Harness {
    db: SqliteDatabase,
    flow: Arc<RefundFlowApi<SqliteDatabase, TestGateway>>,
    bus: Arc<InProcessEventBus>,
}

async fn harness() -> Harness {
    let (db, _url) = prepare_test_db().await;
    let bus = Arc::new(InProcessEventBus::default());
    let flow = Arc::new(RefundFlowApi::new(db.clone(), TestGateway::new(), bus.clone() as Arc<dyn EventBus>));
    Harness { db, flow, bus }
}

impl Harness {
    /// The app every webhook test runs against: the webhook route, a router over this harness's flow and
    /// ledger, and the test signing secret.
    fn configure(&self) -> impl FnOnce(&mut ServiceConfig) {
        let db = self.db.clone();
        let flow = Arc::clone(&self.flow);
        move |cfg| {
            let router = WebhookRouter::new(flow, db);
            cfg.service(GatewayWebhookRoute::<SqliteDatabase, TestGateway, SqliteDatabase>::new())
                .app_data(web::Data::new(router))
                .app_data(web::Data::new(WebhookSecret(Secret::new(TEST_WEBHOOK_SECRET.to_string()))))
                .app_data(web::Data::new(ProxyOptions::default()));
        }
    }
}

fn subscribe_counter(bus: &InProcessEventBus, topic: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    bus.subscribe(
        topic,
        "test-counter",
        Arc::new(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }),
    );
    count
}

fn payment_succeeded_envelope(event_id: &str, payment_ref: &str, order_id: i64, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": "payment.succeeded",
        "created_at": "2024-05-01T10:00:00Z",
        "data": {
            "id": payment_ref,
            "order_id": order_id,
            "amount_minor": amount,
            "currency": "GBP",
            "status": "succeeded",
        },
    })
}

fn refund_updated_envelope(event_id: &str, reference: &str, payment_ref: &str, amount: i64, status: &str) -> Value {
    json!({
        "id": event_id,
        "type": "refund.updated",
        "created_at": "2024-05-01T10:00:00Z",
        "data": {
            "id": reference,
            "payment_reference": payment_ref,
            "amount_minor": amount,
            "currency": "GBP",
            "status": status,
            "created_at": "2024-05-01T09:59:00Z",
        },
    })
}

#[actix_web::test]
async fn payment_webhooks_settle_the_order_end_to_end() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let order = h.db.insert_order(NewOrder::new(MinorUnits::from(45_000))).await.unwrap();
    h.db.insert_payment(NewPayment::new(order.id, "pi_wire_1", MinorUnits::from(45_000))).await.unwrap();
    let confirmations = subscribe_counter(&h.bus, TOPIC_PAYMENT_SUCCEEDED);

    let req = signed_webhook(&payment_succeeded_envelope("evt_pay_1", "pi_wire_1", order.id, 45_000));
    let (status, body) = send_request(req, h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"received":true}"#);

    let settled = h.db.fetch_order(order.id).await.unwrap().expect("order");
    assert_eq!(settled.status, OrderStatus::Paid);
    assert!(h.db.is_processed("evt_pay_1").await.unwrap());
    assert_eq!(confirmations.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn duplicate_deliveries_mutate_the_ledger_once() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let (order, _payment) = paid_order(&h.db, 50_000).await;
    h.flow.create_refund(NewRefundRequest::new(order.id, "Webhook test", "cs-agent-1")).await.unwrap();
    let updates = subscribe_counter(&h.bus, TOPIC_REFUND_STATUS_UPDATED);

    let envelope = refund_updated_envelope("evt_settle_1", "re_1", &format!("pi_{}", order.id), 50_000, "succeeded");
    let (status, _body) = send_request(signed_webhook(&envelope), h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    // The gateway redelivers. The event id is recognised and the handler does not run again.
    let (status, body) = send_request(signed_webhook(&envelope), h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"received":true}"#);

    assert_eq!(updates.load(Ordering::SeqCst), 1);
    let detail = h.db.refund_detail(1).await.unwrap().expect("refund detail");
    assert_eq!(detail.refund.status, RefundStatus::Succeeded);
    let settled = detail.history.iter().filter(|e| e.new_status == RefundStatus::Succeeded).count();
    assert_eq!(settled, 1);
}

#[actix_web::test]
async fn deliveries_with_a_bad_signature_touch_nothing() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let order = h.db.insert_order(NewOrder::new(MinorUnits::from(45_000))).await.unwrap();
    h.db.insert_payment(NewPayment::new(order.id, "pi_wire_2", MinorUnits::from(45_000))).await.unwrap();

    let body = payment_succeeded_envelope("evt_forged", "pi_wire_2", order.id, 45_000).to_string();
    let req = TestRequest::post()
        .uri("/webhooks/stripe-like")
        .insert_header((SIGNATURE_HEADER, "Ym9ndXM="))
        .set_payload(body);
    let (status, body) = send_request(req, h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("webhook_verification"));

    let untouched = h.db.fetch_order(order.id).await.unwrap().expect("order");
    assert_eq!(untouched.status, OrderStatus::New);
    assert!(!h.db.is_processed("evt_forged").await.unwrap());
}

#[actix_web::test]
async fn missing_signature_headers_are_refused() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let req = TestRequest::post()
        .uri("/webhooks/stripe-like")
        .set_payload(payment_succeeded_envelope("evt_naked", "pi_wire_3", 1, 1_000).to_string());
    let (status, body) = send_request(req, h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["error"], json!("The webhook signature was missing or invalid. Missing signature header"));
}

#[actix_web::test]
async fn garbage_bodies_with_a_valid_signature_answer_400() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let body = "not an envelope";
    let req = TestRequest::post()
        .uri("/webhooks/stripe-like")
        .insert_header((SIGNATURE_HEADER, calculate_hmac(TEST_WEBHOOK_SECRET, body.as_bytes())))
        .set_payload(body);
    let (status, body) = send_request(req, h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("invalid_request"));
}

#[actix_web::test]
async fn unknown_event_types_are_acknowledged_and_deduped() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let envelope = json!({
        "id": "evt_po_1",
        "type": "payout.paid",
        "created_at": "2024-05-01T10:00:00Z",
        "data": { "id": "po_1" },
    });
    let (status, body) = send_request(signed_webhook(&envelope), h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"received":true}"#);
    assert!(h.db.is_processed("evt_po_1").await.unwrap());

    let (status, body) = send_request(signed_webhook(&envelope), h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"received":true}"#);
}

#[actix_web::test]
async fn handler_failures_answer_500_and_stay_unmarked() {
    let _ = env_logger::try_init().ok();
    let h = harness().await;
    let (order, _payment) = paid_order(&h.db, 30_000).await;
    h.flow.create_refund(NewRefundRequest::new(order.id, "Doomed", "cs-agent-1")).await.unwrap();
    // Sabotage the journal table so the settlement fails mid-transaction.
    sqlx::query("DROP TABLE refund_events").execute(h.db.pool()).await.expect("Error dropping table");

    let envelope = refund_updated_envelope("evt_doomed", "re_1", &format!("pi_{}", order.id), 30_000, "succeeded");
    let (status, body) = send_request(signed_webhook(&envelope), h.configure()).await.expect("Request failed");
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("internal"));

    // The event is not marked processed, so the gateway's redelivery will retry it.
    assert!(!h.db.is_processed("evt_doomed").await.unwrap());
    let refund = h.db.fetch_refund(1).await.unwrap().expect("refund");
    assert_eq!(refund.status, RefundStatus::Processing);
}
