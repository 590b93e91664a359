use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web::ServiceConfig, App};
use payrec_common::MinorUnits;
use payrec_engine::{
    db_types::{NewOrder, NewPayment, Order, Payment, PaymentStatus},
    LedgerDatabase,
    SqliteDatabase,
};

use crate::{helpers::calculate_hmac, webhook_routes::SIGNATURE_HEADER};

// The secret every test delivery is signed with. DO NOT re-use this value anywhere.
pub const TEST_WEBHOOK_SECRET: &str = "whsec_endpoint_tests";

/// An order with a captured payment for the full amount, ready to refund against.
pub async fn paid_order(db: &SqliteDatabase, amount: i64) -> (Order, Payment) {
    let order = db.insert_order(NewOrder::new(MinorUnits::from(amount))).await.expect("Error inserting order");
    let payment = db
        .insert_payment(
            NewPayment::new(order.id, format!("pi_{}", order.id), MinorUnits::from(amount))
                .with_status(PaymentStatus::Succeeded),
        )
        .await
        .expect("Error inserting payment");
    (order, payment)
}

/// Runs `req` against an app assembled by `configure` and hands back the response status and body.
pub async fn send_request(
    req: TestRequest,
    configure: impl FnOnce(&mut ServiceConfig),
) -> Result<(StatusCode, String), String> {
    let app = App::new().configure(configure);
    let service = test::init_service(app).await;
    let (_, res) = test::try_call_service(&service, req.to_request()).await.map_err(|e| e.to_string())?.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    Ok((status, body))
}

/// A webhook delivery carrying `payload`, signed with [`TEST_WEBHOOK_SECRET`].
pub fn signed_webhook(payload: &serde_json::Value) -> TestRequest {
    let body = payload.to_string();
    let signature = calculate_hmac(TEST_WEBHOOK_SECRET, body.as_bytes());
    TestRequest::post()
        .uri("/webhooks/stripe-like")
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body)
}
