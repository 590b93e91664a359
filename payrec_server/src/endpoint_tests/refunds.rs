use std::sync::Arc;

use actix_web::{http::StatusCode, test::TestRequest, web};
use payrec_engine::{
    db_types::NewRefundRequest,
    events::InProcessEventBus,
    refund_objects::{Pagination, RefundQueryFilter},
    test_utils::{prepare_env::prepare_test_db, SubmitScript, TestGateway},
    LedgerApi,
    LedgerManagement,
    RefundFlowApi,
    SqliteDatabase,
};
use serde_json::{json, Value};

use super::{
    helpers::{paid_order, send_request},
    mocks::MockLedgerReader,
};
use crate::routes::{CancelRefundRoute, CreateRefundRoute, RefundByIdRoute, RetryRefundRoute, SearchRefundsRoute};

fn flow(db: SqliteDatabase, gateway: TestGateway) -> RefundFlowApi<SqliteDatabase, TestGateway> {
    RefundFlowApi::new(db, gateway, Arc::new(InProcessEventBus::default()))
}

#[actix_web::test]
async fn creating_a_refund_returns_201() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let req = TestRequest::post()
        .uri("/refunds")
        .insert_header(("X-Requested-By", "cs-agent-1"))
        .set_json(json!({ "orderId": order.id, "amount": "12.50", "reason": "Damaged item" }));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CreateRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::CREATED);
    let refund: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(refund["orderId"], json!(order.id));
    assert_eq!(refund["amount"], json!("12.50"));
    assert_eq!(refund["status"], json!("PROCESSING"));
    assert_eq!(refund["gatewayRefundRef"], json!("re_1"));
    assert_eq!(refund["requestedBy"], json!("cs-agent-1"));
    assert_eq!(refund["reason"], json!("Damaged item"));
}

#[actix_web::test]
async fn an_absent_requester_header_defaults_to_api() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let req = TestRequest::post().uri("/refunds").set_json(json!({ "orderId": order.id, "reason": "Goodwill" }));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CreateRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::CREATED);
    let refund: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(refund["requestedBy"], json!("api"));
    // No amount given, so the whole payment is refunded.
    assert_eq!(refund["amount"], json!("100.00"));
}

#[actix_web::test]
async fn bad_amounts_never_reach_the_ledger() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    for bad in ["12.345", "", "-3"] {
        let api = flow(db.clone(), TestGateway::new());
        let req = TestRequest::post()
            .uri("/refunds")
            .set_json(json!({ "orderId": order.id, "amount": bad, "reason": "Damaged item" }));
        let (status, body) = send_request(req, move |cfg| {
            cfg.service(CreateRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
        })
        .await
        .expect("Request failed");
        assert_eq!(status, StatusCode::BAD_REQUEST, "amount {bad:?} should have been refused");
        let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
        assert_eq!(err["code"], json!("validation_failed"));
        assert_eq!(err["fields"][0]["field"], json!("amount"));
    }
    let found = db
        .search_refunds(RefundQueryFilter::default(), Pagination::default())
        .await
        .expect("Error searching refunds");
    assert_eq!(found.meta.total, 0);
}

#[actix_web::test]
async fn a_blank_reason_is_refused() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let req = TestRequest::post().uri("/refunds").set_json(json!({ "orderId": order.id, "reason": "   " }));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CreateRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("validation_failed"));
    assert_eq!(err["fields"][0]["field"], json!("reason"));
}

#[actix_web::test]
async fn over_refunding_answers_422() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let req = TestRequest::post()
        .uri("/refunds")
        .set_json(json!({ "orderId": order.id, "amount": "150.00", "reason": "Too generous" }));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CreateRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("amount_exceeded"));
}

#[actix_web::test]
async fn fetching_an_unknown_refund_answers_404() {
    let _ = env_logger::try_init().ok();
    let req = TestRequest::get().uri("/refunds/42");
    let (status, body) = send_request(req, |cfg| {
        let mut ledger = MockLedgerReader::new();
        ledger.expect_refund_detail().returning(|_| Ok(None));
        cfg.service(RefundByIdRoute::<MockLedgerReader>::new()).app_data(web::Data::new(LedgerApi::new(ledger)));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("not_found"));
    assert_eq!(err["error"], json!("Refund #42 does not exist"));
}

#[actix_web::test]
async fn refund_detail_includes_the_audit_trail() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db.clone(), TestGateway::new());
    let refund =
        api.create_refund(NewRefundRequest::new(order.id, "Damaged item", "cs-agent-1")).await.expect("create");
    let req = TestRequest::get().uri(&format!("/refunds/{}", refund.id));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(RefundByIdRoute::<SqliteDatabase>::new()).app_data(web::Data::new(LedgerApi::new(db)));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let detail: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(detail["refund"]["id"], json!(refund.id));
    assert_eq!(detail["order"]["id"], json!(order.id));
    assert_eq!(detail["payment"]["gatewayPaymentRef"], json!(format!("pi_{}", order.id)));
    // Creation and gateway acceptance each left a journal entry.
    let history = detail["history"].as_array().expect("history should be an array");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["newStatus"], json!("PENDING"));
    assert_eq!(history[1]["newStatus"], json!("PROCESSING"));
}

#[actix_web::test]
async fn cancelling_a_pending_refund_succeeds() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let gateway = TestGateway::new();
    // The submission times out, so the refund is still Pending and may be cancelled.
    gateway.script_next(SubmitScript::Timeout);
    let api = flow(db, gateway);
    let refund = api.create_refund(NewRefundRequest::new(order.id, "Impatient", "cs-agent-1")).await.expect("create");
    let req = TestRequest::post()
        .uri(&format!("/refunds/{}/cancel", refund.id))
        .insert_header(("X-Requested-By", "admin-1"));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CancelRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let cancelled: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(cancelled["status"], json!("CANCELLED"));
    assert_eq!(cancelled["cancelledBy"], json!("admin-1"));
}

#[actix_web::test]
async fn cancelling_an_accepted_refund_conflicts() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let refund = api.create_refund(NewRefundRequest::new(order.id, "Too late", "cs-agent-1")).await.expect("create");
    let req = TestRequest::post().uri(&format!("/refunds/{}/cancel", refund.id));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(CancelRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("conflict"));
}

#[actix_web::test]
async fn retrying_a_failed_refund_resubmits() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let gateway = TestGateway::new();
    gateway.script_next(SubmitScript::Reject { code: "try_later".to_string(), message: "busy".to_string() });
    let api = flow(db.clone(), gateway);
    let refund = api.create_refund(NewRefundRequest::new(order.id, "Persistent", "cs-agent-1")).await.expect("create");
    let req = TestRequest::post()
        .uri(&format!("/refunds/{}/retry", refund.id))
        .insert_header(("X-Requested-By", "cs-agent-2"));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(RetryRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let retried: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(retried["status"], json!("PROCESSING"));
    assert_eq!(retried["retryCount"], json!(1));
    // The journal names whoever asked for the retry; the record keeps its original requester.
    let detail = db.refund_detail(refund.id).await.expect("query").expect("refund");
    assert_eq!(detail.refund.requested_by, "cs-agent-1");
    let retry_event = detail.history.iter().find(|e| e.note.as_deref() == Some("Retry requested by cs-agent-2"));
    assert!(retry_event.is_some(), "The retry should be attributed in the journal");
}

#[actix_web::test]
async fn retrying_a_refund_that_is_not_failed_conflicts() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db, TestGateway::new());
    let refund = api.create_refund(NewRefundRequest::new(order.id, "Eager", "cs-agent-1")).await.expect("create");
    let req = TestRequest::post().uri(&format!("/refunds/{}/retry", refund.id));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(RetryRefundRoute::<SqliteDatabase, TestGateway>::new()).app_data(web::Data::new(api));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("conflict"));
}

#[actix_web::test]
async fn search_filters_by_order_and_pages_the_results() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let (order, _payment) = paid_order(&db, 30_000).await;
    let (other, _payment) = paid_order(&db, 10_000).await;
    let api = flow(db.clone(), TestGateway::new());
    for n in 1..=3 {
        api.create_refund(NewRefundRequest::new(order.id, format!("Instalment {n}"), "cs-agent-1").with_amount(5_000.into()))
            .await
            .expect("create");
    }
    api.create_refund(NewRefundRequest::new(other.id, "Unrelated", "cs-agent-2")).await.expect("create");

    let req = TestRequest::get().uri(&format!("/refunds?orderId={}&status=processing&page=1&limit=2", order.id));
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(SearchRefundsRoute::<SqliteDatabase>::new()).app_data(web::Data::new(LedgerApi::new(db)));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let page: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(page["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(page["data"][0]["orderId"], json!(order.id));
    assert_eq!(page["meta"]["total"], json!(3));
    assert_eq!(page["meta"]["totalPages"], json!(2));
    assert_eq!(page["meta"]["page"], json!(1));
    assert_eq!(page["meta"]["limit"], json!(2));
}

#[actix_web::test]
async fn search_refuses_unknown_statuses() {
    let _ = env_logger::try_init().ok();
    let (db, _url) = prepare_test_db().await;
    let req = TestRequest::get().uri("/refunds?status=sideways");
    let (status, body) = send_request(req, move |cfg| {
        cfg.service(SearchRefundsRoute::<SqliteDatabase>::new()).app_data(web::Data::new(LedgerApi::new(db)));
    })
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).expect("Error parsing response body");
    assert_eq!(err["code"], json!("validation_failed"));
    assert_eq!(err["fields"][0]["field"], json!("status"));
}
