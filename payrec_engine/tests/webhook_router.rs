//! Exactly-once webhook intake: dedup, dispatch, and the failure modes that keep redelivery safe.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use futures_util::FutureExt;
use payrec_common::MinorUnits;
use payrec_engine::{
    db_types::{NewOrder, NewPayment, NewRefundRequest, Order, OrderStatus, Payment, PaymentStatus, RefundStatus},
    events::{EventBus, InProcessEventBus, TOPIC_ORDER_CANCELLED, TOPIC_PAYMENT_SUCCEEDED, TOPIC_REFUND_STATUS_UPDATED},
    test_utils::{prepare_env::prepare_test_db, TestGateway},
    traits::{GatewayRefundStatus, PaymentNotice, RefundNotice, WebhookDisposition},
    IdempotencyStore,
    InboundEvent,
    InboundEventKind,
    LedgerDatabase,
    LedgerManagement,
    RefundFlowApi,
    SqliteDatabase,
    WebhookRouter,
};

type Router = WebhookRouter<SqliteDatabase, TestGateway, SqliteDatabase>;

struct Harness {
    db: SqliteDatabase,
    flow: Arc<RefundFlowApi<SqliteDatabase, TestGateway>>,
    router: Router,
    bus: Arc<InProcessEventBus>,
}

async fn harness() -> Harness {
    let (db, _url) = prepare_test_db().await;
    let bus = Arc::new(InProcessEventBus::default());
    let flow = Arc::new(RefundFlowApi::new(db.clone(), TestGateway::new(), bus.clone() as Arc<dyn EventBus>));
    let router = WebhookRouter::new(Arc::clone(&flow), db.clone());
    Harness { db, flow, router, bus }
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

async fn paid_order(db: &SqliteDatabase, amount: i64) -> (Order, Payment) {
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

fn refund_updated_event(event_id: &str, reference: &str, status: GatewayRefundStatus) -> InboundEvent {
    InboundEvent {
        event_id: event_id.to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "refund.updated".to_string(),
        kind: InboundEventKind::RefundUpdated(RefundNotice {
            gateway_refund_ref: reference.to_string(),
            gateway_payment_ref: None,
            amount: None,
            currency: None,
            status,
            failure_reason: None,
        }),
    }
}

#[tokio::test]
async fn duplicate_deliveries_mutate_once_and_publish_once() {
    let h = harness().await;
    let (order, _payment) = paid_order(&h.db, 50_000).await;
    h.flow.create_refund(NewRefundRequest::new(order.id, "Webhook test", "cs-agent-1")).await.unwrap();
    let updates = subscribe_counter(&h.bus, TOPIC_REFUND_STATUS_UPDATED);

    let event = refund_updated_event("evt_settle_1", "re_1", GatewayRefundStatus::Succeeded);
    let first = h.router.handle_inbound(event.clone()).await.expect("Error handling webhook");
    assert_eq!(first, WebhookDisposition::Handled);

    // The gateway redelivers. The event id is recognised and nothing runs again.
    let second = h.router.handle_inbound(event).await.expect("Error handling redelivery");
    assert_eq!(second, WebhookDisposition::Duplicate);

    assert_eq!(updates.load(Ordering::SeqCst), 1);
    let detail = h.db.refund_detail(1).await.unwrap().expect("refund detail");
    assert_eq!(detail.refund.status, RefundStatus::Succeeded);
    // One settlement entry in the journal, not two.
    let settled = detail.history.iter().filter(|e| e.new_status == RefundStatus::Succeeded).count();
    assert_eq!(settled, 1);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged_and_deduped() {
    let h = harness().await;
    let event = InboundEvent {
        event_id: "evt_mystery".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "terminal.reader.updated".to_string(),
        kind: InboundEventKind::Unknown,
    };
    let first = h.router.handle_inbound(event.clone()).await.unwrap();
    assert_eq!(first, WebhookDisposition::Ignored);
    // Acknowledged events are marked processed too, so the redelivery short-circuits.
    let second = h.router.handle_inbound(event).await.unwrap();
    assert_eq!(second, WebhookDisposition::Duplicate);
}

#[tokio::test]
async fn failed_handlers_leave_the_event_unmarked() {
    let h = harness().await;
    let (order, _payment) = paid_order(&h.db, 30_000).await;
    h.flow.create_refund(NewRefundRequest::new(order.id, "Doomed", "cs-agent-1")).await.unwrap();

    // Sabotage the journal table so the transition fails mid-transaction.
    sqlx::query("DROP TABLE refund_events").execute(h.db.pool()).await.expect("Error dropping table");

    let event = refund_updated_event("evt_doomed", "re_1", GatewayRefundStatus::Succeeded);
    h.router.handle_inbound(event).await.expect_err("The handler must fail");

    // The failed transaction rolled back and the event is NOT marked processed, so a redelivery will retry it.
    let refund = h.db.fetch_refund(1).await.unwrap().expect("refund");
    assert_eq!(refund.status, RefundStatus::Processing);
    assert!(!h.db.is_processed("evt_doomed").await.unwrap());
}

#[tokio::test]
async fn unknown_refund_references_are_acknowledged_not_retried() {
    let h = harness().await;
    let event = refund_updated_event("evt_stray", "re_never_seen", GatewayRefundStatus::Succeeded);
    // Redelivery cannot fix an unknown reference, so the router acks instead of erroring.
    let disposition = h.router.handle_inbound(event).await.unwrap();
    assert_eq!(disposition, WebhookDisposition::Handled);
    assert!(h.db.is_processed("evt_stray").await.unwrap());
}

#[tokio::test]
async fn out_of_order_updates_are_acknowledged_without_applying() {
    let h = harness().await;
    let (order, _payment) = paid_order(&h.db, 20_000).await;
    h.flow.create_refund(NewRefundRequest::new(order.id, "Order of events", "cs-agent-1")).await.unwrap();

    let settle = refund_updated_event("evt_a", "re_1", GatewayRefundStatus::Succeeded);
    h.router.handle_inbound(settle).await.unwrap();

    // A stale "pending" notification arrives after settlement. It must not drag the refund backwards.
    let stale = refund_updated_event("evt_b", "re_1", GatewayRefundStatus::Pending);
    let disposition = h.router.handle_inbound(stale).await.unwrap();
    assert_eq!(disposition, WebhookDisposition::Handled);
    let refund = h.db.fetch_refund(1).await.unwrap().expect("refund");
    assert_eq!(refund.status, RefundStatus::Succeeded);
}

#[tokio::test]
async fn gateway_issued_refunds_are_recorded_within_headroom() {
    let h = harness().await;
    let (order, payment) = paid_order(&h.db, 100_000).await;
    let updates = subscribe_counter(&h.bus, TOPIC_REFUND_STATUS_UPDATED);

    let notice = RefundNotice {
        gateway_refund_ref: "re_gateway_1".to_string(),
        gateway_payment_ref: Some(payment.gateway_payment_ref.clone()),
        amount: Some(MinorUnits::from(25_000)),
        currency: Some(payment.currency.clone()),
        status: GatewayRefundStatus::Succeeded,
        failure_reason: None,
    };
    let event = InboundEvent {
        event_id: "evt_gw_refund".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "charge.refunded".to_string(),
        kind: InboundEventKind::ChargeRefunded(notice.clone()),
    };
    let disposition = h.router.handle_inbound(event).await.unwrap();
    assert_eq!(disposition, WebhookDisposition::Handled);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let activity = h.db.order_with_activity(order.id).await.unwrap().expect("order activity");
    assert_eq!(activity.refunds.len(), 1);
    let adopted = &activity.refunds[0];
    assert_eq!(adopted.status, RefundStatus::Succeeded);
    assert_eq!(adopted.amount, MinorUnits::from(25_000));
    assert_eq!(adopted.gateway_refund_ref.as_deref(), Some("re_gateway_1"));
    assert_eq!(adopted.requested_by, "gateway");
    assert_eq!(activity.order.status, OrderStatus::PartiallyRefunded);

    // A gateway refund that would oversubscribe the payment is refused and logged, never recorded.
    let mut too_big = notice;
    too_big.gateway_refund_ref = "re_gateway_2".to_string();
    too_big.amount = Some(MinorUnits::from(90_000));
    let event = InboundEvent {
        event_id: "evt_gw_refund_2".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "charge.refunded".to_string(),
        kind: InboundEventKind::ChargeRefunded(too_big),
    };
    let disposition = h.router.handle_inbound(event).await.unwrap();
    assert_eq!(disposition, WebhookDisposition::Handled);
    let activity = h.db.order_with_activity(order.id).await.unwrap().expect("order activity");
    assert_eq!(activity.refunds.len(), 1);
}

#[tokio::test]
async fn payment_webhooks_settle_the_order() {
    let h = harness().await;
    let confirmations = subscribe_counter(&h.bus, TOPIC_PAYMENT_SUCCEEDED);
    let order = h.db.insert_order(NewOrder::new(MinorUnits::from(45_000))).await.unwrap();
    h.db.insert_payment(NewPayment::new(order.id, "pi_wire_1", MinorUnits::from(45_000))).await.unwrap();

    let notice = PaymentNotice {
        gateway_payment_ref: "pi_wire_1".to_string(),
        order_id: Some(order.id),
        amount: MinorUnits::from(45_000),
        currency: "GBP".to_string(),
        failure_reason: None,
    };
    let event = InboundEvent {
        event_id: "evt_pay_1".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "payment.succeeded".to_string(),
        kind: InboundEventKind::PaymentSucceeded(notice.clone()),
    };
    assert_eq!(h.router.handle_inbound(event).await.unwrap(), WebhookDisposition::Handled);
    let activity = h.db.order_with_activity(order.id).await.unwrap().expect("order activity");
    assert_eq!(activity.order.status, OrderStatus::Paid);
    assert_eq!(activity.payments[0].status, PaymentStatus::Succeeded);
    assert!(activity.payments[0].captured_at.is_some());
    assert_eq!(confirmations.load(Ordering::SeqCst), 1);

    // The same notice under a different event id is applied idempotently: no state change, no new event.
    let event = InboundEvent {
        event_id: "evt_pay_1b".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "payment.succeeded".to_string(),
        kind: InboundEventKind::PaymentSucceeded(notice),
    };
    assert_eq!(h.router.handle_inbound(event).await.unwrap(), WebhookDisposition::Handled);
    assert_eq!(confirmations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn voided_payments_cancel_unpaid_orders() {
    let h = harness().await;
    let cancellations = subscribe_counter(&h.bus, TOPIC_ORDER_CANCELLED);
    let order = h.db.insert_order(NewOrder::new(MinorUnits::from(12_000))).await.unwrap();
    h.db.insert_payment(NewPayment::new(order.id, "pi_void_1", MinorUnits::from(12_000))).await.unwrap();

    let event = InboundEvent {
        event_id: "evt_void_1".to_string(),
        gateway: "stripe-like".to_string(),
        event_type: "payment.canceled".to_string(),
        kind: InboundEventKind::PaymentCancelled(PaymentNotice {
            gateway_payment_ref: "pi_void_1".to_string(),
            order_id: Some(order.id),
            amount: MinorUnits::from(12_000),
            currency: "GBP".to_string(),
            failure_reason: None,
        }),
    };
    assert_eq!(h.router.handle_inbound(event).await.unwrap(), WebhookDisposition::Handled);
    let activity = h.db.order_with_activity(order.id).await.unwrap().expect("order activity");
    assert_eq!(activity.order.status, OrderStatus::Cancelled);
    assert_eq!(activity.payments[0].status, PaymentStatus::Voided);
    assert_eq!(cancellations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dedup_markers_expire_and_can_be_purged() {
    let h = harness().await;
    // A zero TTL expires immediately; the marker no longer blocks redelivery and the purge removes it.
    assert!(h.db.mark_processed("evt_ttl", "stripe-like", "noop", chrono::Duration::seconds(0)).await.unwrap());
    assert!(!h.db.is_processed("evt_ttl").await.unwrap());
    assert_eq!(h.db.purge_expired().await.unwrap(), 1);

    assert!(h.db.mark_processed("evt_keep", "stripe-like", "noop", chrono::Duration::hours(48)).await.unwrap());
    assert!(h.db.is_processed("evt_keep").await.unwrap());
    // Marking again under the same id reports the lost race instead of failing.
    assert!(!h.db.mark_processed("evt_keep", "stripe-like", "noop", chrono::Duration::hours(48)).await.unwrap());
    assert_eq!(h.db.purge_expired().await.unwrap(), 0);
}
