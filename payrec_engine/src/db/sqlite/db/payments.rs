use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPayment, Payment, PaymentStatus},
    traits::LedgerError,
};

pub async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, LedgerError> {
    let reference = payment.gateway_payment_ref.clone();
    let payment = sqlx::query_as(
        r#"
            INSERT INTO payments (order_id, gateway_payment_ref, amount, currency, status, captured_at)
            VALUES ($1, $2, $3, $4, $5, CASE WHEN $5 = 'Succeeded' THEN CURRENT_TIMESTAMP END)
            RETURNING *;
        "#,
    )
    .bind(payment.order_id)
    .bind(payment.gateway_payment_ref)
    .bind(payment.amount)
    .bind(payment.currency)
    .bind(payment.status.to_string())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            LedgerError::Conflict(format!("A payment with gateway reference [{reference}] is already recorded"))
        },
        _ => LedgerError::from(e),
    })?;
    Ok(payment)
}

pub async fn fetch_payment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE gateway_payment_ref = $1")
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn fetch_payments_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

/// The payment that refunds for this order draw from: the first one still holding funds.
pub(crate) async fn settled_payment_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as(
        "SELECT * FROM payments WHERE order_id = $1 AND status IN ('Succeeded', 'PartiallyRefunded', 'Refunded') \
         ORDER BY id ASC LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

/// Writes the payment row without changing it, returning false if no payment carries the reference.
///
/// Must be the first statement of any transaction keyed on a gateway payment reference, for the same reason
/// as [`orders::touch_order`](super::orders::touch_order).
pub(crate) async fn touch_payment_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE payments SET updated_at = updated_at WHERE gateway_payment_ref = $1")
        .bind(reference)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn update_payment_status(
    id: i64,
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Payment, LedgerError> {
    let payment: Option<Payment> = sqlx::query_as(
        "UPDATE payments SET status = $1, updated_at = CURRENT_TIMESTAMP, captured_at = CASE WHEN $1 = 'Succeeded' \
         THEN COALESCE(captured_at, CURRENT_TIMESTAMP) ELSE captured_at END WHERE id = $2 RETURNING *",
    )
    .bind(status.to_string())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    payment.ok_or_else(|| LedgerError::DatabaseError(format!("Payment #{id} vanished during a status update")))
}

/// Re-derives the payment's refund standing from its settled refund total.
///
/// A fully refunded payment moves to `Refunded`, a partially refunded one to `PartiallyRefunded`. Statuses
/// that do not hold funds are left alone.
pub(crate) async fn recompute_refund_bookkeeping(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Payment, LedgerError> {
    let payment = fetch_payment(payment_id, &mut *conn)
        .await?
        .ok_or_else(|| LedgerError::DatabaseError(format!("Payment #{payment_id} vanished during bookkeeping")))?;
    if !payment.status.holds_funds() {
        return Ok(payment);
    }
    let refunded: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1 AND status = 'Succeeded'",
    )
    .bind(payment_id)
    .fetch_one(&mut *conn)
    .await?;
    trace!("💳️ Payment #{payment_id} of {} has {refunded} settled in refunds", payment.amount);
    let target = if refunded > 0 && refunded >= payment.amount.value() {
        PaymentStatus::Refunded
    } else if refunded > 0 {
        PaymentStatus::PartiallyRefunded
    } else {
        return Ok(payment);
    };
    if payment.status == target {
        return Ok(payment);
    }
    update_payment_status(payment_id, target, conn).await
}
