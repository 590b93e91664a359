use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, Order, OrderStatus},
    traits::LedgerError,
};

pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, LedgerError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (total_amount, currency) VALUES ($1, $2)
            RETURNING *;
        "#,
    )
    .bind(order.total_amount)
    .bind(order.currency)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// Writes the order row without changing it, returning false if the order does not exist.
///
/// Must be the first statement of any transaction that goes on to read refund totals for the order. The write
/// serializes concurrent transactions on the database writer lock, so every later read in the transaction sees
/// the state the previous writer committed.
pub(crate) async fn touch_order(id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE orders SET updated_at = updated_at WHERE id = $1").bind(id).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn update_order_status(
    id: i64,
    status: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, LedgerError> {
    let status = status.to_string();
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(LedgerError::OrderNotFound(id))
}

/// Re-derives the order's refund standing from the settled totals.
///
/// Compares the sum of `SUCCEEDED` refund amounts against the sum of captured payment amounts and moves the
/// order to `Refunded` or `PartiallyRefunded` accordingly. Returns `None` when nothing had to change. Orders
/// that never reached a paid state are left alone.
pub(crate) async fn recompute_settlement(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, LedgerError> {
    let order = fetch_order(order_id, &mut *conn).await?.ok_or(LedgerError::OrderNotFound(order_id))?;
    if !(order.status.refundable() || order.status == OrderStatus::Refunded) {
        return Ok(None);
    }
    let captured: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE order_id = $1 AND status IN ('Succeeded', \
         'PartiallyRefunded', 'Refunded')",
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;
    let refunded: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE order_id = $1 AND status = 'Succeeded'",
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;
    trace!("📝️ Order #{order_id} has {captured} captured and {refunded} refunded");
    let target = if refunded > 0 && refunded >= captured {
        OrderStatus::Refunded
    } else if refunded > 0 {
        OrderStatus::PartiallyRefunded
    } else {
        return Ok(None);
    };
    if order.status == target {
        return Ok(None);
    }
    let updated = update_order_status(order_id, target, conn).await?;
    Ok(Some(updated))
}
