use chrono::Duration;
use log::trace;
use payrec_common::MinorUnits;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{orders, payments};
use crate::{
    db_types::{NewRefundRequest, Payment, Refund, RefundEvent, RefundStatus},
    pre_api::refund_objects::{Pagination, RefundQueryFilter},
    traits::{CallbackOutcome, LedgerError},
};

/// The amount currently reserved against a payment: every refund that is pending, in flight, or settled.
pub(crate) async fn reserved_total(payment_id: i64, conn: &mut SqliteConnection) -> Result<MinorUnits, sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1 AND status IN ('Pending', 'Processing', \
         'Succeeded')",
    )
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    Ok(MinorUnits::from(total))
}

pub(crate) async fn insert_refund(
    req: &NewRefundRequest,
    payment: &Payment,
    amount: MinorUnits,
    conn: &mut SqliteConnection,
) -> Result<Refund, LedgerError> {
    let refund = sqlx::query_as(
        r#"
            INSERT INTO refunds (payment_id, order_id, amount, currency, status, reason, notes, requested_by)
            VALUES ($1, $2, $3, $4, 'Pending', $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(payment.id)
    .bind(req.order_id)
    .bind(amount)
    .bind(payment.currency.clone())
    .bind(req.reason.clone())
    .bind(req.notes.clone())
    .bind(req.requested_by.clone())
    .fetch_one(conn)
    .await?;
    Ok(refund)
}

/// Records a refund the gateway created on its own, already settled.
pub(crate) async fn insert_settled_external(
    reference: &str,
    payment: &Payment,
    amount: MinorUnits,
    currency: &str,
    conn: &mut SqliteConnection,
) -> Result<Refund, LedgerError> {
    let refund = sqlx::query_as(
        r#"
            INSERT INTO refunds
                (payment_id, order_id, amount, currency, status, gateway_refund_ref, reason, requested_by,
                 processed_at, settled_at)
            VALUES ($1, $2, $3, $4, 'Succeeded', $5, 'Issued by the gateway', 'gateway',
                 CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            RETURNING *;
        "#,
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(amount)
    .bind(currency)
    .bind(reference)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            LedgerError::Conflict(format!("A refund with gateway reference [{reference}] is already recorded"))
        },
        _ => LedgerError::from(e),
    })?;
    Ok(refund)
}

pub async fn fetch_refund(id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as("SELECT * FROM refunds WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(refund)
}

pub async fn fetch_refund_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as("SELECT * FROM refunds WHERE gateway_refund_ref = $1")
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(refund)
}

pub async fn fetch_refunds_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    let refunds = sqlx::query_as("SELECT * FROM refunds WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

/// Writes the refund row without changing it, returning false if the refund does not exist.
///
/// Must be the first statement of any transaction that transitions the refund, so that concurrent webhook
/// deliveries and reconciliation sweeps for the same refund serialize instead of both acting on a stale read.
pub(crate) async fn touch_refund(id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE refunds SET updated_at = updated_at WHERE id = $1").bind(id).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn touch_refund_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE refunds SET updated_at = updated_at WHERE gateway_refund_ref = $1")
        .bind(reference)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_gateway_reference(
    refund_id: i64,
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE refunds SET gateway_refund_ref = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(reference)
        .bind(refund_id)
        .execute(conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(err) if err.is_unique_violation() => LedgerError::Conflict(format!(
                "Gateway reference [{reference}] already belongs to another refund"
            )),
            _ => LedgerError::from(e),
        })?;
    Ok(())
}

/// Moves a refund to `new_status`, stamping the columns that status owns. `note` carries the failure reason
/// for `Failed` and the canceller for `Cancelled`.
///
/// This is mechanical; transition legality is the caller's job (see [`apply_transition`]).
pub(crate) async fn transition(
    refund_id: i64,
    new_status: RefundStatus,
    note: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Refund, LedgerError> {
    let query = match new_status {
        RefundStatus::Pending => sqlx::query_as(
            "UPDATE refunds SET status = 'Pending', retry_count = retry_count + 1, failure_reason = NULL, \
             updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *",
        )
        .bind(refund_id),
        RefundStatus::Processing => sqlx::query_as(
            "UPDATE refunds SET status = 'Processing', processed_at = COALESCE(processed_at, CURRENT_TIMESTAMP), \
             updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *",
        )
        .bind(refund_id),
        RefundStatus::Succeeded => sqlx::query_as(
            "UPDATE refunds SET status = 'Succeeded', processed_at = COALESCE(processed_at, CURRENT_TIMESTAMP), \
             settled_at = COALESCE(settled_at, CURRENT_TIMESTAMP), updated_at = CURRENT_TIMESTAMP \
             WHERE id = $1 RETURNING *",
        )
        .bind(refund_id),
        RefundStatus::Failed => sqlx::query_as(
            "UPDATE refunds SET status = 'Failed', failure_reason = $1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = $2 RETURNING *",
        )
        .bind(note.map(str::to_string))
        .bind(refund_id),
        RefundStatus::Cancelled => sqlx::query_as(
            "UPDATE refunds SET status = 'Cancelled', cancelled_by = $1, cancelled_at = CURRENT_TIMESTAMP, \
             updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
        )
        .bind(note.map(str::to_string))
        .bind(refund_id),
    };
    let refund: Option<Refund> = query.fetch_optional(conn).await?;
    refund.ok_or(LedgerError::RefundNotFound(refund_id))
}

/// The shared tail of every refund state change: legality check, stamped status update, journal entry, and
/// settlement bookkeeping when the refund lands in `Succeeded`. Runs on the caller's transaction; the caller
/// must already hold the write lock (see [`touch_refund`]).
///
/// Reporting the status the refund already has is a no-op, returned with `changed == false`.
pub(crate) async fn apply_transition(
    refund: &Refund,
    new_status: RefundStatus,
    note: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<CallbackOutcome, LedgerError> {
    let previous = refund.status;
    if previous == new_status {
        trace!("💸️ Refund #{} is already {new_status}. No action to take", refund.id);
        return Ok(CallbackOutcome { refund: refund.clone(), previous, changed: false, order: None });
    }
    if !previous.can_transition_to(new_status) {
        return Err(LedgerError::Conflict(format!(
            "Refund #{} cannot move from {previous} to {new_status}",
            refund.id
        )));
    }
    let updated = transition(refund.id, new_status, note, &mut *conn).await?;
    add_event(refund.id, Some(previous), new_status, note, &mut *conn).await?;
    let mut order = None;
    if new_status == RefundStatus::Succeeded {
        payments::recompute_refund_bookkeeping(refund.payment_id, &mut *conn).await?;
        order = orders::recompute_settlement(refund.order_id, conn).await?;
    }
    Ok(CallbackOutcome { refund: updated, previous, changed: true, order })
}

pub(crate) async fn add_event(
    refund_id: i64,
    old_status: Option<RefundStatus>,
    new_status: RefundStatus,
    note: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO refund_events (refund_id, old_status, new_status, note) VALUES ($1, $2, $3, $4)")
        .bind(refund_id)
        .bind(old_status.map(|s| s.to_string()))
        .bind(new_status.to_string())
        .bind(note.map(str::to_string))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn history(refund_id: i64, conn: &mut SqliteConnection) -> Result<Vec<RefundEvent>, sqlx::Error> {
    let events = sqlx::query_as("SELECT * FROM refund_events WHERE refund_id = $1 ORDER BY id ASC")
        .bind(refund_id)
        .fetch_all(conn)
        .await?;
    Ok(events)
}

/// Refunds that have sat in `Pending` or `Processing` beyond `stale_after`, oldest first. Refunds that never
/// reached the gateway have no `processed_at`, so age is measured from whichever of submission and creation
/// happened.
pub(crate) async fn fetch_stale(stale_after: Duration, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    let refunds = sqlx::query_as(
        format!(
            "SELECT * FROM refunds WHERE status IN ('Pending', 'Processing') AND \
             (unixepoch(CURRENT_TIMESTAMP) - unixepoch(COALESCE(processed_at, created_at))) > {} \
             ORDER BY created_at ASC;",
            stale_after.num_seconds()
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    Ok(refunds)
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &RefundQueryFilter) {
    if !query.is_empty() {
        builder.push(" WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id);
    }
    if let Some(payment_id) = query.payment_id {
        where_clause.push("payment_id = ");
        where_clause.push_bind_unseparated(payment_id);
    }
    if let Some(requested_by) = &query.requested_by {
        where_clause.push("requested_by = ");
        where_clause.push_bind_unseparated(requested_by.clone());
    }
    if let Some(statuses) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status_clause = statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
}

/// Fetches one page of refunds matching the filter, along with the unpaged match count.
pub(crate) async fn search(
    query: &RefundQueryFilter,
    pagination: &Pagination,
    conn: &mut SqliteConnection,
) -> Result<(Vec<Refund>, i64), sqlx::Error> {
    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM refunds");
    push_filters(&mut count_builder, query);
    let total: i64 = count_builder.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut builder = QueryBuilder::new("SELECT * FROM refunds");
    push_filters(&mut builder, query);
    builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    builder.push_bind(i64::from(pagination.limit));
    builder.push(" OFFSET ");
    builder.push_bind(i64::from(pagination.offset()));
    trace!("💸️ Executing query: {}", builder.sql());
    let refunds = builder.build_query_as::<Refund>().fetch_all(conn).await?;
    Ok((refunds, total))
}
