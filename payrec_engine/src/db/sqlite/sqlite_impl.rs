//! `SqliteDatabase` is a concrete implementation of a payment ledger backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`]
//! module. Every mutating method opens one transaction whose first statement writes the row the method is
//! about, which serializes concurrent transitions for the same order, payment or refund on the database
//! writer lock. The invariant reads that follow (reserved refund totals, eligibility checks) therefore always
//! see the state the previous writer committed.
//!
//! [`traits`]: crate::traits
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use payrec_common::MinorUnits;
use sqlx::SqlitePool;

use super::db::{db_url, new_pool, orders, payments, refunds, webhook_events};
use crate::{
    db_types::{NewOrder, NewPayment, NewRefundRequest, Order, OrderStatus, Payment, PaymentStatus, Refund, RefundStatus},
    pre_api::refund_objects::{OrderActivity, PagedResult, Pagination, RefundDetail, RefundQueryFilter},
    traits::{
        CallbackOutcome,
        GatewayRefundState,
        GatewayRefundStatus,
        IdempotencyError,
        IdempotencyStore,
        LedgerDatabase,
        LedgerError,
        LedgerManagement,
        LedgerQueryError,
        PaymentConfirmation,
        PaymentNotice,
        PaymentUpdate,
        RefundTarget,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LedgerDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::insert_order(order, &mut conn).await?;
        debug!("🗃️ Order #{} created for {} {}", order.id, order.total_amount, order.currency);
        Ok(order)
    }

    /// Records a payment against an existing order. A payment inserted directly as `Succeeded` (a settled
    /// capture imported from the checkout flow) also moves a `New` order to `Paid`.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !orders::touch_order(payment.order_id, &mut tx).await? {
            return Err(LedgerError::OrderNotFound(payment.order_id));
        }
        let payment = payments::insert_payment(payment, &mut tx).await?;
        if payment.status == PaymentStatus::Succeeded {
            let order = orders::fetch_order(payment.order_id, &mut tx)
                .await?
                .ok_or(LedgerError::OrderNotFound(payment.order_id))?;
            if order.status == OrderStatus::New {
                orders::update_order_status(order.id, OrderStatus::Paid, &mut tx).await?;
            }
        }
        tx.commit().await?;
        debug!(
            "🗃️ Payment [{}] of {} {} recorded against order #{}",
            payment.gateway_payment_ref, payment.amount, payment.currency, payment.order_id
        );
        Ok(payment)
    }

    async fn create_pending_refund(&self, req: NewRefundRequest) -> Result<(Refund, Payment), LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !orders::touch_order(req.order_id, &mut tx).await? {
            return Err(LedgerError::OrderNotFound(req.order_id));
        }
        let order =
            orders::fetch_order(req.order_id, &mut tx).await?.ok_or(LedgerError::OrderNotFound(req.order_id))?;
        if !order.status.refundable() {
            return Err(LedgerError::NotEligible(format!(
                "Order #{} is {} and does not admit refunds",
                order.id, order.status
            )));
        }
        let payment = payments::settled_payment_for_order(order.id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::NotEligible(format!("Order #{} has no settled payment to refund", order.id)))?;
        let reserved = refunds::reserved_total(payment.id, &mut tx).await?;
        let remaining = payment.amount - reserved;
        let amount = req.amount.unwrap_or(remaining);
        if !amount.is_positive() || amount > remaining {
            return Err(LedgerError::AmountExceeded { requested: amount, remaining });
        }
        let refund = refunds::insert_refund(&req, &payment, amount, &mut tx).await?;
        refunds::add_event(refund.id, None, RefundStatus::Pending, Some(req.reason.as_str()), &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Refund #{} of {} {} recorded as Pending against payment [{}]",
            refund.id, refund.amount, refund.currency, payment.gateway_payment_ref
        );
        Ok((refund, payment))
    }

    async fn attach_gateway_result(
        &self,
        refund_id: i64,
        reference: &str,
        status: GatewayRefundStatus,
    ) -> Result<Refund, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !refunds::touch_refund(refund_id, &mut tx).await? {
            return Err(LedgerError::RefundNotFound(refund_id));
        }
        refunds::set_gateway_reference(refund_id, reference, &mut tx).await?;
        let refund =
            refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(LedgerError::RefundNotFound(refund_id))?;
        let new_status = status.as_refund_status();
        let outcome = refunds::apply_transition(&refund, new_status, None, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Refund #{refund_id} accepted by the gateway as [{reference}] and is now {new_status}");
        Ok(outcome.refund)
    }

    async fn mark_refund_failed(&self, refund_id: i64, reason: &str) -> Result<Refund, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !refunds::touch_refund(refund_id, &mut tx).await? {
            return Err(LedgerError::RefundNotFound(refund_id));
        }
        let refund =
            refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(LedgerError::RefundNotFound(refund_id))?;
        if refund.status.is_terminal() {
            debug!("🗃️ Refund #{refund_id} is already {} and stays that way", refund.status);
            return Ok(refund);
        }
        let outcome = refunds::apply_transition(&refund, RefundStatus::Failed, Some(reason), &mut tx).await?;
        tx.commit().await?;
        warn!("🗃️ Refund #{refund_id} marked as failed: {reason}");
        Ok(outcome.refund)
    }

    async fn cancel_refund(&self, refund_id: i64, cancelled_by: &str) -> Result<Refund, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !refunds::touch_refund(refund_id, &mut tx).await? {
            return Err(LedgerError::RefundNotFound(refund_id));
        }
        let refund =
            refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(LedgerError::RefundNotFound(refund_id))?;
        if refund.status != RefundStatus::Pending {
            return Err(LedgerError::Conflict(format!(
                "Refund #{refund_id} is {} and can no longer be cancelled",
                refund.status
            )));
        }
        let outcome = refunds::apply_transition(&refund, RefundStatus::Cancelled, Some(cancelled_by), &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Refund #{refund_id} cancelled by {cancelled_by}");
        Ok(outcome.refund)
    }

    async fn prepare_retry(
        &self,
        refund_id: i64,
        max_retries: i64,
        requested_by: &str,
    ) -> Result<(Refund, Payment), LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !refunds::touch_refund(refund_id, &mut tx).await? {
            return Err(LedgerError::RefundNotFound(refund_id));
        }
        let refund =
            refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(LedgerError::RefundNotFound(refund_id))?;
        if refund.status != RefundStatus::Failed {
            return Err(LedgerError::Conflict(format!(
                "Refund #{refund_id} is {}; only failed refunds can be retried",
                refund.status
            )));
        }
        if refund.retry_count >= max_retries {
            return Err(LedgerError::Conflict(format!(
                "Refund #{refund_id} has used all {max_retries} retry attempts"
            )));
        }
        let payment = payments::fetch_payment(refund.payment_id, &mut tx).await?.ok_or_else(|| {
            LedgerError::DatabaseError(format!("Refund #{refund_id} references a payment that does not exist"))
        })?;
        let reserved = refunds::reserved_total(payment.id, &mut tx).await?;
        let remaining = payment.amount - reserved;
        if refund.amount > remaining {
            return Err(LedgerError::AmountExceeded { requested: refund.amount, remaining });
        }
        let note = format!("Retry requested by {requested_by}");
        let outcome = refunds::apply_transition(&refund, RefundStatus::Pending, Some(&note), &mut tx).await?;
        tx.commit().await?;
        info!(
            "🗃️ Refund #{refund_id} is pending again for retry attempt #{}, requested by {requested_by}",
            outcome.refund.retry_count
        );
        Ok((outcome.refund, payment))
    }

    async fn apply_gateway_transition(
        &self,
        target: RefundTarget,
        state: GatewayRefundState,
    ) -> Result<CallbackOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let refund = match &target {
            RefundTarget::Id(id) => {
                if !refunds::touch_refund(*id, &mut tx).await? {
                    return Err(LedgerError::RefundNotFound(*id));
                }
                refunds::fetch_refund(*id, &mut tx).await?.ok_or(LedgerError::RefundNotFound(*id))?
            },
            RefundTarget::GatewayReference(reference) => {
                if !refunds::touch_refund_by_reference(reference, &mut tx).await? {
                    return Err(LedgerError::RefundReferenceUnknown(reference.clone()));
                }
                refunds::fetch_refund_by_reference(reference, &mut tx)
                    .await?
                    .ok_or_else(|| LedgerError::RefundReferenceUnknown(reference.clone()))?
            },
        };
        let new_status = state.status.as_refund_status();
        let note = match new_status {
            RefundStatus::Failed => state.failure_reason.as_deref(),
            RefundStatus::Cancelled => Some("gateway"),
            _ => None,
        };
        let outcome = refunds::apply_transition(&refund, new_status, note, &mut tx).await?;
        tx.commit().await?;
        if outcome.changed {
            debug!("🗃️ {target} moved from {} to {}", outcome.previous, outcome.refund.status);
        }
        Ok(outcome)
    }

    async fn record_gateway_refund(
        &self,
        reference: &str,
        payment_ref: &str,
        amount: MinorUnits,
        currency: Option<&str>,
    ) -> Result<Option<CallbackOutcome>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !payments::touch_payment_by_reference(payment_ref, &mut tx).await? {
            return Err(LedgerError::PaymentNotFound(payment_ref.to_string()));
        }
        if let Some(existing) = refunds::fetch_refund_by_reference(reference, &mut tx).await? {
            debug!("🗃️ Refund [{reference}] is already on the ledger as #{}. No action to take", existing.id);
            let previous = existing.status;
            return Ok(Some(CallbackOutcome { refund: existing, previous, changed: false, order: None }));
        }
        let payment = payments::fetch_payment_by_reference(payment_ref, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::PaymentNotFound(payment_ref.to_string()))?;
        let currency = currency.unwrap_or(payment.currency.as_str());
        if currency != payment.currency {
            warn!(
                "🗃️ Gateway-issued refund [{reference}] is denominated in {currency}, but payment [{payment_ref}] \
                 settled in {}. Left unrecorded.",
                payment.currency
            );
            return Ok(None);
        }
        let reserved = refunds::reserved_total(payment.id, &mut tx).await?;
        let remaining = payment.amount - reserved;
        if !amount.is_positive() || amount > remaining {
            warn!(
                "🗃️ Gateway-issued refund [{reference}] of {amount} {currency} does not fit the {remaining} still \
                 refundable on payment [{payment_ref}]. Left unrecorded."
            );
            return Ok(None);
        }
        let refund = refunds::insert_settled_external(reference, &payment, amount, currency, &mut tx).await?;
        refunds::add_event(refund.id, None, RefundStatus::Succeeded, Some("Issued by the gateway"), &mut tx).await?;
        payments::recompute_refund_bookkeeping(payment.id, &mut tx).await?;
        let order = orders::recompute_settlement(payment.order_id, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Gateway-issued refund [{reference}] of {amount} {currency} recorded as refund #{}", refund.id);
        Ok(Some(CallbackOutcome { refund, previous: RefundStatus::Succeeded, changed: true, order }))
    }

    async fn confirm_payment(&self, notice: PaymentNotice) -> Result<Option<PaymentConfirmation>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let known = if payments::touch_payment_by_reference(&notice.gateway_payment_ref, &mut tx).await? {
            payments::fetch_payment_by_reference(&notice.gateway_payment_ref, &mut tx).await?
        } else {
            None
        };
        let payment = match (known, notice.order_id) {
            (Some(payment), _) => payment,
            (None, Some(order_id)) => {
                if !orders::touch_order(order_id, &mut tx).await? {
                    warn!(
                        "🗃️ Payment [{}] names order #{order_id}, which is not on the ledger. Nothing to confirm",
                        notice.gateway_payment_ref
                    );
                    return Ok(None);
                }
                let new_payment = NewPayment::new(order_id, notice.gateway_payment_ref.clone(), notice.amount)
                    .with_currency(notice.currency.clone());
                payments::insert_payment(new_payment, &mut tx).await?
            },
            (None, None) => {
                warn!(
                    "🗃️ Payment [{}] is not on the ledger and the notice names no order. Nothing to confirm",
                    notice.gateway_payment_ref
                );
                return Ok(None);
            },
        };
        let (payment, changed) = match payment.status {
            PaymentStatus::Pending | PaymentStatus::Processing => {
                (payments::update_payment_status(payment.id, PaymentStatus::Succeeded, &mut tx).await?, true)
            },
            PaymentStatus::Succeeded => (payment, false),
            other => {
                warn!("🗃️ Payment [{}] is {other}; a late confirmation changes nothing", payment.gateway_payment_ref);
                (payment, false)
            },
        };
        let order =
            orders::fetch_order(payment.order_id, &mut tx).await?.ok_or(LedgerError::OrderNotFound(payment.order_id))?;
        let order = if changed && order.status == OrderStatus::New {
            orders::update_order_status(order.id, OrderStatus::Paid, &mut tx).await?
        } else {
            order
        };
        tx.commit().await?;
        if changed {
            info!(
                "🗃️ Payment [{}] of {} {} confirmed for order #{}",
                payment.gateway_payment_ref, payment.amount, payment.currency, order.id
            );
        }
        Ok(Some(PaymentConfirmation { payment, order, changed }))
    }

    async fn fail_payment(
        &self,
        payment_ref: &str,
        reason: Option<String>,
    ) -> Result<Option<PaymentUpdate>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !payments::touch_payment_by_reference(payment_ref, &mut tx).await? {
            return Ok(None);
        }
        let payment = payments::fetch_payment_by_reference(payment_ref, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::PaymentNotFound(payment_ref.to_string()))?;
        let (payment, changed) = match payment.status {
            PaymentStatus::Pending | PaymentStatus::Processing => {
                let failed = payments::update_payment_status(payment.id, PaymentStatus::Failed, &mut tx).await?;
                let detail = reason.map(|r| format!(": {r}")).unwrap_or_default();
                warn!("🗃️ Payment [{payment_ref}] failed at the gateway{detail}");
                (failed, true)
            },
            other => {
                debug!("🗃️ Payment [{payment_ref}] is {other}; the failure notice changes nothing");
                (payment, false)
            },
        };
        tx.commit().await?;
        Ok(Some(PaymentUpdate { payment, order: None, changed }))
    }

    async fn void_payment(&self, payment_ref: &str) -> Result<Option<PaymentUpdate>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        if !payments::touch_payment_by_reference(payment_ref, &mut tx).await? {
            return Ok(None);
        }
        let payment = payments::fetch_payment_by_reference(payment_ref, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::PaymentNotFound(payment_ref.to_string()))?;
        let (payment, changed) = match payment.status {
            PaymentStatus::Pending | PaymentStatus::Processing => {
                (payments::update_payment_status(payment.id, PaymentStatus::Voided, &mut tx).await?, true)
            },
            other => {
                debug!("🗃️ Payment [{payment_ref}] is {other}; the void notice changes nothing");
                (payment, false)
            },
        };
        let mut order = None;
        if changed {
            let current = orders::fetch_order(payment.order_id, &mut tx)
                .await?
                .ok_or(LedgerError::OrderNotFound(payment.order_id))?;
            let still_funded = payments::settled_payment_for_order(payment.order_id, &mut tx).await?.is_some();
            if current.status == OrderStatus::New && !still_funded {
                order = Some(orders::update_order_status(current.id, OrderStatus::Cancelled, &mut tx).await?);
            }
        }
        tx.commit().await?;
        if changed {
            info!("🗃️ Payment [{payment_ref}] voided at the gateway");
        }
        Ok(Some(PaymentUpdate { payment, order, changed }))
    }

    async fn fetch_stale_refunds(&self, stale_after: Duration) -> Result<Vec<Refund>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let stale = refunds::fetch_stale(stale_after, &mut conn).await?;
        Ok(stale)
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, LedgerQueryError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn order_with_activity(&self, order_id: i64) -> Result<Option<OrderActivity>, LedgerQueryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = orders::fetch_order(order_id, &mut conn).await? else {
            return Ok(None);
        };
        let payments = payments::fetch_payments_for_order(order_id, &mut conn).await?;
        let refunds = refunds::fetch_refunds_for_order(order_id, &mut conn).await?;
        Ok(Some(OrderActivity { order, payments, refunds }))
    }

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, LedgerQueryError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::fetch_refund(refund_id, &mut conn).await?;
        Ok(refund)
    }

    async fn refund_detail(&self, refund_id: i64) -> Result<Option<RefundDetail>, LedgerQueryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(refund) = refunds::fetch_refund(refund_id, &mut conn).await? else {
            return Ok(None);
        };
        let order = orders::fetch_order(refund.order_id, &mut conn).await?.ok_or_else(|| {
            LedgerQueryError::DatabaseError(format!("Refund #{refund_id} references a missing order"))
        })?;
        let payment = payments::fetch_payment(refund.payment_id, &mut conn).await?.ok_or_else(|| {
            LedgerQueryError::DatabaseError(format!("Refund #{refund_id} references a missing payment"))
        })?;
        let history = refunds::history(refund_id, &mut conn).await?;
        Ok(Some(RefundDetail { refund, order, payment, history }))
    }

    async fn search_refunds(
        &self,
        query: RefundQueryFilter,
        pagination: Pagination,
    ) -> Result<PagedResult<Refund>, LedgerQueryError> {
        if pagination.limit == 0 {
            return Err(LedgerQueryError::QueryError("The page size must be at least 1".to_string()));
        }
        let mut conn = self.pool.acquire().await?;
        let (refunds, total) = refunds::search(&query, &pagination, &mut conn).await?;
        Ok(PagedResult::new(refunds, &pagination, total))
    }
}

impl IdempotencyStore for SqliteDatabase {
    async fn is_processed(&self, event_id: &str) -> Result<bool, IdempotencyError> {
        let mut conn = self.pool.acquire().await?;
        let seen = webhook_events::already_processed(event_id, &mut conn).await?;
        Ok(seen)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        gateway: &str,
        event_type: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let mut conn = self.pool.acquire().await?;
        let inserted = webhook_events::mark_processed(event_id, gateway, event_type, ttl, &mut conn).await?;
        if inserted {
            trace!("📨️ Event {event_id} ({event_type}) marked as processed");
        } else {
            debug!("📨️ Event {event_id} was already marked as processed");
        }
        Ok(inserted)
    }

    async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        let mut conn = self.pool.acquire().await?;
        let purged = webhook_events::purge_expired(&mut conn).await?;
        if purged > 0 {
            debug!("📨️ Purged {purged} expired webhook event markers");
        }
        Ok(purged)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
