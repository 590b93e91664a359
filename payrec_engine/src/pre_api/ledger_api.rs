//! Read-side API over the payment ledger.

use std::fmt::Debug;

use crate::{
    db_types::{Order, Refund},
    pre_api::refund_objects::{OrderActivity, PagedResult, Pagination, RefundDetail, RefundQueryFilter},
    traits::{LedgerManagement, LedgerQueryError},
};

/// The `LedgerApi` provides a unified, read-only view of orders, payments and refunds.
pub struct LedgerApi<B> {
    db: B,
}

impl<B: Debug> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi ({:?})", self.db)
    }
}

impl<B> LedgerApi<B>
where B: LedgerManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Fetches the order with the given id. If no order exists, `None` is returned.
    pub async fn order(&self, order_id: i64) -> Result<Option<Order>, LedgerQueryError> {
        self.db.fetch_order(order_id).await
    }

    /// Fetches an order together with every payment and refund recorded against it.
    pub async fn order_activity(&self, order_id: i64) -> Result<Option<OrderActivity>, LedgerQueryError> {
        self.db.order_with_activity(order_id).await
    }

    /// Fetches the refund with the given id. If no refund exists, `None` is returned.
    pub async fn refund(&self, refund_id: i64) -> Result<Option<Refund>, LedgerQueryError> {
        self.db.fetch_refund(refund_id).await
    }

    /// Fetches a refund with its order, payment and full audit journal.
    pub async fn refund_detail(&self, refund_id: i64) -> Result<Option<RefundDetail>, LedgerQueryError> {
        self.db.refund_detail(refund_id).await
    }

    /// Searches refunds matching the filter, newest first.
    pub async fn search_refunds(
        &self,
        query: RefundQueryFilter,
        pagination: Pagination,
    ) -> Result<PagedResult<Refund>, LedgerQueryError> {
        self.db.search_refunds(query, pagination).await
    }
}
