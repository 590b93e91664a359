use thiserror::Error;

use crate::{
    db_types::{Order, Refund},
    pre_api::refund_objects::{OrderActivity, PagedResult, Pagination, RefundDetail, RefundQueryFilter},
};

#[derive(Debug, Clone, Error)]
pub enum LedgerQueryError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("User error constructing query: {0}")]
    QueryError(String),
}

impl From<sqlx::Error> for LedgerQueryError {
    fn from(e: sqlx::Error) -> Self {
        LedgerQueryError::DatabaseError(e.to_string())
    }
}

/// The `LedgerManagement` trait defines the read side of the ledger.
///
/// The [`LedgerDatabase`](crate::traits::LedgerDatabase) trait handles the machinery of moving orders, payments
/// and refunds through their lifecycles. `LedgerManagement` provides methods for querying the resulting state,
/// and is all that the reporting endpoints need.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement: Clone {
    /// Fetches the order with the given id. If no order exists, `None` is returned.
    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, LedgerQueryError>;

    /// Fetches an order together with every payment and refund recorded against it.
    async fn order_with_activity(&self, order_id: i64) -> Result<Option<OrderActivity>, LedgerQueryError>;

    /// Fetches the refund with the given id. If no refund exists, `None` is returned.
    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, LedgerQueryError>;

    /// Fetches a refund together with its order, its payment, and its full status history.
    async fn refund_detail(&self, refund_id: i64) -> Result<Option<RefundDetail>, LedgerQueryError>;

    /// Searches refunds against the given filter, returning one page of results with paging metadata.
    async fn search_refunds(
        &self,
        query: RefundQueryFilter,
        pagination: Pagination,
    ) -> Result<PagedResult<Refund>, LedgerQueryError>;
}
