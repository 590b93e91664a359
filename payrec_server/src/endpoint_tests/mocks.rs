use mockall::mock;
use payrec_engine::{
    db_types::{Order, Refund},
    refund_objects::{OrderActivity, PagedResult, Pagination, RefundDetail, RefundQueryFilter},
    traits::{LedgerManagement, LedgerQueryError},
};

mock! {
    pub LedgerReader {}
    impl LedgerManagement for LedgerReader {
        async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, LedgerQueryError>;
        async fn order_with_activity(&self, order_id: i64) -> Result<Option<OrderActivity>, LedgerQueryError>;
        async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, LedgerQueryError>;
        async fn refund_detail(&self, refund_id: i64) -> Result<Option<RefundDetail>, LedgerQueryError>;
        async fn search_refunds(&self, query: RefundQueryFilter, pagination: Pagination) -> Result<PagedResult<Refund>, LedgerQueryError>;
    }
    impl Clone for LedgerReader {
        fn clone(&self) -> Self;
    }
}
