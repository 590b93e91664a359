//! Behaviour contracts for the reconciliation engine.
//!
//! The engine core is written against these traits so that storage backends, gateway transports and
//! idempotency stores can be swapped without touching the orchestration logic:
//!
//! * [`LedgerDatabase`] is the write side of the ledger: transactional refund/payment mutations with the
//!   invariant checks built into the transaction that performs the change.
//! * [`LedgerManagement`] is the read side: order/refund lookups, joined detail models and paged searches.
//! * [`RefundGateway`] is the outbound seam to the external payment processor.
//! * [`IdempotencyStore`] deduplicates inbound webhook deliveries ("set if not exists, with TTL").

mod data_objects;
mod idempotency_store;
mod ledger_database;
mod ledger_management;
mod refund_gateway;

pub use data_objects::{
    CallbackOutcome,
    DisputeNotice,
    PaymentConfirmation,
    PaymentNotice,
    PaymentUpdate,
    ReconcileReport,
    RefundNotice,
    RefundTarget,
    WebhookDisposition,
};
pub use idempotency_store::{IdempotencyError, IdempotencyStore};
pub use ledger_database::{LedgerDatabase, LedgerError};
pub use ledger_management::{LedgerManagement, LedgerQueryError};
pub use refund_gateway::{GatewayError, GatewayRefundState, GatewayRefundStatus, RefundGateway, RefundSubmission};
