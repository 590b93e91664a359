mod api;
mod config;
mod error;

mod data_objects;

pub use api::GatewayApi;
pub use config::GatewayConfig;
pub use data_objects::{
    ApiError,
    ApiErrorBody,
    DisputeResource,
    GatewayEventEnvelope,
    PaymentResource,
    RefundList,
    RefundRequest,
    RefundResource,
};
pub use error::GatewayApiError;
