use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use payrec_engine::{LedgerError, LedgerQueryError, WebhookApiError};
use serde::Serialize;
use thiserror::Error;

/// One field that failed request validation, as reported in the response body.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("The request did not pass validation")]
    ValidationFailed(Vec<FieldError>),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Ledger error. {0}")]
    LedgerError(#[from] LedgerError),
    #[error("Ledger query error. {0}")]
    QueryError(#[from] LedgerQueryError),
    #[error("The webhook signature was missing or invalid. {0}")]
    WebhookVerificationError(String),
    #[error("Webhook processing error. {0}")]
    WebhookError(#[from] WebhookApiError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ServerError {
    /// The machine-readable error code carried alongside the human-readable message.
    fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::InvalidRequestBody(_) => "invalid_request",
            Self::QueryError(LedgerQueryError::QueryError(_)) => "invalid_request",
            Self::WebhookVerificationError(_) => "webhook_verification",
            Self::NoRecordFound(_) => "not_found",
            Self::LedgerError(e) => ledger_error_code(e),
            _ => "internal",
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::WebhookVerificationError(_) => StatusCode::BAD_REQUEST,
            Self::QueryError(LedgerQueryError::QueryError(_)) => StatusCode::BAD_REQUEST,
            Self::QueryError(LedgerQueryError::DatabaseError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::LedgerError(e) => ledger_status_code(e),
            // Always retryable. The router has already acknowledged the failures redelivery cannot fix.
            Self::WebhookError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = serde_json::json!({ "code": self.code(), "error": self.to_string() });
        if let Self::ValidationFailed(fields) = self {
            body["fields"] = serde_json::json!(fields);
        }
        HttpResponse::build(self.status_code()).insert_header(ContentType::json()).body(body.to_string())
    }
}

fn ledger_status_code(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::OrderNotFound(_) |
        LedgerError::RefundNotFound(_) |
        LedgerError::PaymentNotFound(_) |
        LedgerError::RefundReferenceUnknown(_) => StatusCode::NOT_FOUND,
        LedgerError::NotEligible(_) | LedgerError::AmountExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::Gateway(_) => StatusCode::BAD_GATEWAY,
        LedgerError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_error_code(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::OrderNotFound(_) |
        LedgerError::RefundNotFound(_) |
        LedgerError::PaymentNotFound(_) |
        LedgerError::RefundReferenceUnknown(_) => "not_found",
        LedgerError::NotEligible(_) => "not_eligible",
        LedgerError::AmountExceeded { .. } => "amount_exceeded",
        LedgerError::Conflict(_) => "conflict",
        LedgerError::Gateway(_) => "gateway_error",
        LedgerError::DatabaseError(_) => "internal",
    }
}
