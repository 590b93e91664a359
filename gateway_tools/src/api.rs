use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::GatewayConfig,
    data_objects::{ApiErrorBody, RefundList, RefundRequest, RefundResource},
    GatewayApiError,
};

#[derive(Clone)]
pub struct GatewayApi {
    config: GatewayConfig,
    client: Arc<Client>,
}

impl GatewayApi {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let bearer = format!("Bearer {}", config.api_key.reveal());
        let val = HeaderValue::from_str(&bearer).map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<B>,
    ) -> Result<T, GatewayApiError> {
        let url = self.url(path);
        trace!("Sending REST query: {url}");
        let mut req = self.client.request(method, url);
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayApiError::Timeout
            } else {
                GatewayApiError::RestResponseError(e.to_string())
            }
        })?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| GatewayApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| GatewayApiError::RestResponseError(e.to_string()))?;
            match serde_json::from_str::<ApiErrorBody>(&message) {
                Ok(body) => Err(GatewayApiError::Refused { status, code: body.error.code, message: body.error.message }),
                Err(_) => Err(GatewayApiError::QueryError { status, message }),
            }
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}{path}", self.config.base_url, self.config.api_version)
    }

    /// Submits a refund. Resubmitting under the same idempotency key returns the refund the gateway created
    /// the first time, so this is safe to call again after a lost response.
    pub async fn create_refund(&self, request: &RefundRequest) -> Result<RefundResource, GatewayApiError> {
        debug!(
            "Submitting refund of {} {} for payment [{}] under key [{}]",
            request.amount_minor, request.currency, request.payment_reference, request.idempotency_key
        );
        let refund =
            self.rest_query::<RefundResource, &RefundRequest>(Method::POST, "/refunds", &[], Some(request)).await?;
        info!("The gateway holds refund [{}] for key [{}]: {}", refund.id, request.idempotency_key, refund.status);
        Ok(refund)
    }

    pub async fn get_refund(&self, reference: &str) -> Result<RefundResource, GatewayApiError> {
        let path = format!("/refunds/{reference}");
        debug!("Fetching refund [{reference}]");
        self.rest_query::<RefundResource, ()>(Method::GET, &path, &[], None).await
    }

    /// Looks up a refund by the idempotency key it was submitted under. `None` means the gateway has no refund
    /// for the key, i.e. the submission never arrived.
    pub async fn find_refund_by_idempotency_key(&self, key: &str) -> Result<Option<RefundResource>, GatewayApiError> {
        debug!("Looking up refund by idempotency key [{key}]");
        let list =
            self.rest_query::<RefundList, ()>(Method::GET, "/refunds", &[("idempotency_key", key)], None).await?;
        Ok(list.data.into_iter().next())
    }
}
