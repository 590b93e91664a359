//----------------------------------------------   Webhooks  ----------------------------------------------------

use actix_web::{web, HttpRequest, HttpResponse};
use gateway_tools::GatewayEventEnvelope;
use log::*;
use payrec_engine::{traits::WebhookDisposition, IdempotencyStore, LedgerDatabase, RefundGateway, WebhookRouter};

use crate::{
    config::{ProxyOptions, WebhookSecret},
    data_objects::WebhookAck,
    errors::ServerError,
    helpers::{get_remote_ip, verify_signature},
    integrations::inbound_event_from_envelope,
    route,
};

/// The header carrying the base64 HMAC-SHA256 signature of the raw request body.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

route!(gateway_webhook => Post "/webhooks/{gateway}" impl LedgerDatabase, RefundGateway, IdempotencyStore);
/// Route handler for inbound gateway webhook deliveries.
///
/// The signature is verified over the raw body bytes before anything is parsed; a missing or wrong signature
/// answers 400 without touching the ledger, as does an undecodable envelope. Verified events are converted
/// into their vendor-neutral form and handed to the webhook router. Handled, duplicate and ignored events all
/// acknowledge with `{"received": true}`; a handler failure answers 500 and the gateway redelivers.
pub async fn gateway_webhook<B, G, I>(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    secret: web::Data<WebhookSecret>,
    options: web::Data<ProxyOptions>,
    router: web::Data<WebhookRouter<B, G, I>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerDatabase,
    G: RefundGateway,
    I: IdempotencyStore,
{
    let gateway = path.into_inner();
    trace!("🛒️ Received webhook delivery from {gateway}: {}", req.uri());
    let signature = req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).ok_or_else(|| {
        let ip = get_remote_ip(&req, options.use_x_forwarded_for, options.use_forwarded);
        warn!("🔐️ Webhook delivery from {ip:?} carried no {SIGNATURE_HEADER} header");
        ServerError::WebhookVerificationError("Missing signature header".to_string())
    })?;
    if !verify_signature(secret.reveal(), body.as_ref(), signature) {
        let ip = get_remote_ip(&req, options.use_x_forwarded_for, options.use_forwarded);
        warn!("🔐️ Webhook delivery from {ip:?} failed signature verification");
        return Err(ServerError::WebhookVerificationError("Invalid signature".to_string()));
    }
    let envelope = serde_json::from_slice::<GatewayEventEnvelope>(body.as_ref()).map_err(|e| {
        debug!("🛒️ Could not decode the webhook envelope. {e}");
        ServerError::InvalidRequestBody(e.to_string())
    })?;
    let event = inbound_event_from_envelope(&gateway, envelope);
    let event_id = event.event_id.clone();
    let disposition = router.handle_inbound(event).await.map_err(|e| {
        error!("🛒️ Webhook event [{event_id}] failed. {e}");
        e
    })?;
    match disposition {
        WebhookDisposition::Handled => debug!("🛒️ Webhook event [{event_id}] handled"),
        WebhookDisposition::Duplicate => debug!("🛒️ Webhook event [{event_id}] was a redelivery"),
        WebhookDisposition::Ignored => trace!("🛒️ Webhook event [{event_id}] ignored"),
    }
    Ok(HttpResponse::Ok().json(WebhookAck { received: true }))
}
