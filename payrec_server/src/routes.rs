//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Handlers are generic over the engine traits they consume, so the endpoint tests can run them against
//! mocks. Since actix cannot register generic handlers directly, every route is declared through the
//! [`route!`] macro, which pairs the handler with its path, method and trait bounds.
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use log::*;
use payrec_engine::{
    db_types::NewRefundRequest,
    events::EventBus,
    LedgerApi,
    LedgerDatabase,
    LedgerManagement,
    RefundFlowApi,
    RefundGateway,
};

use crate::{
    data_objects::{
        validate_refund_request,
        PagedRefundsResponse,
        RefundDetailResponse,
        RefundRequestBody,
        RefundResponse,
        RefundSearchQuery,
    },
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Refunds  ----------------------------------------------------
route!(create_refund => Post "/refunds" impl LedgerDatabase, RefundGateway);
/// Route handler for creating a refund.
///
/// The body names the order and a reason, and optionally a partial amount in major units; an omitted amount
/// means "everything still refundable on the order's payment". The `X-Requested-By` header attributes the
/// refund to an operator and defaults to `"api"`. On success the new refund is returned with status 201.
pub async fn create_refund<B: LedgerDatabase, G: RefundGateway>(
    req: HttpRequest,
    body: web::Json<RefundRequestBody>,
    api: web::Data<RefundFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let body = body.into_inner();
    debug!("💻️ POST refund against order #{}", body.order_id);
    let requested_by = requested_by_header(&req);
    let amount = validate_refund_request(&body).map_err(ServerError::ValidationFailed)?;
    let mut request = NewRefundRequest::new(body.order_id, body.reason, requested_by);
    if let Some(amount) = amount {
        request = request.with_amount(amount);
    }
    if let Some(notes) = body.notes {
        request = request.with_notes(notes);
    }
    let refund = api.create_refund(request).await?;
    info!("💻️ Refund #{} created against order #{} for {}", refund.id, refund.order_id, refund.amount);
    Ok(HttpResponse::Created().json(RefundResponse::from(refund)))
}

route!(cancel_refund => Post "/refunds/{id}/cancel" impl LedgerDatabase, RefundGateway);
pub async fn cancel_refund<B: LedgerDatabase, G: RefundGateway>(
    req: HttpRequest,
    path: web::Path<i64>,
    api: web::Data<RefundFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let refund_id = path.into_inner();
    debug!("💻️ POST cancel refund #{refund_id}");
    let cancelled_by = requested_by_header(&req);
    let refund = api.cancel_refund(refund_id, &cancelled_by).await?;
    Ok(HttpResponse::Ok().json(RefundResponse::from(refund)))
}

route!(retry_refund => Post "/refunds/{id}/retry" impl LedgerDatabase, RefundGateway);
pub async fn retry_refund<B: LedgerDatabase, G: RefundGateway>(
    req: HttpRequest,
    path: web::Path<i64>,
    api: web::Data<RefundFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let refund_id = path.into_inner();
    debug!("💻️ POST retry refund #{refund_id}");
    let requested_by = requested_by_header(&req);
    let refund = api.retry_failed_refund(refund_id, &requested_by).await?;
    Ok(HttpResponse::Ok().json(RefundResponse::from(refund)))
}

route!(refund_by_id => Get "/refunds/{id}" impl LedgerManagement);
pub async fn refund_by_id<B: LedgerManagement>(
    path: web::Path<i64>,
    api: web::Data<LedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let refund_id = path.into_inner();
    debug!("💻️ GET refund #{refund_id}");
    match api.refund_detail(refund_id).await? {
        Some(detail) => Ok(HttpResponse::Ok().json(RefundDetailResponse::from(detail))),
        None => Err(ServerError::NoRecordFound(format!("Refund #{refund_id} does not exist"))),
    }
}

route!(search_refunds => Get "/refunds" impl LedgerManagement);
pub async fn search_refunds<B: LedgerManagement>(
    query: web::Query<RefundSearchQuery>,
    api: web::Data<LedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (filter, pagination) = query.into_inner().into_query().map_err(ServerError::ValidationFailed)?;
    debug!("💻️ GET refunds. {filter}");
    let result = api.search_refunds(filter, pagination).await?;
    Ok(HttpResponse::Ok().json(PagedRefundsResponse::from(result)))
}

//----------------------------------------------   Events  ----------------------------------------------------
#[get("/events/dead-letters")]
pub async fn dead_letters(bus: web::Data<dyn EventBus>) -> impl Responder {
    trace!("💻️ GET dead letters");
    HttpResponse::Ok().json(bus.dead_letters())
}

#[post("/events/replay")]
pub async fn replay_events(bus: web::Data<dyn EventBus>) -> impl Responder {
    debug!("💻️ POST replay dead letters");
    let report = bus.replay().await;
    info!("💻️ Dead letter replay complete. {} replayed, {} requeued", report.replayed, report.requeued);
    HttpResponse::Ok().json(report)
}

fn requested_by_header(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Requested-By")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("api")
        .to_string()
}
