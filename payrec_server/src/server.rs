use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use gateway_tools::GatewayApi;
use payrec_engine::{
    events::{EventBus, InProcessEventBus},
    LedgerApi,
    RefundFlowApi,
    SqliteDatabase,
    WebhookRouter,
};

use crate::{
    config::{ProxyOptions, ServerConfig, WebhookSecret},
    errors::ServerError,
    integrations::LiveGateway,
    reconcile_worker::start_reconcile_worker,
    routes::{
        dead_letters,
        health,
        replay_events,
        CancelRefundRoute,
        CreateRefundRoute,
        RefundByIdRoute,
        RetryRefundRoute,
        SearchRefundsRoute,
    },
    subscribers::{subscribe_cache_invalidator, subscribe_notifier, LoggingCacheInvalidator},
    webhook_routes::GatewayWebhookRoute,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let api = GatewayApi::new(config.gateway.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = LiveGateway::new(api);
    let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new(config.event_failure_mode));
    subscribe_cache_invalidator(bus.as_ref(), Arc::new(LoggingCacheInvalidator));
    subscribe_notifier(bus.as_ref());
    let _reconcile_worker = start_reconcile_worker(
        db.clone(),
        gateway.clone(),
        Arc::clone(&bus),
        config.reconcile_interval,
        config.refund_stale_after,
        config.max_refund_retries,
    );
    let srv = create_server_instance(config, db, gateway, bus)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateway: LiveGateway,
    bus: Arc<dyn EventBus>,
) -> Result<Server, ServerError> {
    let options = ProxyOptions::from_config(&config);
    let webhook_secret = WebhookSecret(config.gateway.webhook_secret.clone());
    let webhook_event_ttl = config.webhook_event_ttl;
    let max_retries = config.max_refund_retries;
    let srv = HttpServer::new(move || {
        let flow =
            Arc::new(RefundFlowApi::new(db.clone(), gateway.clone(), Arc::clone(&bus)).with_max_retries(max_retries));
        let router = WebhookRouter::new(Arc::clone(&flow), db.clone()).with_ttl(webhook_event_ttl);
        let ledger = LedgerApi::new(db.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("prc::access_log"))
            .app_data(web::Data::from(Arc::clone(&flow)))
            .app_data(web::Data::new(router))
            .app_data(web::Data::new(ledger))
            .app_data(web::Data::from(Arc::clone(&bus)))
            .app_data(web::Data::new(webhook_secret.clone()))
            .app_data(web::Data::new(options))
            .service(health)
            .service(dead_letters)
            .service(replay_events)
            .service(CreateRefundRoute::<SqliteDatabase, LiveGateway>::new())
            .service(SearchRefundsRoute::<SqliteDatabase>::new())
            .service(RefundByIdRoute::<SqliteDatabase>::new())
            .service(CancelRefundRoute::<SqliteDatabase, LiveGateway>::new())
            .service(RetryRefundRoute::<SqliteDatabase, LiveGateway>::new())
            .service(GatewayWebhookRoute::<SqliteDatabase, LiveGateway, SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
