use std::env;

use chrono::Duration;
use gateway_tools::GatewayConfig;
use log::*;
use payrec_common::Secret;
use payrec_engine::{events::FailureMode, DEFAULT_MAX_REFUND_RETRIES};

const DEFAULT_PRC_HOST: &str = "127.0.0.1";
const DEFAULT_PRC_PORT: u16 = 8360;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/payrec.db";
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::seconds(300);
const DEFAULT_REFUND_STALE_AFTER: Duration = Duration::seconds(1800);
const DEFAULT_WEBHOOK_EVENT_TTL: Duration = Duration::seconds(172_800);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    /// How often the background worker reconciles stale refunds against the gateway.
    pub reconcile_interval: Duration,
    /// The age at which a PENDING or PROCESSING refund is considered stale and re-queried at the gateway.
    pub refund_stale_after: Duration,
    /// How long processed webhook event ids are retained for deduplication.
    pub webhook_event_ttl: Duration,
    /// Whether a failing event subscriber is swallowed (dead-lettered only) or surfaces to the publisher.
    pub event_failure_mode: FailureMode,
    /// The number of times a failed refund may be re-submitted before retries are refused.
    pub max_refund_retries: i64,
    /// Payment gateway REST client configuration.
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PRC_HOST.to_string(),
            port: DEFAULT_PRC_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            refund_stale_after: DEFAULT_REFUND_STALE_AFTER,
            webhook_event_ttl: DEFAULT_WEBHOOK_EVENT_TTL,
            event_failure_mode: FailureMode::default(),
            max_refund_retries: DEFAULT_MAX_REFUND_RETRIES,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PRC_HOST").ok().unwrap_or_else(|| DEFAULT_PRC_HOST.into());
        let port = env::var("PRC_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for PRC_PORT. {e} Using the default, {DEFAULT_PRC_PORT}, instead."
                    );
                    DEFAULT_PRC_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PRC_PORT);
        let database_url = env::var("PRC_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ PRC_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}, instead.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let use_x_forwarded_for =
            env::var("PRC_USE_X_FORWARDED_FOR").map(|s| &s == "1" || &s == "true").unwrap_or(false);
        let use_forwarded = env::var("PRC_USE_FORWARDED").map(|s| &s == "1" || &s == "true").unwrap_or(false);
        let reconcile_interval = duration_from_env("PRC_RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL);
        let refund_stale_after = duration_from_env("PRC_REFUND_STALE_AFTER_SECS", DEFAULT_REFUND_STALE_AFTER);
        let webhook_event_ttl = duration_from_env("PRC_WEBHOOK_EVENT_TTL_SECS", DEFAULT_WEBHOOK_EVENT_TTL);
        let event_failure_mode = env::var("PRC_EVENT_FAILURE_MODE")
            .ok()
            .and_then(|s| {
                s.parse::<FailureMode>()
                    .map_err(|e| warn!("🪛️ Invalid value for PRC_EVENT_FAILURE_MODE. {e} Using 'swallow'."))
                    .ok()
            })
            .unwrap_or_default();
        let max_refund_retries = env::var("PRC_MAX_REFUND_RETRIES")
            .ok()
            .and_then(|s| {
                s.parse::<i64>()
                    .map_err(|e| {
                        warn!(
                            "🪛️ {s} is not a valid value for PRC_MAX_REFUND_RETRIES. {e} Using the default, \
                             {DEFAULT_MAX_REFUND_RETRIES}, instead."
                        )
                    })
                    .ok()
            })
            .unwrap_or(DEFAULT_MAX_REFUND_RETRIES);
        let gateway = GatewayConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            use_x_forwarded_for,
            use_forwarded,
            reconcile_interval,
            refund_stale_after,
            webhook_event_ttl,
            event_failure_mode,
            max_refund_retries,
            gateway,
        }
    }
}

fn duration_from_env(var: &str, default: Duration) -> Duration {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {} s.", default.num_seconds()))
        .and_then(|s| {
            s.parse::<i64>()
                .map(Duration::seconds)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {var}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

//-------------------------------------------------  WebhookSecret  ----------------------------------------------------
/// The shared secret inbound webhook signatures are verified against. Wrapped so that it can live in the actix
/// app data without colliding with other string-typed state.
#[derive(Clone, Debug, Default)]
pub struct WebhookSecret(pub Secret<String>);

impl WebhookSecret {
    pub fn reveal(&self) -> &str {
        self.0.reveal()
    }
}

//-------------------------------------------------  ProxyOptions  -----------------------------------------------------
/// A subset of the server configuration that is used to configure the server's behaviour. Generally we try to keep this
/// as small as possible, and exclude secrets to avoid passing sensitive information around the system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

impl ProxyOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { use_x_forwarded_for: config.use_x_forwarded_for, use_forwarded: config.use_forwarded }
    }
}
