use log::*;
use payrec_common::Secret;
use rand::{distributions::Alphanumeric, Rng};

pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_version: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Hard deadline on every outbound call. A call that overruns it surfaces as
    /// [`GatewayApiError::Timeout`](crate::GatewayApiError::Timeout).
    pub timeout_ms: u64,
}

impl GatewayConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("PRC_GATEWAY_URL").unwrap_or_else(|_| {
            warn!("🪛️ PRC_GATEWAY_URL not set, using (probably useless) https://api.gateway.test");
            "https://api.gateway.test".to_string()
        });
        let api_version = std::env::var("PRC_GATEWAY_API_VERSION").unwrap_or_else(|_| "v1".to_string());
        let api_key = Secret::new(std::env::var("PRC_GATEWAY_API_KEY").unwrap_or_else(|_| {
            warn!("🪛️ PRC_GATEWAY_API_KEY not set. Outbound gateway calls will not authenticate");
            String::default()
        }));
        let webhook_secret = Secret::new(std::env::var("PRC_WEBHOOK_SECRET").unwrap_or_else(|_| {
            warn!(
                "🪛️ PRC_WEBHOOK_SECRET not set. Using a random secret; webhook signatures from the real gateway \
                 will not verify"
            );
            rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
        }));
        let timeout_ms = std::env::var("PRC_GATEWAY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_GATEWAY_TIMEOUT_MS);
        Self { base_url, api_version, api_key, webhook_secret, timeout_ms }
    }
}
