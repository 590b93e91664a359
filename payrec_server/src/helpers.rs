use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use log::{debug, trace};
use regex::Regex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Calculates the base64-encoded HMAC-SHA256 signature of `data` under `secret`. This is the scheme the
/// gateway uses to sign webhook deliveries.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}

/// Verifies a base64-encoded HMAC-SHA256 signature over `data`. The comparison is constant-time; an
/// undecodable signature simply fails verification.
pub fn verify_signature(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(provided) = base64::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(data);
    mac.verify_slice(&provided).is_ok()
}

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        result =
            req.headers().get("X-Forwarded-For").and_then(|v| v.to_str().ok()).and_then(|s| IpAddr::from_str(s).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        let re = Regex::new(r#"for=(?P<ip>[^;]+)"#).unwrap();
        result = req
            .headers()
            .get("Forwarded")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| re.captures(v))
            .and_then(|caps| caps.name("ip"))
            .map(|m| m.as_str())
            .and_then(|s| IpAddr::from_str(s).ok());
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.connection_info().peer_addr().map(|a| a.to_string());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr.and_then(|s| IpAddr::from_str(&s).ok())
    })
}

#[cfg(test)]
mod test {
    use super::{calculate_hmac, verify_signature};

    #[test]
    fn signatures_round_trip() {
        let secret = "whsec_sample";
        let body = br#"{"id":"evt_1","type":"refund.updated"}"#;
        let sig = calculate_hmac(secret, body);
        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = "whsec_sample";
        let sig = calculate_hmac(secret, b"original body");
        assert!(!verify_signature(secret, b"tampered body", &sig));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let sig = calculate_hmac("secret-a", b"payload");
        assert!(!verify_signature("secret-b", b"payload", &sig));
    }

    #[test]
    fn undecodable_signature_fails_verification() {
        assert!(!verify_signature("whsec_sample", b"payload", "not base64!!"));
    }
}
