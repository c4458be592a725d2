use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;

use crate::core::{IcrypexError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "ICX-API-KEY";
pub const HEADER_SIGN: &str = "ICX-SIGN";
pub const HEADER_TIMESTAMP: &str = "ICX-TS";
pub const HEADER_NONCE: &str = "ICX-NONCE";

/// Nonce window the venue accepts on the WebSocket login frame.
pub const LOGIN_NONCE_WINDOW: u64 = 15_000;

/// Signs `api_key` followed by the decimal timestamp with HMAC-SHA256, base64 encoded.
pub fn sign(api_key: &str, secret_decoded: &[u8], timestamp_ms: u64) -> Result<String> {
    let message = format!("{}{}", api_key, timestamp_ms);

    let mut mac = HmacSha256::new_from_slice(secret_decoded)
        .map_err(|e| IcrypexError::Configuration(format!("invalid HMAC key: {e}")))?;
    mac.update(message.as_bytes());

    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// API key plus the secret, decoded once up front.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: Vec<u8>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: &str) -> Result<Self> {
        let secret = general_purpose::STANDARD
            .decode(api_secret.trim())
            .map_err(|e| {
                IcrypexError::Configuration(format!("API secret is not valid base64: {e}"))
            })?;

        Ok(Self {
            api_key: api_key.into(),
            secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn sign(&self, timestamp_ms: u64) -> Result<String> {
        sign(&self.api_key, &self.secret, timestamp_ms)
    }

    /// Header set for an authenticated REST call. `nonce_ms` is read separately from
    /// `timestamp_ms` by the caller.
    pub fn auth_headers(&self, timestamp_ms: u64, nonce_ms: u64) -> Result<Vec<(String, String)>> {
        let signature = self.sign(timestamp_ms)?;

        Ok(vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (HEADER_API_KEY.to_string(), self.api_key.clone()),
            (HEADER_SIGN.to_string(), signature),
            (HEADER_TIMESTAMP.to_string(), timestamp_ms.to_string()),
            (HEADER_NONCE.to_string(), nonce_ms.to_string()),
        ])
    }

    pub fn login_frame(&self, timestamp_ms: u64) -> Result<LoginFrame> {
        Ok(LoginFrame {
            pk: self.api_key.clone(),
            s: self.sign(timestamp_ms)?,
            ts: timestamp_ms,
            n: LOGIN_NONCE_WINDOW,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Payload of the `api-login` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginFrame {
    pub pk: String,
    pub s: String,
    pub ts: u64,
    pub n: u64,
}

pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("apisecret")
    const SECRET_B64: &str = "YXBpc2VjcmV0";
    const TS: u64 = 1_625_097_600_000;
    const EXPECTED_SIGNATURE: &str = "x6aAKFAY5SStPdZCMhYFVwLE2RU1lmWSZW/ng5oYQE8=";

    #[test]
    fn test_sign_matches_reference_vector() {
        let signature = sign("apikey", b"apisecret", TS).unwrap();
        assert_eq!(signature, EXPECTED_SIGNATURE);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let creds = Credentials::new("apikey", SECRET_B64).unwrap();
        assert_eq!(creds.sign(TS).unwrap(), creds.sign(TS).unwrap());
        assert_eq!(
            creds.sign(TS + 1).unwrap(),
            "nE9BrNAKDgP2a7XgTjkLbt1CAQZgNFpTUvB0EdtLJwY="
        );
    }

    #[test]
    fn test_invalid_secret_is_configuration_error() {
        let err = Credentials::new("apikey", "not base64!!").unwrap_err();
        assert!(matches!(err, IcrypexError::Configuration(_)));
    }

    #[test]
    fn test_auth_headers() {
        let creds = Credentials::new("apikey", SECRET_B64).unwrap();
        let headers = creds.auth_headers(TS, TS + 5).unwrap();

        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("Content-Type"), "application/json");
        assert_eq!(get(HEADER_API_KEY), "apikey");
        assert_eq!(get(HEADER_SIGN), EXPECTED_SIGNATURE);
        assert_eq!(get(HEADER_TIMESTAMP), "1625097600000");
        assert_eq!(get(HEADER_NONCE), "1625097600005");
    }

    #[test]
    fn test_login_frame_fields() {
        let creds = Credentials::new("apikey", SECRET_B64).unwrap();
        let frame = creds.login_frame(TS).unwrap();

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["pk"], "apikey");
        assert_eq!(json["s"], EXPECTED_SIGNATURE);
        assert_eq!(json["ts"], TS);
        assert_eq!(json["n"], 15000);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("apikey", SECRET_B64).unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("apisecret"));
    }
}
