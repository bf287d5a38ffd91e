//! Coinbase request signing
//!
//! HMAC-SHA256 over `timestamp + METHOD + path + body`, keyed with the
//! base64-decoded API secret and returned base64-encoded. The websocket
//! user channel signs the fixed request `GET /users/self/verify`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::types::SubscribeRequest;

use super::config::CoinbaseCredentials;

type HmacSha256 = Hmac<Sha256>;

/// Method used by the websocket authentication message
pub const WS_AUTH_METHOD: &str = "GET";
/// Path used by the websocket authentication message
pub const WS_AUTH_PATH: &str = "/users/self/verify";

/// Current unix time in seconds, as sent in `CB-ACCESS-TIMESTAMP`
pub fn current_timestamp() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:03}", now.timestamp(), now.timestamp_subsec_millis())
}

/// Compute the base64 signature of one request
///
/// # Arguments
/// * `secret_b64` - API secret as handed out by the exchange (base64)
/// * `timestamp` - Value that is also sent as the request timestamp
/// * `method` - Upper-case HTTP method
/// * `path` - Request path including query string
/// * `body` - Raw request body, empty for GET
pub fn sign_request(
    secret_b64: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> ExchangeResult<String> {
    let key = BASE64.decode(secret_b64.trim()).map_err(|e| {
        ExchangeError::AuthenticationFailed(format!("API secret is not valid base64: {}", e))
    })?;
    if !timestamp.is_ascii() || !path.is_ascii() || !method.is_ascii() {
        return Err(ExchangeError::AuthenticationFailed(
            "Signed message must be ASCII".into(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExchangeError::AuthenticationFailed(format!("Invalid HMAC key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Attach `signature`, `key`, `passphrase` and `timestamp` to a subscribe request
pub fn authenticate_subscription(
    request: &mut SubscribeRequest,
    credentials: &CoinbaseCredentials,
    timestamp: String,
) -> ExchangeResult<()> {
    let signature = sign_request(
        &credentials.api_secret,
        &timestamp,
        WS_AUTH_METHOD,
        WS_AUTH_PATH,
        "",
    )?;
    request.signature = Some(signature);
    request.key = Some(credentials.api_key.clone());
    request.passphrase = Some(credentials.passphrase.clone());
    request.timestamp = Some(timestamp);
    Ok(())
}
