//! Coinbase Configuration
//!
//! Credentials and endpoints for the Coinbase Exchange websocket feed and REST API.

use std::fmt;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::core::logging::sanitize;

const PRODUCTION_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const PRODUCTION_REST_URL: &str = "https://api.exchange.coinbase.com";
const SANDBOX_WS_URL: &str = "wss://ws-feed-public.sandbox.exchange.coinbase.com";
const SANDBOX_REST_URL: &str = "https://api-public.sandbox.exchange.coinbase.com";

/// API key triple used to sign REST requests and the user-channel subscription
#[derive(Clone, PartialEq, Eq)]
pub struct CoinbaseCredentials {
    pub api_key: String,
    /// Base64 secret as issued by the exchange
    pub api_secret: String,
    pub passphrase: String,
}

impl fmt::Debug for CoinbaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinbaseCredentials")
            .field("api_key", &sanitize(&self.api_key).to_string())
            .field("api_secret", &"REDACTED")
            .field("passphrase", &"REDACTED")
            .finish()
    }
}

/// Configuration for the Coinbase connection
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    pub credentials: CoinbaseCredentials,
    /// Use production endpoints (true) or the public sandbox (false)
    pub production: bool,
    ws_url_override: Option<String>,
    rest_url_override: Option<String>,
}

impl CoinbaseConfig {
    /// Build a configuration with the default endpoints of the selected environment
    pub fn new(credentials: CoinbaseCredentials, production: bool) -> Self {
        Self {
            credentials,
            production,
            ws_url_override: None,
            rest_url_override: None,
        }
    }

    /// Override both endpoints (local test servers, proxies)
    pub fn with_urls(mut self, ws_url: impl Into<String>, rest_url: impl Into<String>) -> Self {
        self.ws_url_override = Some(ws_url.into());
        self.rest_url_override = Some(rest_url.into());
        self
    }

    /// Create configuration from environment variables
    ///
    /// Required: `COINBASE_API_KEY`, `COINBASE_API_SECRET`, `COINBASE_PASSPHRASE`.
    /// Optional: `COINBASE_PRODUCTION` (default false), `COINBASE_WS_URL`, `COINBASE_REST_URL`.
    pub fn from_env() -> ExchangeResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ExchangeError::AuthenticationFailed(format!("{} not set", name)))
        };

        let credentials = CoinbaseCredentials {
            api_key: required("COINBASE_API_KEY")?,
            api_secret: required("COINBASE_API_SECRET")?,
            passphrase: required("COINBASE_PASSPHRASE")?,
        };
        Ok(Self {
            credentials,
            production: production_from_env(),
            ws_url_override: ws_url_override_from_env(),
            rest_url_override: std::env::var("COINBASE_REST_URL").ok().filter(|v| !v.is_empty()),
        })
    }

    /// WebSocket feed URL
    pub fn ws_url(&self) -> &str {
        resolve_ws_url(self.ws_url_override.as_deref(), self.production)
    }

    /// Feed URL from `COINBASE_WS_URL` / `COINBASE_PRODUCTION` alone, for public-only streams
    pub fn public_ws_url_from_env() -> String {
        let override_url = ws_url_override_from_env();
        resolve_ws_url(override_url.as_deref(), production_from_env()).to_string()
    }

    /// REST API base URL
    pub fn rest_base_url(&self) -> &str {
        match &self.rest_url_override {
            Some(url) => url.trim_end_matches('/'),
            None if self.production => PRODUCTION_REST_URL,
            None => SANDBOX_REST_URL,
        }
    }
}

fn production_from_env() -> bool {
    std::env::var("COINBASE_PRODUCTION")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn ws_url_override_from_env() -> Option<String> {
    std::env::var("COINBASE_WS_URL").ok().filter(|v| !v.is_empty())
}

fn resolve_ws_url(override_url: Option<&str>, production: bool) -> &str {
    match override_url {
        Some(url) => url,
        None if production => PRODUCTION_WS_URL,
        None => SANDBOX_WS_URL,
    }
}
