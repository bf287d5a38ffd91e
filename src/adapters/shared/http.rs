//! Shared HTTP client builder
//!
//! One pooled reqwest client per REST adapter (exchange, ranking feed, ledger).

use std::time::Duration;

/// HTTP request timeout (seconds)
const HTTP_TIMEOUT_SECS: u64 = 10;
/// HTTP connection timeout (milliseconds), fail fast if host unreachable
const HTTP_CONNECT_TIMEOUT_MS: u64 = 3000;
/// Max idle connections per host in connection pool
const HTTP_POOL_MAX_IDLE: usize = 2;
/// How long idle connections stay in the pool (seconds)
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 60;
/// TCP keepalive interval (seconds)
const HTTP_TCP_KEEPALIVE_SECS: u64 = 30;

/// Create the HTTP client used by a REST adapter
pub fn create_http_client(service_name: &str) -> reqwest::Client {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(HTTP_TCP_KEEPALIVE_SECS))
        .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS))
        .user_agent(concat!("rebalance-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    tracing::debug!(
        phase = "init",
        service = %service_name,
        timeout_s = HTTP_TIMEOUT_SECS,
        connect_timeout_ms = HTTP_CONNECT_TIMEOUT_MS,
        "HTTP client configured"
    );
    client
}
