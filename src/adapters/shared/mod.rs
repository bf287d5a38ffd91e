//! Shared helpers for exchange adapters
//!
//! Common websocket and HTTP client utilities used by the feeds and REST adapters.

pub mod http;
pub mod websocket;

pub use http::create_http_client;
pub use websocket::{connect_tls, validate_ws_url, TlsWebSocketStream};
