//! Shared WebSocket connection helpers
//!
//! Provides the TLS-enabled connector used by every subscription client.

use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};

use crate::adapters::errors::ExchangeError;

/// Type alias for the WebSocket stream with TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
///
/// Plain `ws://` URLs are accepted too and connect without TLS, which is what
/// local test servers use.
///
/// # Arguments
/// * `url` - WebSocket URL to connect to
///
/// # Returns
/// * `Ok(TlsWebSocketStream)` - Connected WebSocket stream
/// * `Err(ExchangeError)` - Connection or TLS error
pub async fn connect_tls(url: &str) -> Result<TlsWebSocketStream, ExchangeError> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| ExchangeError::WebSocket(Box::new(e)))?;

    Ok(ws_stream)
}

/// Check that a URL uses a websocket scheme before any connection attempt
pub fn validate_ws_url(url: &str) -> Result<(), ExchangeError> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(())
    } else {
        Err(ExchangeError::ConnectionFailed(format!(
            "Not a websocket URL: {}",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ws_url() {
        assert!(validate_ws_url("wss://ws-feed.exchange.coinbase.com").is_ok());
        assert!(validate_ws_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_ws_url("https://api.exchange.coinbase.com").is_err());
        assert!(validate_ws_url("").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_websocket_error() {
        // Port 9 (discard) is closed on test hosts
        let result = connect_tls("ws://127.0.0.1:9").await;
        assert!(matches!(result, Err(ExchangeError::WebSocket(_))));
    }
}
