//! Exchange adapter error types
//!
//! All exchange-related errors (websocket, REST, ranking feed) are wrapped in
//! the ExchangeError enum which implements thiserror for consistent handling.

use thiserror::Error;

/// Exchange-specific error types for adapter operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection to the exchange failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credentials are missing or cannot be used for signing
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Invalid or unexpected response from the exchange
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Order was refused by the exchange
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol error (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(Box::new(err))
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
