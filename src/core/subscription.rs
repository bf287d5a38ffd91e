//! Reconnecting subscription client for the channel feed
//!
//! One client owns one websocket connection and runs it on its own task:
//! connect, send the subscribe handshake, forward every message to a
//! [`StreamHandler`], ping periodically, and on any unrequested close wait
//! `reconnect_interval` and start over. Only [`SubscriptionClient::close`]
//! ends the loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::adapters::coinbase::signing::{authenticate_subscription, current_timestamp};
use crate::adapters::coinbase::CoinbaseCredentials;
use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::{connect_tls, validate_ws_url, TlsWebSocketStream};
use crate::adapters::types::SubscribeRequest;
use crate::config::FeedSettings;
use crate::core::logging::{sanitize, sanitize_signature};

/// Connection state of a subscription client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Handshake sent, messages flowing
    Connected,
    /// Not started, closed, or between a drop and the next wait
    #[default]
    Disconnected,
    /// Waiting `reconnect_interval` before the next attempt
    Reconnecting,
}

/// Callbacks invoked on the connection task
///
/// Errors and panics raised by a hook are logged and swallowed; they never
/// end the connection or the reconnection loop.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn on_open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One raw text frame
    async fn on_message(&self, raw: &str) -> anyhow::Result<()>;

    async fn on_error(&self, _error: &ExchangeError) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Endpoint, subscription and timing of one client
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub url: String,
    pub products: Vec<String>,
    pub channel: String,
    /// Present for the authenticated user channel
    pub credentials: Option<CoinbaseCredentials>,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl SubscriptionConfig {
    /// Unauthenticated subscription using the feed timing settings
    pub fn new(
        url: impl Into<String>,
        products: Vec<String>,
        channel: impl Into<String>,
        feed: &FeedSettings,
    ) -> Self {
        Self {
            url: url.into(),
            products,
            channel: channel.into(),
            credentials: None,
            reconnect_interval: feed.reconnect_interval(),
            ping_interval: feed.ping_interval(),
            ping_timeout: feed.ping_timeout(),
        }
    }

    pub fn with_credentials(mut self, credentials: CoinbaseCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override timing (sub-second intervals in tests)
    pub fn with_timing(
        mut self,
        reconnect_interval: Duration,
        ping_interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        self.reconnect_interval = reconnect_interval;
        self.ping_interval = ping_interval;
        self.ping_timeout = ping_timeout;
        self
    }

    /// Build the handshake, signing it when credentials are present
    pub fn subscribe_request(&self) -> ExchangeResult<SubscribeRequest> {
        let mut request = SubscribeRequest::new(&self.products, &self.channel);
        if let Some(credentials) = &self.credentials {
            authenticate_subscription(&mut request, credentials, current_timestamp())?;
        }
        Ok(request)
    }
}

/// Why one connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Cancelled,
    ServerClosed,
    StreamError,
    PingTimeout,
}

/// Long-lived, self-healing websocket subscription
pub struct SubscriptionClient {
    config: Arc<SubscriptionConfig>,
    state: Arc<RwLock<ConnectionState>>,
    connections: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionClient {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connections: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Number of connections opened so far (first connect included)
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the connection task
    ///
    /// # Errors
    /// `ConnectionFailed` if the URL is not a websocket URL, the client was
    /// already started, or it was closed.
    pub fn start(&self, handler: Arc<dyn StreamHandler>) -> ExchangeResult<()> {
        validate_ws_url(&self.config.url)?;
        if self.cancel.is_cancelled() {
            return Err(ExchangeError::ConnectionFailed(
                "Subscription client already closed".into(),
            ));
        }

        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(ExchangeError::ConnectionFailed(
                "Subscription client already started".into(),
            ));
        }

        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let connections = Arc::clone(&self.connections);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            run_loop(config, handler, state, connections, cancel).await;
        }));

        tracing::info!(
            url = %self.config.url,
            channel = %self.config.channel,
            products = ?self.config.products,
            "Subscription client started"
        );
        Ok(())
    }

    /// Stop reconnecting and close the active connection; idempotent
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(channel = %self.config.channel, "Closing subscription client");
            self.cancel.cancel();
        }
    }

    /// Close and wait for the connection task to finish
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Subscription task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Await a hook, logging its error or panic
async fn invoke<F>(hook: &'static str, channel: &str, fut: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(hook, channel = %channel, error = %e, "Stream handler failed");
        }
        Err(_) => {
            tracing::error!(hook, channel = %channel, "Stream handler panicked");
        }
    }
}

async fn run_loop(
    config: Arc<SubscriptionConfig>,
    handler: Arc<dyn StreamHandler>,
    state: Arc<RwLock<ConnectionState>>,
    connections: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let channel = config.channel.as_str();

    loop {
        let connect = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_tls(&config.url) => result,
        };

        match connect {
            Ok(ws) => {
                connections.fetch_add(1, Ordering::SeqCst);
                *state.write() = ConnectionState::Connected;
                tracing::info!(url = %config.url, channel = %channel, "Websocket connected");

                let reason = serve_connection(ws, &config, handler.as_ref(), &cancel).await;

                *state.write() = ConnectionState::Disconnected;
                tracing::info!(channel = %channel, reason = ?reason, "Websocket disconnected");
                invoke("on_close", channel, handler.on_close()).await;
            }
            Err(e) => {
                tracing::warn!(url = %config.url, channel = %channel, error = %e, "Websocket connect failed");
                invoke("on_error", channel, handler.on_error(&e)).await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        *state.write() = ConnectionState::Reconnecting;
        tracing::info!(
            channel = %channel,
            retry_in_s = config.reconnect_interval.as_secs_f64(),
            "Reconnecting after interval"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_interval) => {}
        }
    }

    *state.write() = ConnectionState::Disconnected;
    tracing::debug!(channel = %channel, "Subscription loop ended");
}

/// Run one connection until it drops, goes silent, or is cancelled
async fn serve_connection(
    ws: TlsWebSocketStream,
    config: &SubscriptionConfig,
    handler: &dyn StreamHandler,
    cancel: &CancellationToken,
) -> Disconnect {
    let channel = config.channel.as_str();
    let (mut sink, mut stream) = ws.split();

    match config.subscribe_request() {
        Ok(request) => {
            if let Some(key) = &request.key {
                tracing::debug!(
                    key = %sanitize(key),
                    signature = %sanitize_signature(request.signature.as_deref().unwrap_or_default()),
                    "Authenticated subscription"
                );
            }
            match serde_json::to_string(&request) {
                Ok(payload) => {
                    if let Err(e) = sink.send(Message::Text(payload)).await {
                        tracing::error!(channel = %channel, error = %e, "Failed to send subscribe request");
                    }
                }
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "Failed to encode subscribe request");
                }
            }
        }
        Err(e) => {
            tracing::error!(channel = %channel, error = %e, "Failed to build subscribe request");
        }
    }

    invoke("on_open", channel, handler.on_open()).await;

    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        // Frames already queued (a pong delayed by a slow hook) win over an expired deadline
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Disconnect::Cancelled;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    invoke("on_message", channel, handler.on_message(&text)).await;
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => invoke("on_message", channel, handler.on_message(&text)).await,
                    Err(_) => tracing::trace!(channel = %channel, "Ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                    tracing::trace!(channel = %channel, "PONG received");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(channel = %channel, frame = ?frame, "Websocket closed by server");
                    return Disconnect::ServerClosed;
                }
                Some(Err(e)) => {
                    let err = ExchangeError::from(e);
                    tracing::warn!(channel = %channel, error = %err, "Websocket read error");
                    invoke("on_error", channel, handler.on_error(&err)).await;
                    return Disconnect::StreamError;
                }
                None => return Disconnect::ServerClosed,
            },
            _ = ping.tick() => {
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + config.ping_timeout);
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    let err = ExchangeError::from(e);
                    tracing::warn!(channel = %channel, error = %err, "Failed to send ping");
                    invoke("on_error", channel, handler.on_error(&err)).await;
                    return Disconnect::StreamError;
                }
                tracing::trace!(channel = %channel, "PING sent");
            }
            _ = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let timeout_ms = config.ping_timeout.as_millis() as u64;
                tracing::warn!(channel = %channel, timeout_ms, "PONG not received, connection considered dead");
                let err = ExchangeError::NetworkTimeout(timeout_ms);
                invoke("on_error", channel, handler.on_error(&err)).await;
                return Disconnect::PingTimeout;
            }
        }
    }
}
