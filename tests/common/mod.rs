//! Local websocket feed server shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// What the server does after its scripted messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Keep reading (and answering pings) until the client leaves
    Hold,
    /// Send a close frame
    Close,
    /// Stop reading, so pings go unanswered
    Silent,
}

/// Feed server on an ephemeral port
pub struct FeedServer {
    pub url: String,
    /// First text frame of each connection, i.e. the subscribe request
    pub handshakes: mpsc::UnboundedReceiver<serde_json::Value>,
}

/// Start a server that replays `script` on every connection
pub async fn spawn_feed_server(script: Vec<String>, after: AfterScript) -> FeedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let script = script.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    if let Ok(value) = serde_json::from_str(&text) {
                        let _ = tx.send(value);
                    }
                }
                for msg in script {
                    if ws.send(Message::Text(msg)).await.is_err() {
                        return;
                    }
                }
                match after {
                    AfterScript::Hold => while let Some(Ok(_)) = ws.next().await {},
                    AfterScript::Close => {
                        let _ = ws.close(None).await;
                    }
                    AfterScript::Silent => tokio::time::sleep(Duration::from_secs(30)).await,
                }
            });
        }
    });

    FeedServer {
        url: format!("ws://{}", addr),
        handshakes: rx,
    }
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
