//! Local streaming server for integration tests.
//!
//! Accepts WebSocket connections on `127.0.0.1:0`, acknowledges the
//! `connect` handshake (or closes, or stays silent), records every client
//! frame, and answers `sub` frames through a scripted responder.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use history_exporter::infrastructure::stream::ClientFrame;
use history_exporter::{ConnectionConfig, StreamConnection};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Server reaction to one client frame.
pub enum Reply {
    /// Send a text frame.
    Text(String),
    /// Send a close frame and drop the connection.
    Close,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

type Responder = Arc<dyn Fn(&ClientFrame) -> Vec<Reply> + Send + Sync>;

/// Server reaction to the `connect` frame.
#[derive(Debug, Clone, Copy)]
enum Handshake {
    Ack,
    Close,
    Silent,
}

pub struct TestServer {
    pub url: String,
    dials: Arc<AtomicUsize>,
    frames: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Start a server answering frames with `responder`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&ClientFrame) -> Vec<Reply> + Send + Sync + 'static,
    {
        Self::start_with(Handshake::Ack, Arc::new(responder)).await
    }

    /// Start a server that closes instead of acknowledging the handshake.
    pub async fn rejecting_handshake() -> Self {
        Self::start_with(Handshake::Close, Arc::new(|_: &ClientFrame| Vec::new())).await
    }

    /// Start a server that reads the handshake and never answers it.
    pub async fn silent_handshake() -> Self {
        Self::start_with(Handshake::Silent, Arc::new(|_: &ClientFrame| Vec::new())).await
    }

    async fn start_with(handshake: Handshake, responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dials = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(Mutex::new(Vec::new()));

        let accept_dials = Arc::clone(&dials);
        let accept_frames = Arc::clone(&frames);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_dials.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    handshake,
                    Arc::clone(&responder),
                    Arc::clone(&accept_frames),
                ));
            }
        });

        Self {
            url: format!("ws://{addr}"),
            dials,
            frames,
        }
    }

    /// TCP connections accepted so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Text frames received so far, in order.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Wait until a frame equal to `expected` has been received.
    pub async fn wait_for_frame(&self, expected: &str) -> bool {
        for _ in 0..200 {
            if self.frames.lock().iter().any(|f| f == expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// A connection to this server with short timeouts.
    pub fn connection(&self) -> (Arc<StreamConnection>, CancellationToken) {
        self.connection_with_timeout(Duration::from_secs(2))
    }

    /// A connection to this server with the given connect timeout.
    pub fn connection_with_timeout(
        &self,
        connect_timeout: Duration,
    ) -> (Arc<StreamConnection>, CancellationToken) {
        let mut config = ConnectionConfig::new(self.url.clone());
        config.connect_timeout = connect_timeout;
        let cancel = CancellationToken::new();
        let connection = Arc::new(StreamConnection::new(config, &cancel));
        (connection, cancel)
    }
}

async fn serve(
    stream: TcpStream,
    handshake: Handshake,
    responder: Responder,
    frames: Arc<Mutex<Vec<String>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();

    match rx.next().await {
        Some(Ok(Message::Text(text))) => frames.lock().push(text.to_string()),
        _ => return,
    }

    match handshake {
        Handshake::Ack => {}
        Handshake::Close => {
            let _ = tx.send(Message::Close(None)).await;
            return;
        }
        Handshake::Silent => {
            while let Some(Ok(_)) = rx.next().await {}
            return;
        }
    }

    if tx.send(Message::text("connected")).await.is_err() {
        return;
    }

    while let Some(Ok(msg)) = rx.next().await {
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        frames.lock().push(text.clone());

        let Ok(frame) = ClientFrame::parse(&text) else {
            continue;
        };

        for reply in responder(&frame) {
            match reply {
                Reply::Text(text) => {
                    if tx.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                Reply::Close => {
                    let _ = tx.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }
}
