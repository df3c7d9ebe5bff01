//! Transport connection
//!
//! Owns the persistent WebSocket: open/close/error lifecycle, outbound framing and inbound
//! delivery. Inbound frames are handed to exactly one consumer (the router) through the
//! receiver returned by [`Transport::open`], in receipt order.
//!
//! A transport instance is single-use: it can be opened once, and once closed it stays
//! closed. [`Transport::loopback`] builds an already-open in-process transport for test
//! harnesses and embedders that bring their own wire.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::message::ClientMessage;

/// Close code for both client-initiated disconnect and server-driven session end
pub const NORMAL_CLOSURE: u16 = 1000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something to push down the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

/// Something that arrived from the wire
#[derive(Debug)]
pub enum Inbound {
    Frame(String),
    Closed { code: Option<u16>, reason: String },
    Error(TransportError),
}

#[derive(Debug)]
enum State {
    Idle,
    Opening,
    Open(mpsc::UnboundedSender<Outbound>),
    Closed,
}

/// Cloneable handle to one connection
#[derive(Debug, Clone)]
pub struct Transport {
    state: Arc<Mutex<State>>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Idle)),
        }
    }

    /// Build the connection URL: `{base}/game/{session_id}?token={token}`
    pub fn session_url(base_url: &str, session_id: &str, token: Option<&str>) -> String {
        let url = format!("{}/game/{}", base_url.trim_end_matches('/'), session_id);
        match token {
            Some(token) => format!("{}?token={}", url, token),
            None => url,
        }
    }

    /// Open the WebSocket and start pumping frames
    ///
    /// Fails with [`TransportError::AlreadyOpened`] on a second call. A failed open leaves the
    /// transport closed; no retry is attempted.
    pub async fn open(&self, url: &str) -> Result<mpsc::UnboundedReceiver<Inbound>, TransportError> {
        {
            let mut state = self.lock();
            if !matches!(*state, State::Idle) {
                return Err(TransportError::AlreadyOpened);
            }
            *state = State::Opening;
        }

        debug!("Connecting to {}", redact_token(url));
        let ws_stream = match connect_async(url).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(source) => {
                *self.lock() = State::Closed;
                warn!("Connection to {} failed: {}", redact_token(url), source);
                return Err(TransportError::Connect {
                    url: redact_token(url),
                    source,
                });
            }
        };

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(read, inbound_tx));

        let mut state = self.lock();
        if matches!(*state, State::Closed) {
            // Closed while the handshake was in flight
            let _ = outbound_tx.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: String::new(),
            });
        } else {
            *state = State::Open(outbound_tx);
        }
        info!("Connected to {}", redact_token(url));
        Ok(inbound_rx)
    }

    /// In-process transport, already open
    pub fn loopback() -> (Self, mpsc::UnboundedReceiver<Inbound>, LoopbackPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(Mutex::new(State::Open(outbound_tx))),
        };
        let peer = LoopbackPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (transport, inbound_rx, peer)
    }

    /// Queue a text frame
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        match &*self.lock() {
            State::Open(tx) => tx
                .send(Outbound::Frame(frame))
                .map_err(|_| TransportError::Closed),
            State::Idle | State::Opening => Err(TransportError::NotOpen),
            State::Closed => Err(TransportError::Closed),
        }
    }

    /// Encode and queue a protocol message
    pub fn send_message(&self, message: &ClientMessage) -> Result<(), TransportError> {
        self.send(message.encode())
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&self, code: u16, reason: &str) {
        let previous = std::mem::replace(&mut *self.lock(), State::Closed);
        if let State::Open(tx) = previous {
            info!(code, reason, "Closing connection");
            let _ = tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), State::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.lock(), State::Closed)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Far end of a [`Transport::loopback`] connection
#[derive(Debug)]
pub struct LoopbackPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl LoopbackPeer {
    /// Deliver a text frame to the client
    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Frame(frame.into())).is_ok()
    }

    /// Simulate the server closing the connection
    pub fn push_close(&self, code: u16, reason: &str) -> bool {
        self.inbound
            .send(Inbound::Closed {
                code: Some(code),
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Simulate a socket failure
    pub fn push_error(&self, error: TransportError) -> bool {
        self.inbound.send(Inbound::Error(error)).is_ok()
    }

    /// Next thing the client sent, if any is queued
    pub fn try_next_sent(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Wait for the next thing the client sends
    pub async fn next_sent(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Everything sent so far
    pub fn drain_sent(&mut self) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(outbound) = self.outbound.try_recv() {
            sent.push(outbound);
        }
        sent
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send frame: {}", e);
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                write.send(Message::Close(Some(frame))).await.ok();
                break;
            }
        }
    }
    write.close().await.ok();
    debug!("Writer stopped");
}

async fn read_loop(mut read: SplitStream<WsStream>, inbound: mpsc::UnboundedSender<Inbound>) {
    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Text(text)) => Inbound::Frame(text),
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => Inbound::Frame(text),
                Err(e) => {
                    warn!("Dropping non-UTF-8 binary frame: {}", e);
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                    None => (None, String::new()),
                };
                let _ = inbound.send(Inbound::Closed { code, reason });
                return;
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => continue,
            Err(e) => {
                let _ = inbound.send(Inbound::Error(TransportError::Socket(e.to_string())));
                return;
            }
        };
        if inbound.send(event).is_err() {
            return;
        }
    }
    let _ = inbound.send(Inbound::Closed {
        code: None,
        reason: "connection dropped".to_string(),
    });
}

/// Hide the handshake token in logs and errors
fn redact_token(url: &str) -> String {
    match url.split_once("token=") {
        Some((prefix, _)) => format!("{}token=<redacted>", prefix),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url() {
        assert_eq!(
            Transport::session_url("ws://localhost:3000", "g-1", Some("abc")),
            "ws://localhost:3000/game/g-1?token=abc"
        );
        assert_eq!(
            Transport::session_url("ws://localhost:3000/", "g-1", None),
            "ws://localhost:3000/game/g-1"
        );
    }

    #[test]
    fn test_redact_token() {
        assert_eq!(
            redact_token("ws://h/game/g?token=secret"),
            "ws://h/game/g?token=<redacted>"
        );
        assert_eq!(redact_token("ws://h/game/g"), "ws://h/game/g");
    }

    #[test]
    fn test_send_before_open_is_an_error() {
        let transport = Transport::new();
        assert!(matches!(
            transport.send("{}".to_string()),
            Err(TransportError::NotOpen)
        ));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_loopback_send_and_close() {
        let (transport, _inbound, mut peer) = Transport::loopback();
        assert!(transport.is_open());

        transport.send("hello".to_string()).unwrap();
        transport.close(NORMAL_CLOSURE, "bye");
        transport.close(NORMAL_CLOSURE, "again");

        assert_eq!(
            peer.drain_sent(),
            vec![
                Outbound::Frame("hello".to_string()),
                Outbound::Close {
                    code: NORMAL_CLOSURE,
                    reason: "bye".to_string()
                },
            ]
        );
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send("late".to_string()),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (transport, _inbound, _peer) = Transport::loopback();
        assert!(matches!(
            transport.open("ws://127.0.0.1:1").await,
            Err(TransportError::AlreadyOpened)
        ));
    }

    #[tokio::test]
    async fn test_failed_open_closes_transport() {
        let transport = Transport::new();
        // Nothing listens on port 1
        let result = transport.open("ws://127.0.0.1:1/game/g?token=t").await;
        match result {
            Err(TransportError::Connect { url, .. }) => {
                assert_eq!(url, "ws://127.0.0.1:1/game/g?token=<redacted>")
            }
            other => panic!("Expected Connect error, got {:?}", other.map(|_| ())),
        }
        assert!(transport.is_closed());
        assert!(matches!(
            transport.open("ws://127.0.0.1:1").await,
            Err(TransportError::AlreadyOpened)
        ));
    }

    #[tokio::test]
    async fn test_loopback_delivers_in_order() {
        let (_transport, mut inbound, peer) = Transport::loopback();
        peer.push_frame("one");
        peer.push_frame("two");
        peer.push_close(NORMAL_CLOSURE, "done");

        assert!(matches!(inbound.recv().await, Some(Inbound::Frame(f)) if f == "one"));
        assert!(matches!(inbound.recv().await, Some(Inbound::Frame(f)) if f == "two"));
        assert!(matches!(
            inbound.recv().await,
            Some(Inbound::Closed { code: Some(1000), .. })
        ));
    }

    async fn listen() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/game/g-1", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("hello".to_string())).await.unwrap();
            ws.send(Message::Binary(b"binary".to_vec())).await.unwrap();

            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                let done = message.is_close();
                received.push(message);
                if done {
                    break;
                }
            }
            received
        });

        let transport = Transport::new();
        let mut inbound = transport.open(&url).await.unwrap();
        assert!(transport.is_open());
        assert!(matches!(inbound.recv().await, Some(Inbound::Frame(f)) if f == "hello"));
        assert!(matches!(inbound.recv().await, Some(Inbound::Frame(f)) if f == "binary"));

        transport.send_message(&ClientMessage::Join).unwrap();
        transport.close(NORMAL_CLOSURE, "bye");

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[0],
            Message::Text(r#"{"eventType":"join"}"#.to_string())
        );
        match &received[1] {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_websocket_server_close() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(4000),
                reason: "kicked".into(),
            })))
            .await
            .unwrap();
            ws
        });

        let transport = Transport::new();
        let mut inbound = transport.open(&url).await.unwrap();
        // Keep the server socket alive until the close has been read
        let _ws = server.await.unwrap();

        match inbound.recv().await {
            Some(Inbound::Closed { code, reason }) => {
                assert_eq!(code, Some(4000));
                assert_eq!(reason, "kicked");
            }
            other => panic!("Expected Closed, got {:?}", other),
        }
    }
}
