//! WebSocket transport and its I/O loop.
//!
//! Each [`WebSocketTransport`] spawns a tokio task that connects with the
//! `graphql-ws` sub-protocol, then forwards:
//!
//! - Incoming text frames to the [`EventSink`]
//! - Outgoing frames from the engine to the socket
//! - Close and error conditions as [`TransportEvent`]s

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::SUB_PROTOCOL;

use super::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the socket.
type WsWrite = SplitSink<WsStream, Message>;

/// Commands for the I/O loop.
#[derive(Debug)]
enum TransportCommand {
    /// Write a text frame.
    Send(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// WebSocketFactory
// ============================================================================

/// Default [`TransportFactory`]: `ws://` and `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Creates the factory.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportFactory for WebSocketFactory {
    fn open(&self, url: &str, sink: EventSink) -> Result<Box<dyn Transport>> {
        let parsed = Url::parse(url).map_err(|e| Error::invalid_endpoint(url, e.to_string()))?;

        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::invalid_endpoint(
                    url,
                    format!("unsupported scheme `{other}`, expected ws or wss"),
                ));
            }
        }

        Ok(Box::new(WebSocketTransport::connect(parsed, sink)))
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket client connection.
///
/// The handle is cheap: all I/O happens on the spawned loop task.
#[derive(Debug)]
pub struct WebSocketTransport {
    /// Shared with the I/O loop.
    state: Arc<RwLock<ReadyState>>,
    /// Channel for sending commands to the I/O loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl WebSocketTransport {
    /// Starts connecting to `url`.
    ///
    /// Must be called within a tokio runtime. Spawns the I/O loop.
    pub fn connect(url: Url, sink: EventSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ReadyState::Connecting));

        tokio::spawn(Self::run_io_loop(url, Arc::clone(&state), command_rx, sink));

        Self { state, command_tx }
    }

    /// Connects, then pumps frames until either side closes.
    async fn run_io_loop(
        url: Url,
        state: Arc<RwLock<ReadyState>>,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        sink: EventSink,
    ) {
        let connected = tokio::select! {
            result = Self::handshake(&url) => result,

            // Close requested while still connecting
            _ = Self::wait_for_close(&mut command_rx) => {
                debug!(%url, "Close requested before connect completed");
                Self::finish(&state, &sink, Some(1000), "closed while connecting");
                return;
            }
        };

        let ws_stream = match connected {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!(%url, error = %e, "WebSocket connect failed");
                *state.write() = ReadyState::Closed;
                sink.emit(TransportEvent::Error(e.to_string()));
                sink.emit(TransportEvent::Close {
                    code: None,
                    reason: e.to_string(),
                });
                return;
            }
        };

        *state.write() = ReadyState::Open;
        debug!(%url, "WebSocket open");
        sink.emit(TransportEvent::Open);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut close_code = None;
        let mut close_reason = String::new();

        loop {
            tokio::select! {
                // Incoming frames from server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Frame received");
                            sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            if let Some(frame) = frame {
                                close_code = Some(u16::from(frame.code));
                                close_reason = frame.reason.as_str().to_owned();
                            }
                            debug!(code = ?close_code, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            sink.emit(TransportEvent::Error(e.to_string()));
                            close_reason = e.to_string();
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the engine
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send(frame)) => {
                            if let Err(e) = Self::write_frame(&mut ws_write, frame).await {
                                sink.emit(TransportEvent::Error(e.to_string()));
                                close_reason = e.to_string();
                                break;
                            }
                        }

                        Some(TransportCommand::Close) | None => {
                            *state.write() = ReadyState::Closing;
                            let _ = ws_write.close().await;
                            close_code = Some(1000);
                            debug!("WebSocket closed by client");
                            break;
                        }
                    }
                }
            }
        }

        Self::finish(&state, &sink, close_code, &close_reason);
        debug!("I/O loop terminated");
    }

    /// Performs the upgrade request with the sub-protocol header.
    async fn handshake(url: &Url) -> Result<WsStream> {
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUB_PROTOCOL));

        let (ws_stream, _response) = connect_async(request).await?;
        Ok(ws_stream)
    }

    /// Resolves once a close is requested; sends are impossible before open.
    async fn wait_for_close(command_rx: &mut mpsc::UnboundedReceiver<TransportCommand>) {
        while let Some(command) = command_rx.recv().await {
            if matches!(command, TransportCommand::Close) {
                return;
            }
        }
    }

    async fn write_frame(ws_write: &mut WsWrite, frame: String) -> Result<()> {
        ws_write.send(Message::Text(frame.into())).await?;
        trace!("Frame sent");
        Ok(())
    }

    fn finish(state: &RwLock<ReadyState>, sink: &EventSink, code: Option<u16>, reason: &str) {
        *state.write() = ReadyState::Closed;
        sink.emit(TransportEvent::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.read()
    }

    fn send(&self, frame: String) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(Error::socket_unavailable(frame));
        }

        self.command_tx
            .send(TransportCommand::Send(frame))
            .map_err(|e| match e.0 {
                TransportCommand::Send(frame) => Error::socket_unavailable(frame),
                TransportCommand::Close => Error::ConnectionClosed,
            })
    }

    fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ReadyState::Closed {
                return;
            }
            *state = ReadyState::Closing;
        }
        let _ = self.command_tx.send(TransportCommand::Close);
    }
}

// ============================================================================
// Tests
// ============================================================================
