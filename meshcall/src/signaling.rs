//! WebSocket signaling client.
//!
//! Connects to a meshcall relay, waits for the `connected` handshake that
//! carries this endpoint's id, then forwards [`ClientEvent`] requests as JSON
//! text frames and yields decoded [`ServerEvent`]s from a background reader
//! task. The client never looks inside candidate or description payloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use meshcall_proto::codec::{self, CodecError};
use meshcall_proto::signal::{ClientEvent, PeerId, ServerEvent};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the decoded-event channel between the reader task and `recv`.
const EVENT_BUFFER: usize = 256;

/// Errors from the signaling connection.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// The server URL is not a usable `ws://` or `wss://` URL.
    #[error("invalid signaling url {url}: {reason}")]
    InvalidUrl {
        /// URL as given.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Connecting or waiting for the handshake took too long.
    #[error("signaling connection timed out")]
    Timeout,

    /// The connection is closed.
    #[error("signaling connection closed")]
    ConnectionClosed,

    /// The server did not open with a `connected` event.
    #[error("signaling handshake failed: {0}")]
    Handshake(String),

    /// WebSocket-level failure.
    #[error("signaling transport error: {0}")]
    Transport(String),

    /// A request could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Client side of one signaling connection.
///
/// Created via [`SignalingClient::connect`]. Sends are serialized through a
/// shared writer; incoming events are buffered by a background reader task
/// until [`recv`](Self::recv) picks them up.
pub struct SignalingClient {
    /// Id the relay assigned to this connection.
    local_id: PeerId,
    /// Relay URL (ws:// or wss://).
    server_url: String,
    /// Write half of the WebSocket connection.
    ws_sender: Arc<Mutex<WsSender>>,
    /// Events decoded by the reader task.
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Whether the WebSocket connection is still up.
    connected: Arc<AtomicBool>,
    /// Background reader task, aborted on drop.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to the relay at `server_url` and complete the handshake.
    ///
    /// `timeout` bounds the WebSocket connect and, separately, the wait for
    /// the `connected` event.
    ///
    /// # Errors
    ///
    /// - [`SignalingError::InvalidUrl`] if the URL does not parse or is not
    ///   `ws`/`wss`.
    /// - [`SignalingError::Timeout`] if either step times out.
    /// - [`SignalingError::Handshake`] if the first frame is not `connected`.
    /// - [`SignalingError::Transport`] for WebSocket failures.
    pub async fn connect(server_url: &str, timeout: Duration) -> Result<Self, SignalingError> {
        validate_url(server_url)?;

        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(server_url))
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "signaling connect timed out");
                SignalingError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = server_url, err = %e, "signaling connect failed");
                map_ws_connect_error(e)
            })?;

        let (ws_sender, mut ws_reader) = ws_stream.split();

        let local_id = tokio::time::timeout(timeout, await_handshake(&mut ws_reader))
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "signaling handshake timed out");
                SignalingError::Timeout
            })??;
        tracing::info!(peer_id = %local_id, url = server_url, "connected to signaling server");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        Ok(Self {
            local_id,
            server_url: server_url.to_string(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            reader_handle,
        })
    }

    /// Id the relay assigned to this connection.
    pub const fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// URL this client is connected to.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Send one request as a JSON text frame.
    ///
    /// # Errors
    ///
    /// [`SignalingError::ConnectionClosed`] if the connection is down or the
    /// write fails; [`SignalingError::Codec`] if encoding fails.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::ConnectionClosed);
        }

        let text = codec::encode_client(event)?;
        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, event = event.name(), "signaling send failed");
            self.connected.store(false, Ordering::Relaxed);
            SignalingError::ConnectionClosed
        })
    }

    /// Ask to join `channel`, attaching opaque `userdata`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn join(&self, channel: &str, userdata: Value) -> Result<(), SignalingError> {
        self.send(&ClientEvent::Join {
            channel: channel.to_string(),
            userdata,
        })
        .await
    }

    /// Ask to leave `channel`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn part(&self, channel: &str) -> Result<(), SignalingError> {
        self.send(&ClientEvent::part(channel)).await
    }

    /// Next event from the server, or `None` once the connection has closed
    /// and every buffered event has been taken.
    pub async fn recv(&self) -> Option<ServerEvent> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await
    }

    /// Whether the WebSocket connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Close the connection. The relay treats this as a disconnect.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "signaling close failed");
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

fn validate_url(server_url: &str) -> Result<(), SignalingError> {
    let invalid = |reason: String| SignalingError::InvalidUrl {
        url: server_url.to_string(),
        reason,
    };
    let parsed = url::Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

/// Reads frames until the server's `connected` event and returns the id it
/// carries.
async fn await_handshake(ws_reader: &mut WsReader) -> Result<PeerId, SignalingError> {
    loop {
        match ws_reader.next().await {
            Some(Ok(Message::Text(text))) => return handshake_event(text.as_str()),
            Some(Ok(Message::Binary(data))) => {
                return handshake_event(codec::text_from_bytes(&data)?);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("signaling server closed connection during handshake");
                return Err(SignalingError::ConnectionClosed);
            }
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket error during handshake");
                return Err(SignalingError::Transport(e.to_string()));
            }
        }
    }
}

fn handshake_event(text: &str) -> Result<PeerId, SignalingError> {
    match codec::decode_server(text) {
        Ok(ServerEvent::Connected { peer_id }) => Ok(peer_id),
        Ok(other) => Err(SignalingError::Handshake(format!(
            "expected connected, got {}",
            other.name()
        ))),
        Err(e) => Err(SignalingError::Handshake(format!(
            "malformed handshake frame: {e}"
        ))),
    }
}

/// Background task that decodes server frames into `tx`.
///
/// Malformed or unknown frames are logged and skipped; the connection stays
/// up. Clears `connected` when the WebSocket closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        let decoded = match msg_result {
            Ok(Message::Text(text)) => codec::decode_server(text.as_str()),
            Ok(Message::Binary(data)) => {
                codec::text_from_bytes(&data).and_then(codec::decode_server)
            }
            Ok(Message::Close(_)) => {
                tracing::info!("signaling WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "signaling WebSocket read error");
                break;
            }
        };

        match decoded {
            Ok(event) => {
                tracing::trace!(event = event.name(), peer_id = %event.peer_id(), "received");
                if tx.send(event).await.is_err() {
                    // Client dropped.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed signaling frame, skipping");
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("signaling reader task exiting");
}

/// Map a tungstenite connect error to a [`SignalingError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> SignalingError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => SignalingError::Transport(format!(
            "signaling HTTP error: status {}",
            response.status()
        )),
        WsError::Tls(_) => SignalingError::Transport(format!("TLS error: {err}")),
        other => SignalingError::Transport(format!("signaling connection error: {other}")),
    }
}
