//! Signaling server: shared state, WebSocket handler, and event dispatch.
//!
//! Every accepted WebSocket becomes one endpoint in the [`Registry`]. A
//! writer task drains the endpoint's event queue onto the socket; the reader
//! loop decodes inbound frames and dispatches them to the registry. When
//! either side ends, the endpoint is disconnected, which notifies every peer
//! it shared a channel with.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use meshcall_proto::codec::{self, MAX_FRAME_SIZE};
use meshcall_proto::signal::{ClientEvent, PartRequest, PeerId, ServerEvent};
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};

use crate::registry::{Delivery, Registry};

/// Shared server state: the registry plus per-server limits.
pub struct RelayState {
    /// Endpoint and channel registry.
    pub registry: Registry,
    /// Maximum accepted size of an inbound frame in bytes.
    max_message_size: usize,
    /// Directory of the client application bundle, if served.
    static_dir: Option<PathBuf>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a state with an empty registry, the default frame limit, and
    /// no static assets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            max_message_size: MAX_FRAME_SIZE,
            static_dir: None,
        }
    }

    /// Creates a state with a custom frame limit and optional asset
    /// directory.
    #[must_use]
    pub fn with_config(max_message_size: usize, static_dir: Option<PathBuf>) -> Self {
        Self {
            registry: Registry::new(),
            max_message_size,
            static_dir,
        }
    }
}

/// Handles an upgraded WebSocket connection for a single endpoint.
///
/// The connection lifecycle:
/// 1. Register the endpoint; its queue starts with `connected{peer_id}`.
/// 2. Spawn the writer task that encodes queued events onto the socket.
/// 3. Read frames and dispatch them until the socket closes.
/// 4. Disconnect the endpoint from the registry.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let peer_id = state.registry.connect(tx);
    tracing::info!(peer_id = %peer_id, "connection accepted");

    let writer_peer_id = peer_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match codec::encode_server(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer_id = %writer_peer_id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(peer_id = %writer_peer_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_peer_id = peer_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&reader_peer_id, text.as_str(), &reader_state);
                }
                Message::Binary(data) => match codec::text_from_bytes(&data) {
                    Ok(text) => handle_text_frame(&reader_peer_id, text, &reader_state),
                    Err(e) => {
                        tracing::warn!(peer_id = %reader_peer_id, error = %e, "ignoring binary frame");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(peer_id = %reader_peer_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.registry.disconnect(&peer_id);
    tracing::info!(peer_id = %peer_id, "disconnected");
}

/// Decodes one inbound text frame and dispatches it. Malformed, unknown, or
/// oversized frames are logged and ignored; the connection stays open.
fn handle_text_frame(peer_id: &PeerId, text: &str, state: &RelayState) {
    match codec::decode_client(text, state.max_message_size) {
        Ok(event) => dispatch(peer_id, event, state),
        Err(e) => {
            tracing::warn!(peer_id = %peer_id, error = %e, "ignoring malformed event");
        }
    }
}

/// Applies a decoded client event to the registry.
pub fn dispatch(peer_id: &PeerId, event: ClientEvent, state: &RelayState) {
    match event {
        ClientEvent::Join { channel, userdata } => {
            match state.registry.join(peer_id, &channel, &userdata) {
                Ok(existing) => {
                    tracing::info!(peer_id = %peer_id, channel = %channel, existing, "joined channel");
                }
                Err(e) => {
                    tracing::warn!(peer_id = %peer_id, channel = %channel, error = %e, "join ignored");
                }
            }
        }
        ClientEvent::Part(PartRequest { channel }) => match state.registry.part(peer_id, &channel) {
            Ok(remaining) => {
                tracing::info!(peer_id = %peer_id, channel = %channel, remaining, "parted channel");
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, channel = %channel, error = %e, "part ignored");
            }
        },
        ClientEvent::RelayIceCandidate {
            peer_id: target,
            ice_candidate,
        } => {
            tracing::debug!(
                from = %peer_id,
                to = %target,
                candidate = %ice_candidate.candidate,
                "relaying ICE candidate"
            );
            if state
                .registry
                .relay_ice_candidate(peer_id, &target, ice_candidate)
                == Delivery::Dropped
            {
                tracing::debug!(from = %peer_id, to = %target, "target gone, candidate dropped");
            }
        }
        ClientEvent::RelaySessionDescription {
            peer_id: target,
            session_description,
        } => {
            tracing::debug!(
                from = %peer_id,
                to = %target,
                kind = %session_description.kind,
                "relaying session description"
            );
            if state
                .registry
                .relay_session_description(peer_id, &target, session_description)
                == Delivery::Dropped
            {
                tracing::debug!(from = %peer_id, to = %target, "target gone, description dropped");
            }
        }
    }
}

/// Builds the axum router: `/ws` for signaling plus, when configured, the
/// static client bundle on every other path.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    let app = axum::Router::new().route("/ws", axum::routing::get(ws_handler));
    let app = match &state.static_dir {
        Some(dir) => app.fallback_service(
            ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
        ),
        None => app,
    };
    app.with_state(state)
}

/// Starts the server on the given address with a default [`RelayState`] and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to apply the resolved
/// [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "signaling server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
