//! Connection handlers for the Parley server.
//!
//! This module handles the connection lifecycle and frame processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::{ids, Coordinator, LocalHub, RoomRegistry};
use parley_protocol::{codec, codes, Frame, ProtocolError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often coordinator and hub state is exported as metrics.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    pub coordinator: Coordinator,
    /// Per-connection delivery queues.
    pub hub: Arc<LocalHub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rooms = Arc::new(RoomRegistry::with_eviction(config.rooms.evict_empty_rooms));
        let hub = Arc::new(LocalHub::with_capacity(
            Arc::clone(&rooms),
            config.limits.outbound_queue_capacity,
        ));
        let coordinator = Coordinator::new(config.coordinator_config(), rooms, hub.clone());

        Self {
            coordinator,
            hub,
            config,
        }
    }

    /// Run one client action and build the reply frame.
    fn invoke(&self, connection_id: &str, id: u64, action: parley_protocol::ClientAction) -> Frame {
        let name = action.name();
        let start = Instant::now();

        let reply = match self.coordinator.handle(connection_id, action) {
            Ok(result) => Frame::completion(id, result),
            Err(e) => {
                metrics::record_action_error(name, e.code(), e.kind());
                Frame::error(id, e.code(), e.to_string())
            }
        };

        metrics::record_action(name, start.elapsed().as_secs_f64());
        reply
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        spawn_stats_task(Arc::clone(&state));
    }

    spawn_presence_sweep(Arc::clone(&state));

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop offline presence records of closed connections.
fn spawn_presence_sweep(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let Some(period) = state.config.presence.sweep_interval() else {
        info!("Presence sweep disabled");
        return None;
    };
    let retention = state.config.presence.offline_retention();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = state.coordinator.prune_presence(retention);
            if pruned > 0 {
                debug!(pruned, "Presence sweep");
            }
        }
    }))
}

fn spawn_stats_task(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_state(&state.coordinator.stats(), &state.hub.stats());
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.coordinator.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "users_online": stats.users_online,
        "rooms": stats.rooms,
        "streams": stats.active_streams,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let limits = &state.config.limits;
    if state.hub.stats().connections >= limits.max_connections {
        warn!(limit = limits.max_connections, "Connection limit reached");
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let max_message_size = limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ids::connection_id();
    let mut inbox = state.hub.register(&connection_id);
    state.coordinator.on_connect(&connection_id);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(connection_id.as_str(), heartbeat);
    let mut reason = "closed";

    if let Err(e) = send_frame(&mut sender, &connected).await {
        error!(connection = %connection_id, error = %e, "Failed to send Connected frame");
        reason = "handshake failed";
    } else {
        // Read buffer for partial frames
        let mut read_buffer = BytesMut::with_capacity(4096);
        let max_message_size = state.config.limits.max_message_size;

        loop {
            tokio::select! {
                biased;

                // Events queued for this connection by the hub
                Some(delivery) = inbox.recv() => {
                    let frame = Frame::event(delivery.seq, (*delivery.event).clone());
                    if send_frame(&mut sender, &frame).await.is_err() {
                        reason = "send failed";
                        break;
                    }
                }

                msg = receiver.next() => {
                    let data = match msg {
                        Some(Ok(Message::Binary(data))) => data,
                        // Text is decoded like binary
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                reason = "send failed";
                                break;
                            }
                            continue;
                        }
                        Some(Ok(Message::Pong(_))) => continue,
                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %connection_id, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(connection = %connection_id, error = %e, "WebSocket error");
                            metrics::record_protocol_error("websocket");
                            reason = "socket error";
                            break;
                        }
                        None => {
                            debug!(connection = %connection_id, "WebSocket stream ended");
                            break;
                        }
                    };

                    read_buffer.extend_from_slice(&data);
                    if read_buffer.len() > max_message_size {
                        warn!(
                            connection = %connection_id,
                            size = read_buffer.len(),
                            max = max_message_size,
                            "Inbound message too large"
                        );
                        metrics::record_protocol_error("too_large");
                        let reply = Frame::error(0, codes::PAYLOAD_TOO_LARGE, "Message too large");
                        let _ = send_frame(&mut sender, &reply).await;
                        reason = "message too large";
                        break;
                    }

                    if let Err(e) =
                        drain_frames(&mut read_buffer, &connection_id, &state, &mut sender).await
                    {
                        warn!(connection = %connection_id, error = %e, "Frame handling error");
                        reason = "protocol error";
                        break;
                    }
                }
            }
        }
    }

    // Stop deliveries before the coordinator broadcasts the departure.
    state.hub.unregister(&connection_id);
    state.coordinator.on_disconnect(&connection_id, Some(reason));

    debug!(connection = %connection_id, reason, "WebSocket disconnected");
}

/// Decode and handle every complete frame in the buffer.
async fn drain_frames(
    read_buffer: &mut BytesMut,
    connection_id: &str,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    loop {
        match codec::decode_from(read_buffer) {
            Ok(Some(frame)) => handle_frame(frame, connection_id, state, sender).await?,
            Ok(None) => return Ok(()),
            Err(e) => {
                metrics::record_protocol_error(protocol_error_kind(&e));
                let reply = Frame::error(0, codes::PROTOCOL, e.to_string());
                send_frame(sender, &reply).await?;
                return Err(e.into());
            }
        }
    }
}

fn protocol_error_kind(e: &ProtocolError) -> &'static str {
    match e {
        ProtocolError::FrameTooLarge(_) => "too_large",
        ProtocolError::Incomplete(_) => "incomplete",
        ProtocolError::Encode(_) => "encode",
        ProtocolError::Decode(_) => "decode",
    }
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    connection_id: &str,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    match frame {
        Frame::Invoke { id, action } => {
            debug!(connection = %connection_id, id, action = action.name(), "Invoke");
            let reply = state.invoke(connection_id, id, action);
            send_frame(sender, &reply).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {
            state.coordinator.presence().touch(connection_id);
        }

        other => {
            warn!(connection = %connection_id, frame = ?other, "Unexpected frame type");
            let reply = Frame::error(0, codes::PROTOCOL, "Unexpected frame type");
            send_frame(sender, &reply).await?;
        }
    }

    Ok(())
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
