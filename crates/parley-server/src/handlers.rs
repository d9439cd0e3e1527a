//! Connection handlers for Parley server.
//!
//! This module wires the core services into an axum router and drives each
//! admitted WebSocket session.

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, SessionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{
    bearer_token, AdmittedSession, BroadcastHub, ConnectionAuthenticator, Gateway, HubConfig,
    InMemoryMessageStore, InMemoryUserStore, JwtVerifier, MessageService, PresenceRegistry,
    Session, TypingCoordinator, UserIdentity,
};
use parley_protocol::{
    codec, error_codes, ChatUser, ClientFrame, Encoding, ProtocolError, ServerFrame, Version,
    PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Session admission, presence and fan-out.
    pub gateway: Gateway,
    /// Message write path and history.
    pub messages: MessageService,
    /// Typing relay.
    pub typing: TypingCoordinator,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state backed by the in-memory stores.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let users: Arc<InMemoryUserStore> = Arc::new(
            config
                .users
                .iter()
                .cloned()
                .map(UserIdentity::from)
                .collect(),
        );
        let verifier = Arc::new(JwtVerifier::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.leeway_secs,
        ));
        let hub = Arc::new(BroadcastHub::with_config(HubConfig {
            queue_capacity: config.limits.outbound_queue_capacity,
        }));

        let authenticator = ConnectionAuthenticator::new(verifier, users.clone());
        let gateway = Gateway::new(
            authenticator,
            Arc::new(PresenceRegistry::new()),
            Arc::clone(&hub),
        );
        let messages = MessageService::new(
            Arc::new(InMemoryMessageStore::new()),
            users,
            Arc::clone(&hub),
        );

        Self {
            gateway,
            messages,
            typing: TypingCoordinator::new(hub),
            config,
        }
    }
}

/// Build the HTTP/WebSocket router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/messages", get(list_messages).post(create_message))
        .route("/presence", get(list_presence))
        .route("/presence/:user_id", get(user_presence))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::new(config));
    let ws_path = state.config.transport.websocket_path.clone();
    let app = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.gateway.registry().stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "onlineUsers": stats.online_users,
        "activeSessions": stats.active_sessions,
    }))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
    protocol: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The credential is checked before the upgrade; refused connections get a
/// plain HTTP error and never reach the presence registry.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    check_protocol(params.protocol.as_deref())?;

    let credential = header_credential(&headers).or(params.token.as_deref());
    let admitted = state.gateway.admit(credential).await.map_err(|e| {
        metrics::record_auth_rejection(e.reason());
        ApiError::from(e)
    })?;

    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, admitted)))
}

fn check_protocol(requested: Option<&str>) -> Result<(), ApiError> {
    let Some(raw) = requested else {
        return Ok(());
    };
    let version: Version = raw
        .parse()
        .map_err(|e: &str| ApiError::bad_request("INVALID_PROTOCOL", e))?;

    if !version.is_compatible_with(&PROTOCOL_VERSION) {
        return Err(ApiError::bad_request(
            "UNSUPPORTED_PROTOCOL",
            format!("Protocol {version} is not supported, server speaks {PROTOCOL_VERSION}"),
        ));
    }
    Ok(())
}

fn header_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

/// Handle an admitted WebSocket session until either side closes it.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mut admitted: AdmittedSession) {
    let _metrics_guard = SessionMetricsGuard::new();
    let session = admitted.session().clone();

    debug!(session = %session.id, user = %session.user.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut encoding = Encoding::default();
    let mut read_buffer = BytesMut::with_capacity(4096);

    let connected = ServerFrame::Connected {
        session_id: session.id.to_string(),
        user: session.user.to_chat_user(),
        protocol: PROTOCOL_VERSION.to_string(),
        heartbeat: u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX),
        online: state.gateway.online_users().await,
    };
    if let Err(e) = send_frame(&mut sender, &connected, encoding).await {
        error!(session = %session.id, error = %e, "Failed to send Connected frame");
        admitted.close();
        return;
    }
    record_presence(&state);

    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let idle = tokio::time::sleep(timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;

            event = admitted.recv() => {
                let Some(event) = event else { break };
                if send_frame(&mut sender, &event.to_frame(), encoding).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                idle.as_mut().reset(Instant::now() + timeout);

                let replies = match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Text;
                        match codec::decode_text::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, &session, &state).into_iter().collect(),
                            Err(e) => vec![protocol_error(&session, &e)],
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::Binary;
                        read_buffer.extend_from_slice(&data);
                        decode_buffered(&mut read_buffer, &session, &state)
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session.id, "WebSocket stream ended");
                        break;
                    }
                };

                if send_all(&mut sender, &replies, encoding).await.is_err() {
                    break;
                }
            }

            () = &mut idle => {
                debug!(session = %session.id, "Idle timeout");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    admitted.close();
    record_presence(&state);

    debug!(session = %session.id, "WebSocket disconnected");
}

/// Decode every complete binary frame in `buf`.
fn decode_buffered(buf: &mut BytesMut, session: &Session, state: &AppState) -> Vec<ServerFrame> {
    let mut replies = Vec::new();
    loop {
        match codec::decode_from::<ClientFrame>(buf) {
            Ok(Some(frame)) => replies.extend(handle_frame(frame, session, state)),
            Ok(None) => break,
            Err(e) => {
                buf.clear();
                replies.push(protocol_error(session, &e));
                break;
            }
        }
    }
    replies
}

/// Handle a decoded client frame, returning the direct reply if any.
fn handle_frame(frame: ClientFrame, session: &Session, state: &AppState) -> Option<ServerFrame> {
    metrics::record_frame(frame.kind());

    match frame {
        ClientFrame::TypingStart => {
            let recipients = state.typing.start(session);
            debug!(session = %session.id, recipients = recipients, "Typing started");
            None
        }
        ClientFrame::TypingStop => {
            let recipients = state.typing.stop(session);
            debug!(session = %session.id, recipients = recipients, "Typing stopped");
            None
        }
        ClientFrame::Ping { timestamp } => Some(ServerFrame::pong(timestamp)),
    }
}

fn protocol_error(session: &Session, error: &ProtocolError) -> ServerFrame {
    debug!(session = %session.id, error = %error, "Malformed client frame");
    metrics::record_error("protocol");

    let code = match error {
        ProtocolError::FrameTooLarge(_) => error_codes::FRAME_TOO_LARGE,
        _ => error_codes::MALFORMED_FRAME,
    };
    ServerFrame::error(code, error.to_string())
}

fn record_presence(state: &AppState) {
    metrics::set_presence(
        state.gateway.registry().stats().online_users,
        state.gateway.hub().dropped_events(),
    );
}

/// Send a frame to the WebSocket in the session's current encoding.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Text => Message::Text(codec::encode_text(frame)?),
        Encoding::Binary => Message::Binary(codec::encode_binary(frame)?.to_vec()),
    };
    sender.send(message).await?;
    metrics::record_event(frame.kind());
    Ok(())
}

async fn send_all(
    sender: &mut SplitSink<WebSocket, Message>,
    frames: &[ServerFrame],
    encoding: Encoding,
) -> Result<()> {
    for frame in frames {
        send_frame(sender, frame, encoding).await?;
    }
    Ok(())
}

/// Resolve the caller of an HTTP request from its bearer token.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    Ok(state
        .gateway
        .authenticator()
        .authenticate(header_credential(headers))
        .await?)
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    text: String,
}

/// Create a chat message. Returns the created message; every open session
/// receives it separately through the hub.
async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ServerFrame>), ApiError> {
    let sender = authenticate(&state, &headers).await?;
    let message = state.messages.create_message(&sender, &request.text).await?;
    metrics::record_message_created();
    Ok((StatusCode::CREATED, Json(message.to_frame())))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ServerFrame>>, ApiError> {
    authenticate(&state, &headers).await?;
    let limit = params.limit.unwrap_or(state.config.limits.max_history);
    let messages = state.messages.recent_messages(limit).await?;
    Ok(Json(messages.iter().map(|m| m.to_frame()).collect()))
}

async fn list_presence(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatUser>>, ApiError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.gateway.online_users().await))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceStatus {
    user_id: String,
    online: bool,
    sessions: usize,
}

async fn user_presence(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceStatus>, ApiError> {
    authenticate(&state, &headers).await?;
    let registry = state.gateway.registry();
    Ok(Json(PresenceStatus {
        online: registry.is_online(&user_id),
        sessions: registry.session_count(&user_id),
        user_id,
    }))
}
