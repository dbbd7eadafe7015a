use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use warp::filters::path::FullPath;
use warp::http::{HeaderMap, StatusCode};
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::constants::{
    CLOSE_ABNORMAL, CLOSE_AUTH_ERROR, CLOSE_HANDSHAKE_TIMEOUT_SECS, CLOSE_NORMAL,
    CLOSE_NO_STATUS, CLOSE_UNAUTHORIZED, REASON_AUTH_ERROR, REASON_SHUTDOWN, REASON_UNAUTHORIZED,
};
use crate::core::events::{CloseEvent, ConnectionEvent, Event, MessageEvent};
use crate::core::ip_extractor::extract_remote_address;
use crate::core::message::decode;
use crate::core::registry::{read_registry, write_registry};
use crate::core::server::HubState;
use crate::error::SocketHubError;
use crate::handlers::auth::{authenticate, is_same_origin, AuthHandler, AuthOutcome, UpgradeRequest};

/// Everything the upgrade route needs from the running server
pub struct UpgradeContext {
    pub hub: Arc<HubState>,
    pub path: String,
    pub allow_cors: bool,
    pub auth_handler: Option<AuthHandler>,
}

/// Upgrade route: exact path match, then WebSocket handshake
pub fn ws_route(
    ctx: Arc<UpgradeContext>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let path = ctx.path.clone();

    warp::path::full()
        .and_then(move |full: FullPath| {
            let matches = full.as_str() == path;
            async move {
                if matches {
                    Ok::<_, Rejection>(full)
                } else {
                    Err(warp::reject::not_found())
                }
            }
        })
        .and(warp::ws())
        .and(
            warp::query::raw()
                .map(Some)
                .or(warp::any().map(|| None::<String>))
                .unify(),
        )
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(warp::any().map(move || ctx.clone()))
        .and_then(handle_upgrade)
}

async fn handle_upgrade(
    full: FullPath,
    ws: Ws,
    query: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    ctx: Arc<UpgradeContext>,
) -> Result<Response, Rejection> {
    if !ctx.allow_cors && !is_same_origin(&headers) {
        return Ok(warp::reply::with_status("Cross-origin upgrade refused", StatusCode::FORBIDDEN)
            .into_response());
    }

    let request = UpgradeRequest {
        path: full.as_str().to_string(),
        query,
        headers,
        remote_addr,
    };
    let remote_address = extract_remote_address(&request.headers, request.remote_addr);

    // Runs before the handshake completes so a rejected peer never gets an id
    let outcome = authenticate(ctx.auth_handler.as_ref(), &request);
    let request = Arc::new(request);

    Ok(ws
        .on_upgrade(move |socket| async move {
            match outcome {
                AuthOutcome::Accepted => {
                    handle_ws_client(socket, ctx.hub.clone(), request, remote_address).await
                }
                AuthOutcome::Rejected => {
                    reject_client(
                        socket,
                        &ctx.hub,
                        CLOSE_UNAUTHORIZED,
                        REASON_UNAUTHORIZED,
                        SocketHubError::AuthRejected(remote_address),
                    )
                    .await
                }
                AuthOutcome::HandlerFailed(message) => {
                    reject_client(
                        socket,
                        &ctx.hub,
                        CLOSE_AUTH_ERROR,
                        REASON_AUTH_ERROR,
                        SocketHubError::AuthHandlerFailure(message),
                    )
                    .await
                }
            }
        })
        .into_response())
}

// Close a peer that failed authentication. No registry entry is ever created.
async fn reject_client(
    ws: WebSocket,
    hub: &HubState,
    code: u16,
    reason: &'static str,
    error: SocketHubError,
) {
    warn!("Rejecting connection ({}): {}", code, error);
    hub.dispatcher.publish(&Event::error(None, error));
    close_unregistered(ws, code, reason).await;
}

// Send a close frame on a socket that never got an id and give the peer a moment to answer
async fn close_unregistered(mut ws: WebSocket, code: u16, reason: &'static str) {
    if let Err(e) = ws.send(Message::close_with(code, reason)).await {
        debug!("Failed to send close frame: {}", e);
        return;
    }

    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
    if tokio::time::timeout(close_handshake_timeout(), drain).await.is_err() {
        debug!("Peer did not complete the close handshake");
    }
}

fn close_handshake_timeout() -> Duration {
    Duration::from_secs(CLOSE_HANDSHAKE_TIMEOUT_SECS)
}

// Handle an accepted WebSocket connection until it closes
pub async fn handle_ws_client(
    ws: WebSocket,
    hub: Arc<HubState>,
    request: Arc<UpgradeRequest>,
    remote_address: String,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Register the client
    let registered = write_registry(&hub.registry).register(tx, remote_address.clone());
    let Some(client_id) = registered else {
        info!("Upgrade from {} completed after shutdown, closing", remote_address);
        close_unregistered(ws, CLOSE_NORMAL, REASON_SHUTDOWN).await;
        return;
    };
    info!("Client connected: {} from {}", client_id, remote_address);
    debug!("Current connections: {}", read_registry(&hub.registry).client_count());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (closing_tx, mut closing_rx) = oneshot::channel::<()>();

    // Spawn a task to forward messages from our channel to the WebSocket
    let writer_hub = hub.clone();
    let writer_id = client_id.clone();
    tokio::task::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                warn!("Failed to send WebSocket message to {}: {}", writer_id, e);
                writer_hub.dispatcher.publish(&Event::error(
                    Some(writer_id.clone()),
                    SocketHubError::SendFailure(writer_id),
                ));
                break;
            }
            if closing {
                let _ = closing_tx.send(());
                break;
            }
        }
    });

    hub.dispatcher.publish(&Event::Connection(ConnectionEvent {
        client_id: client_id.clone(),
        remote_address,
        request,
    }));

    let mut close_code = CLOSE_ABNORMAL;
    let mut close_reason = String::new();
    // Set once the writer is done; the peer then has a bounded time to finish the handshake
    let mut deadline: Option<Instant> = None;

    // Handle incoming messages; keep polling after a close frame so the reply gets flushed
    loop {
        let next = match deadline {
            None => tokio::select! {
                next = ws_rx.next() => next,
                _ = &mut closing_rx => {
                    deadline = Some(Instant::now() + close_handshake_timeout());
                    continue;
                }
            },
            Some(at) => match tokio::time::timeout_at(at, ws_rx.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("Client {} did not answer the close frame in time", client_id);
                    close_code = CLOSE_ABNORMAL;
                    close_reason.clear();
                    break;
                }
            },
        };
        let Some(result) = next else {
            break;
        };

        match result {
            Ok(msg) if msg.is_close() => match msg.close_frame() {
                Some((code, reason)) => {
                    close_code = code;
                    close_reason = reason.to_string();
                }
                None => close_code = CLOSE_NO_STATUS,
            },
            Ok(msg) if msg.is_text() || msg.is_binary() => {
                let raw = msg.into_bytes();
                debug!("Message from {} ({} bytes)", client_id, raw.len());
                hub.dispatcher.publish(&Event::Message(MessageEvent {
                    client_id: client_id.clone(),
                    message: decode(&raw),
                    raw,
                }));
            }
            // ping/pong are answered by the transport
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for client {}: {}", client_id, e);
                hub.dispatcher.publish(&Event::error(
                    Some(client_id.clone()),
                    SocketHubError::ConnectionError(e.to_string()),
                ));
                break;
            }
        }
    }

    // Remove before announcing, so close handlers see the final table
    let removed = write_registry(&hub.registry).unregister(&client_id).is_some();
    if removed {
        info!("Client disconnected: {} ({})", client_id, close_code);
    } else {
        debug!("Client {} closed after server shutdown", client_id);
    }

    hub.dispatcher.publish(&Event::Close(CloseEvent {
        client_id: Some(client_id),
        code: close_code,
        reason: close_reason,
    }));
}
