//! Connection manager: listener lifecycle plus addressed and broadcast delivery

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::constants::{CLOSE_NORMAL, REASON_DISCONNECTED, REASON_SERVER_STOPPED, REASON_SHUTDOWN};
use crate::core::connection::ClientInfo;
use crate::core::events::{
    CloseEvent, Dispatcher, Event, EventHandler, EventKind, HandlerResult, ListeningEvent,
};
use crate::core::message::Payload;
use crate::core::registry::{create_registry, read_registry, write_registry, SharedRegistry};
use crate::error::{Result, SocketHubError};
use crate::handlers::websocket::{ws_route, UpgradeContext};

/// State shared between the manager and every connection task
pub struct HubState {
    pub(crate) registry: SharedRegistry,
    pub(crate) dispatcher: Dispatcher,
}

struct Listener {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Cheaply cloneable handle to one WebSocket server and its live connections
#[derive(Clone)]
pub struct ConnectionManager {
    hub: Arc<HubState>,
    listener: Arc<Mutex<Option<Listener>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(HubState {
                registry: create_registry(),
                dispatcher: Dispatcher::new(),
            }),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind the listener and start accepting upgrades.
    ///
    /// Returns the bound address (useful with port 0). Fails with `AlreadyRunning` if a
    /// listener is active and with `BindError` if the address cannot be claimed.
    pub async fn start(&self, config: ServerConfig) -> Result<SocketAddr> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            warn!("start called while the server is already running");
            return Err(SocketHubError::AlreadyRunning);
        }

        config.validate()?;
        let addr = config.socket_addr()?;
        let path = config.path.clone();

        let routes = ws_route(Arc::new(UpgradeContext {
            hub: self.hub.clone(),
            path: config.path,
            allow_cors: config.allow_cors,
            auth_handler: config.auth_handler,
        }));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let bound = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.await;
        });

        let (local_addr, server) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!("Failed to start WebSocket server on {}: {}", addr, e);
                let message = format!("{}: {}", addr, e);
                self.hub.dispatcher.publish(&Event::error(
                    None,
                    SocketHubError::BindError(message.clone()),
                ));
                return Err(SocketHubError::BindError(message));
            }
        };

        write_registry(&self.hub.registry).set_accepting(true);
        *listener = Some(Listener {
            local_addr,
            shutdown: shutdown_tx,
            task: tokio::spawn(server),
        });
        drop(listener);

        info!("WebSocket server running on {}{}", local_addr, path);
        self.hub.dispatcher.publish(&Event::Listening(ListeningEvent {
            port: local_addr.port(),
            path,
        }));

        Ok(local_addr)
    }

    /// Close every client with 1000, clear the registry, then shut the listener down.
    ///
    /// Upgrades completing after this point are closed immediately and never registered.
    /// A no-op when nothing is running.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.listener.lock().await;
        let Some(listener) = guard.take() else {
            debug!("stop called with no listener running");
            return Ok(());
        };

        // Stop accepting under the same lock, so an upgrade finishing during shutdown
        // cannot slip in after the table is cleared
        let closed = {
            let mut registry = write_registry(&self.hub.registry);
            registry.set_accepting(false);
            registry.close_all(CLOSE_NORMAL, REASON_SHUTDOWN)
        };
        info!("Closing {} client connections", closed);

        if listener.shutdown.send(()).is_err() {
            debug!("Listener task already finished");
        }
        if let Err(e) = listener.task.await {
            error!("Error closing WebSocket server: {}", e);
            return Err(SocketHubError::ShutdownError(e.to_string()));
        }
        drop(guard);

        info!("WebSocket server stopped");
        self.hub.dispatcher.publish(&Event::Close(CloseEvent {
            client_id: None,
            code: CLOSE_NORMAL,
            reason: REASON_SERVER_STOPPED.to_string(),
        }));
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    /// Send to one client. False if unknown, not open, or the transport refused.
    pub fn send_to(&self, id: &str, payload: impl Into<Payload>) -> bool {
        let text = match payload.into().encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode payload for client {}: {}", id, e);
                return false;
            }
        };
        read_registry(&self.hub.registry).send_to(id, &text)
    }

    /// Send to every open client except `exclude_id`; returns successful deliveries
    pub fn broadcast(&self, payload: impl Into<Payload>, exclude_id: Option<&str>) -> usize {
        let text = match payload.into().encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode broadcast payload: {}", e);
                return 0;
            }
        };
        let sent = read_registry(&self.hub.registry).broadcast(&text, exclude_id);
        debug!("Broadcast message to {} clients", sent);
        sent
    }

    pub fn client_count(&self) -> usize {
        read_registry(&self.hub.registry).client_count()
    }

    pub fn client_ids(&self) -> Vec<String> {
        read_registry(&self.hub.registry).client_ids()
    }

    pub fn client_info(&self, id: &str) -> Option<ClientInfo> {
        read_registry(&self.hub.registry).client_info(id)
    }

    /// Merge a JSON object into the client's metadata. False for unknown ids or non-objects.
    pub fn set_client_metadata(&self, id: &str, patch: Value) -> bool {
        let Value::Object(patch) = patch else {
            warn!("Metadata patch for client {} is not an object", id);
            return false;
        };
        write_registry(&self.hub.registry).merge_metadata(id, patch)
    }

    /// Ask a client to close. Defaults to 1000 "Disconnected by server".
    pub fn disconnect_client(&self, id: &str, code: Option<u16>, reason: Option<&str>) -> bool {
        write_registry(&self.hub.registry).disconnect(
            id,
            code.unwrap_or(CLOSE_NORMAL),
            reason.unwrap_or(REASON_DISCONNECTED),
        )
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.hub.dispatcher
    }

    pub fn on<F>(&self, kind: impl Into<EventKind>, handler: F) -> EventHandler
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.hub.dispatcher.on(kind, handler)
    }

    pub fn subscribe(&self, kind: impl Into<EventKind>, handler: EventHandler) {
        self.hub.dispatcher.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: impl Into<EventKind>, handler: &EventHandler) -> bool {
        self.hub.dispatcher.unsubscribe(kind, handler)
    }

    /// Publish an application-defined event. Built-in event names are refused.
    pub fn emit(&self, name: &str, data: Value) -> usize {
        if !matches!(EventKind::from(name), EventKind::Custom(_)) {
            warn!("Refusing to emit reserved event '{}'", name);
            return 0;
        }
        self.hub.dispatcher.publish(&Event::Custom {
            name: name.to_string(),
            data,
        })
    }
}
