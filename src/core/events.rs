//! Lifecycle events and the subscriber fan-out
//!
//! Handlers are kept per event kind in subscription order. A publish pass works on a
//! snapshot of the list taken before the first handler runs, so handlers may freely
//! subscribe, unsubscribe or call back into the connection manager.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error};
use serde_json::Value;

use crate::core::message::DecodedMessage;
use crate::error::{BoxError, SocketHubError};
use crate::handlers::auth::UpgradeRequest;

pub type HandlerResult = std::result::Result<(), BoxError>;

/// Shared handle to a subscriber callback; also the key for `unsubscribe`
pub type EventHandler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Message,
    Close,
    Error,
    Listening,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Connection => "connection",
            EventKind::Message => "message",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Listening => "listening",
            EventKind::Custom(name) => name,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "connection" => EventKind::Connection,
            "message" => EventKind::Message,
            "close" => EventKind::Close,
            "error" => EventKind::Error,
            "listening" => EventKind::Listening,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub client_id: String,
    pub remote_address: String,
    pub request: Arc<UpgradeRequest>,
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub client_id: String,
    pub message: DecodedMessage,
    pub raw: Vec<u8>,
}

/// `client_id` is `None` for the server-level close emitted by `stop`
#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub client_id: Option<String>,
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub client_id: Option<String>,
    pub error: Arc<SocketHubError>,
}

#[derive(Debug, Clone)]
pub struct ListeningEvent {
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone)]
pub enum Event {
    Connection(ConnectionEvent),
    Message(MessageEvent),
    Close(CloseEvent),
    Error(ErrorEvent),
    Listening(ListeningEvent),
    Custom { name: String, data: Value },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connection(_) => EventKind::Connection,
            Event::Message(_) => EventKind::Message,
            Event::Close(_) => EventKind::Close,
            Event::Error(_) => EventKind::Error,
            Event::Listening(_) => EventKind::Listening,
            Event::Custom { name, .. } => EventKind::from(name.as_str()),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            Event::Connection(e) => Some(&e.client_id),
            Event::Message(e) => Some(&e.client_id),
            Event::Close(e) => e.client_id.as_deref(),
            Event::Error(e) => e.client_id.as_deref(),
            Event::Listening(_) | Event::Custom { .. } => None,
        }
    }

    pub(crate) fn error(client_id: Option<String>, error: SocketHubError) -> Self {
        Event::Error(ErrorEvent {
            client_id,
            error: Arc::new(error),
        })
    }
}

pub struct Dispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        for kind in [
            EventKind::Connection,
            EventKind::Message,
            EventKind::Close,
            EventKind::Error,
            EventKind::Listening,
        ] {
            handlers.insert(kind, Vec::new());
        }
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Append a handler. Unknown kinds get a fresh list.
    pub fn subscribe(&self, kind: impl Into<EventKind>, handler: EventHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(kind.into()).or_default().push(handler);
    }

    /// Wrap a closure, subscribe it and hand back the handle for `unsubscribe`
    pub fn on<F>(&self, kind: impl Into<EventKind>, handler: F) -> EventHandler
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.subscribe(kind, handler.clone());
        handler
    }

    /// Remove the first subscription of this exact handler. False if absent.
    pub fn unsubscribe(&self, kind: impl Into<EventKind>, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&kind.into()) else {
            return false;
        };
        match list.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn handler_count(&self, kind: impl Into<EventKind>) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&kind.into()).map_or(0, Vec::len)
    }

    pub fn clear(&self, kind: impl Into<EventKind>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&kind.into()) {
            list.clear();
        }
    }

    /// Run every handler subscribed to the event's kind, in order.
    ///
    /// A failing or panicking handler is logged and reported as an `error` event;
    /// the remaining handlers still run. Returns the number of handlers that succeeded.
    pub fn publish(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&kind) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        debug!("Dispatching '{}' to {} handlers", kind, snapshot.len());

        let mut succeeded = 0;
        for handler in snapshot {
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {
                    succeeded += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            error!("Handler for '{}' event failed: {}", kind, failure);

            // error handlers failing must not feed back into themselves
            if kind != EventKind::Error {
                let report = Event::error(
                    event.client_id().map(str::to_string),
                    SocketHubError::HandlerFailure {
                        event: kind.to_string(),
                        message: failure,
                    },
                );
                self.publish(&report);
            }
        }
        succeeded
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn listening() -> Event {
        Event::Listening(ListeningEvent {
            port: 8080,
            path: "/".to_string(),
        })
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=3 {
            let order = order.clone();
            dispatcher.on("listening", move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }

        assert_eq!(dispatcher.publish(&listening()), 3);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unsubscribe_removes_first_match_only() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let handler: EventHandler = Arc::new(move |_: &Event| -> HandlerResult {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        dispatcher.subscribe(EventKind::Listening, handler.clone());
        dispatcher.subscribe(EventKind::Listening, handler.clone());
        assert!(dispatcher.unsubscribe(EventKind::Listening, &handler));
        assert_eq!(dispatcher.handler_count(EventKind::Listening), 1);

        dispatcher.publish(&listening());
        assert_eq!(*calls.lock().unwrap(), 1);

        assert!(dispatcher.unsubscribe("listening", &handler));
        assert!(!dispatcher.unsubscribe("listening", &handler));
        assert!(!dispatcher.unsubscribe("never-registered", &handler));
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_current_pass() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let second_seen = seen.clone();
        let second = dispatcher.on("listening", move |_| {
            second_seen.lock().unwrap().push("second");
            Ok(())
        });

        // First handler is subscribed after `second`, then moved to the front
        let first_seen = seen.clone();
        let d = dispatcher.clone();
        let target = second.clone();
        let first: EventHandler = Arc::new(move |_: &Event| -> HandlerResult {
            first_seen.lock().unwrap().push("first");
            d.unsubscribe("listening", &target);
            Ok(())
        });
        dispatcher.unsubscribe("listening", &second);
        dispatcher.subscribe("listening", first);
        dispatcher.subscribe("listening", second);

        dispatcher.publish(&listening());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);

        seen.lock().unwrap().clear();
        dispatcher.publish(&listening());
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_failing_handlers_are_isolated_and_reported() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on("listening", |_| Err("boom".into()));
        dispatcher.on("listening", |_| panic!("kaboom"));
        let ran_clone = ran.clone();
        dispatcher.on("listening", move |_| {
            ran_clone.lock().unwrap().push("last");
            Ok(())
        });

        let errors_clone = errors.clone();
        dispatcher.on(EventKind::Error, move |event| {
            if let Event::Error(e) = event {
                errors_clone.lock().unwrap().push(e.error.to_string());
            }
            Ok(())
        });

        assert_eq!(dispatcher.publish(&listening()), 1);
        assert_eq!(*ran.lock().unwrap(), vec!["last"]);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("boom"));
        assert!(errors[1].contains("kaboom"));
    }

    #[test]
    fn test_failing_error_handler_is_not_republished() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        dispatcher.on(EventKind::Error, move |_| {
            *counter.lock().unwrap() += 1;
            Err("error handler broke".into())
        });

        let event = Event::error(None, SocketHubError::ConnectionError("x".to_string()));
        assert_eq!(dispatcher.publish(&event), 0);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_custom_kinds_are_accepted() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.handler_count("notification"), 0);

        let received = Arc::new(Mutex::new(None));
        let slot = received.clone();
        dispatcher.on("notification", move |event| {
            if let Event::Custom { data, .. } = event {
                *slot.lock().unwrap() = Some(data.clone());
            }
            Ok(())
        });

        let event = Event::Custom {
            name: "notification".to_string(),
            data: serde_json::json!({"text": "update"}),
        };
        assert_eq!(event.kind(), EventKind::Custom("notification".to_string()));
        assert_eq!(dispatcher.publish(&event), 1);
        assert_eq!(
            received.lock().unwrap().clone(),
            Some(serde_json::json!({"text": "update"}))
        );

        dispatcher.clear("notification");
        assert_eq!(dispatcher.handler_count("notification"), 0);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for name in ["connection", "message", "close", "error", "listening", "other"] {
            assert_eq!(EventKind::from(name).as_str(), name);
        }
    }
}
