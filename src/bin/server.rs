use log::{error, info, warn};
use serde_json::json;

use socket_hub::auth::TokenManager;
use socket_hub::config::ServerConfig;
use socket_hub::core::{ConnectionManager, DecodedMessage, Event};

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    // Load config from env
    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Ok(secret) = std::env::var("SOCKET_HUB_JWT_SECRET") {
        info!("Bearer token authentication enabled");
        config = config.with_auth_handler(TokenManager::new(&secret).into_auth_handler());
    }

    info!(
        "Configuration: host={}, port={}, path={}, allow_cors={}",
        config.host, config.port, config.path, config.allow_cors
    );

    let manager = ConnectionManager::new();
    register_handlers(&manager);

    if let Err(e) = manager.start(config).await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutdown signal received");
    if let Err(e) = manager.stop().await {
        error!("Error during shutdown: {}", e);
    }
}

// Relay every inbound message to all other clients
fn register_handlers(manager: &ConnectionManager) {
    let hub = manager.clone();
    manager.on("connection", move |event| {
        if let Event::Connection(e) = event {
            info!("Client {} connected from {}", e.client_id, e.remote_address);
            hub.set_client_metadata(&e.client_id, json!({ "joined_via": e.request.path }));
            hub.send_to(&e.client_id, json!({ "type": "connected", "client_id": e.client_id }));
        }
        Ok(())
    });

    let hub = manager.clone();
    manager.on("message", move |event| {
        if let Event::Message(e) = event {
            let relayed = match &e.message {
                DecodedMessage::Structured(value) => {
                    json!({ "type": "relay", "from": e.client_id, "data": value })
                }
                DecodedMessage::Text(text) => {
                    json!({ "type": "relay", "from": e.client_id, "text": text })
                }
            };
            let count = hub.broadcast(relayed, Some(&e.client_id));
            info!("Relayed message from {} to {} clients", e.client_id, count);
        }
        Ok(())
    });

    manager.on("close", |event| {
        if let Event::Close(e) = event {
            match &e.client_id {
                Some(id) => info!("Client {} closed ({}: {})", id, e.code, e.reason),
                None => info!("Server closed: {}", e.reason),
            }
        }
        Ok(())
    });

    manager.on("error", |event| {
        if let Event::Error(e) = event {
            warn!("Error (client {:?}): {}", e.client_id, e.error);
        }
        Ok(())
    });
}
