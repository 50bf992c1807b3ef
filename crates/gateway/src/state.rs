use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use tokio::sync::RwLock;

use {
    hostdeck_config::HostdeckConfig,
    hostdeck_files::FileService,
    hostdeck_store::{AuditStore, SettingsStore},
};

use crate::{
    auth::{Identity, IdentityProvider},
    ws::Protocol,
};

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket connection currently owned by one protocol handler.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub protocol: Protocol,
    pub identity: Option<Identity>,
    pub remote_addr: SocketAddr,
    pub connected_at: Instant,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, built once at startup and handed to every
/// handler behind an `Arc`.
pub struct GatewayState {
    pub config: HostdeckConfig,
    pub audit: Arc<dyn AuditStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub files: FileService,
    /// Live WebSocket connections, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Server version string.
    pub version: String,
    pub hostname: String,
}

impl GatewayState {
    pub fn new(
        config: HostdeckConfig,
        audit: Arc<dyn AuditStore>,
        settings: Arc<dyn SettingsStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        Arc::new(Self {
            config,
            files: FileService::new(Arc::clone(&audit)),
            audit,
            settings,
            identity,
            clients: RwLock::new(HashMap::new()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
        })
    }

    /// Register a new client connection.
    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
