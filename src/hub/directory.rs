// Live-server directory
// Registered servers, their attached client sets, and the change stamp that
// /cache/servers exposes. Mutations are atomic w.r.t. /servers readers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::net::session::Session;

/// One directory row, as served by `/servers`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub id: Uuid,
    pub name: String,
}

pub struct ServerEntry {
    pub name: String,
    pub session: Session,
    pub clients: HashMap<Uuid, Session>,
}

/// Shared map of handshake-complete servers. A server appears here exactly
/// between handshake completion and session end.
pub struct HubDirectory {
    servers: RwLock<HashMap<Uuid, ServerEntry>>,
    stamp: RwLock<DateTime<Utc>>,
}

impl HubDirectory {
    pub fn new() -> Self {
        HubDirectory {
            servers: RwLock::new(HashMap::new()),
            stamp: RwLock::new(Utc::now()),
        }
    }

    async fn touch(&self) {
        *self.stamp.write().await = Utc::now();
    }

    /// Timestamp of the last directory mutation; clients poll this to decide
    /// whether to refresh `/servers`.
    pub async fn stamp(&self) -> DateTime<Utc> {
        *self.stamp.read().await
    }

    pub async fn register_server(&self, id: Uuid, name: String, session: Session) {
        self.servers.write().await.insert(
            id,
            ServerEntry {
                name,
                session,
                clients: HashMap::new(),
            },
        );
        self.touch().await;
    }

    /// Drop a server, returning its entry so the caller can close the
    /// orphaned clients.
    pub async fn unregister_server(&self, id: Uuid) -> Option<ServerEntry> {
        let entry = self.servers.write().await.remove(&id);
        if entry.is_some() {
            self.touch().await;
        }
        entry
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.servers.read().await.contains_key(&id)
    }

    pub async fn server_session(&self, id: Uuid) -> Option<Session> {
        self.servers.read().await.get(&id).map(|e| e.session.clone())
    }

    /// Attach a client to its server. False when the server vanished between
    /// path parse and attach.
    pub async fn add_client(&self, server_id: Uuid, client: Session) -> bool {
        let mut servers = self.servers.write().await;
        match servers.get_mut(&server_id) {
            Some(entry) => {
                entry.clients.insert(client.id(), client);
                true
            }
            None => false,
        }
    }

    pub async fn remove_client(&self, server_id: Uuid, client_id: Uuid) {
        if let Some(entry) = self.servers.write().await.get_mut(&server_id) {
            entry.clients.remove(&client_id);
        }
    }

    /// Snapshot of the sessions currently attached to a server.
    pub async fn clients_of(&self, server_id: Uuid) -> Vec<Session> {
        match self.servers.read().await.get(&server_id) {
            Some(entry) => entry.clients.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Consistent snapshot for `/servers`.
    pub async fn list(&self) -> Vec<ServerInfo> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(&id, entry)| ServerInfo {
                id,
                name: entry.name.clone(),
            })
            .collect()
    }

    /// (servers, clients) for the status line.
    pub async fn counts(&self) -> (usize, usize) {
        let servers = self.servers.read().await;
        let clients = servers.values().map(|e| e.clients.len()).sum();
        (servers.len(), clients)
    }
}

impl Default for HubDirectory {
    fn default() -> Self {
        Self::new()
    }
}
