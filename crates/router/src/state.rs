//! Shared router state.

use std::sync::Arc;

use tokio::sync::RwLock;

use {ploinky_config::WorkspacePaths, ploinky_registry::RoutingTable};

use crate::{
    auth::AuthGate,
    sessions::{ProxySessionStore, SessionStore},
};

pub struct RouterState {
    pub paths: WorkspacePaths,
    pub sessions: RwLock<SessionStore>,
    pub proxy_sessions: RwLock<ProxySessionStore>,
    pub auth: Arc<dyn AuthGate>,
    pub version: String,
}

impl RouterState {
    #[must_use]
    pub fn new(paths: WorkspacePaths, auth: Arc<dyn AuthGate>) -> Arc<Self> {
        Arc::new(Self {
            paths,
            sessions: RwLock::new(SessionStore::default()),
            proxy_sessions: RwLock::new(ProxySessionStore::default()),
            auth,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Snapshot the routing table from disk. Readers tolerate staleness of
    /// one reconciliation cycle; the agent manager is the writer.
    pub fn routing_table(&self) -> Result<RoutingTable, ploinky_registry::Error> {
        RoutingTable::load(&self.paths.routing_json())
    }
}
