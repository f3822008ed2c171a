//! Router-issued MCP sessions.
//!
//! Two namespaces that never mix: aggregated sessions (`/mcp`) carry no
//! agent binding; proxy sessions (`/mcps/<agent>/mcp`) are bound to one
//! agent. Both live in memory only and die with the process. Above a soft
//! cap the least-recently-seen session is evicted; eviction is never
//! propagated to agents.

use std::{collections::HashMap, time::Instant};

use uuid::Uuid;

/// Soft cap before LRU eviction kicks in.
const SESSION_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct McpSession {
    pub session_id: String,
    pub created_at: Instant,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct AgentProxySession {
    pub session_id: String,
    pub agent_name: String,
    pub base_url: String,
    pub created_at: Instant,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, McpSession>,
}

impl SessionStore {
    /// Create a fresh session; `initialize` always mints a new id.
    pub fn create(&mut self) -> String {
        self.evict_over_cap();
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        self.sessions.insert(id.clone(), McpSession {
            session_id: id.clone(),
            created_at: now,
            last_seen: now,
        });
        id
    }

    /// Refresh `last_seen`; false when the session is unknown.
    pub fn touch(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            },
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn evict_over_cap(&mut self) {
        while self.sessions.len() >= SESSION_CAP {
            let Some(oldest) = self
                .sessions
                .values()
                .min_by_key(|s| s.last_seen)
                .map(|s| s.session_id.clone())
            else {
                break;
            };
            self.sessions.remove(&oldest);
        }
    }
}

#[derive(Debug, Default)]
pub struct ProxySessionStore {
    sessions: HashMap<String, AgentProxySession>,
}

impl ProxySessionStore {
    pub fn create(&mut self, agent: &str, base_url: &str) -> String {
        self.evict_over_cap();
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), AgentProxySession {
            session_id: id.clone(),
            agent_name: agent.to_string(),
            base_url: base_url.to_string(),
            created_at: Instant::now(),
        });
        id
    }

    /// Look up a session and check it is bound to `agent`. Proxy sessions
    /// are never valid on another agent's plane.
    #[must_use]
    pub fn get_for_agent(&self, id: &str, agent: &str) -> Option<&AgentProxySession> {
        self.sessions.get(id).filter(|s| s.agent_name == agent)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn evict_over_cap(&mut self) {
        while self.sessions.len() >= SESSION_CAP {
            let Some(oldest) = self
                .sessions
                .values()
                .min_by_key(|s| s.created_at)
                .map(|s| s.session_id.clone())
            else {
                break;
            };
            self.sessions.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_touch_remove() {
        let mut store = SessionStore::default();
        let id = store.create();
        assert!(store.touch(&id));
        assert!(store.remove(&id));
        // Gone after removal.
        assert!(!store.touch(&id));
        assert!(!store.remove(&id));
    }

    #[test]
    fn test_initialize_always_mints_new_id() {
        let mut store = SessionStore::default();
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_eviction_over_cap() {
        let mut store = SessionStore::default();
        for _ in 0..SESSION_CAP {
            store.create();
        }
        // The next create evicts the least recently seen.
        store.create();
        assert!(store.len() <= SESSION_CAP);
    }

    #[test]
    fn test_proxy_sessions_are_agent_scoped() {
        let mut store = ProxySessionStore::default();
        let id = store.create("agent-a", "http://127.0.0.1:1/mcp");
        assert!(store.get_for_agent(&id, "agent-a").is_some());
        // The same id on another agent's plane is invalid.
        assert!(store.get_for_agent(&id, "agent-b").is_none());
    }
}
