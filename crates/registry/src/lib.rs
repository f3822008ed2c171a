//! Persisted control-plane state: the agent registry (`agents.json`), the
//! routing table (`routing.json`), deterministic container names, advisory
//! lock directories and the host-port hint cache.

pub mod agents;
pub mod error;
pub mod lock;
pub mod names;
pub mod port_hint;
pub mod record;
pub mod routing;

pub use {
    agents::AgentRegistry,
    error::{Error, Result},
    lock::LockDir,
    names::{CONTAINER_PREFIX, container_name, sanitize},
    record::{AgentKind, AgentRecord, BindConfig, ContainerConfig, EnvConfig, PortConfig, RunMode},
    routing::{RouteEntry, RoutingTable},
};
