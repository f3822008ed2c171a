//! The router: one HTTP front door for every agent in the workspace.
//!
//! `/mcp` is the aggregated plane (the router is itself an MCP server that
//! fans out to agents); `/mcps/<agent>/mcp` is a per-agent proxy plane with
//! its own session namespace. Everything MCP sits behind the auth gate;
//! `/health` never does.

pub mod aggregate;
pub mod auth;
pub mod command;
pub mod proxy;
pub mod rpc;
pub mod server;
pub mod sessions;
pub mod state;

pub use {
    auth::{AllowAll, AuthDecision, AuthGate, BearerTokenGate},
    server::{build_router, serve},
    state::RouterState,
};
