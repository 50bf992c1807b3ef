//! Gateway: HTTP + WebSocket server, protocol dispatch and the audit REST API.
//!
//! Lifecycle:
//! 1. Load config, resolve the identity secret
//! 2. Open the SQLite store
//! 3. Bind, mount `/health`, `/ws` and `/api/*`
//! 4. Serve until Ctrl-C, then close the store
//!
//! Each `/ws` connection is owned by exactly one protocol handler
//! (`monitor`, `terminal` or `files`) chosen at upgrade time.

pub mod api;
pub mod auth;
pub mod files;
pub mod monitor;
pub mod server;
pub mod state;
pub mod terminal;
pub mod ws;

pub use {
    auth::{Identity, IdentityProvider, JwtIdentityProvider, Role, sign_token, verify_token},
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
