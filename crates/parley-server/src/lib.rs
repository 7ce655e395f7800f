//! # parley-server
//!
//! Axum HTTP + `WebSocket` chat relay.
//!
//! - [`websocket::registry`]: username → connection map, broadcast and unicast
//! - [`websocket::session`]: per-connection state machine (identify, relay, teardown)
//! - [`websocket::connection`] / [`websocket::heartbeat`]: send queue and liveness
//! - [`server`]: routes (`/api/check-name`, `/api/chat-ws`, `/health`, `/metrics`)
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::ChatServer;
pub use websocket::registry::{BroadcastReport, ConnectionRegistry};
