//! WebSocket sessions, connection handles, heartbeat, and the registry.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod session;
