//! meshcall signaling relay library.
//!
//! Exposes the signaling server for use in tests and embedding. The server
//! accepts WebSocket connections, tracks channel membership, pairs endpoints
//! into a full mesh, and forwards opaque handshake payloads between them.

pub mod config;
pub mod registry;
pub mod relay;
