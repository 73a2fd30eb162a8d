//! meshcall peering client.
//!
//! Joins a channel on a meshcall relay and keeps one negotiated peer
//! connection to every other member. The negotiation stack itself is
//! pluggable through [`negotiation::PeerConnectionFactory`].

pub mod config;
pub mod negotiation;
pub mod peering;
pub mod signaling;
