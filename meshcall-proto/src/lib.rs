//! Shared protocol definitions for the meshcall signaling wire format.

pub mod codec;
pub mod signal;
