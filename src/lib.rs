//! Signaling coordinator between browser clients and a remote media server.

pub mod config;
pub mod media;
pub mod signaling;
