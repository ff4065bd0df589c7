//! Shared building blocks for vigil: per-node configuration and the target and
//! port grammars used by every probing module.

pub mod config;
pub mod network;
