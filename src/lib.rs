//! Site-specific audio resolvers for Lavalink-style playback hosts.

pub mod common;
pub mod configs;
pub mod protocol;
pub mod sources;
