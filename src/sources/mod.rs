pub mod clypit;
pub mod context;
pub mod getyarn;
pub mod manager;
pub mod mixcloud;
pub mod ocremix;
pub mod plugin;
pub mod pornhub;
pub mod reddit;
pub mod speech;
pub mod spotify;
pub mod stream;
pub mod tiktok;
pub mod youtube;

pub use manager::SourceManager;
pub use plugin::{AudioTrack, LoadOptions, SourcePlugin};
