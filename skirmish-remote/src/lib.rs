pub mod client;
pub mod config;
pub mod types;

pub use client::HttpInteractionClient;
pub use config::RemoteConfig;
