//! Solid pod collaborators for `dechat-core`.

pub mod client;
pub mod config;
pub mod identity;

pub use client::SolidPod;
pub use config::{ConfigError, PodConfig};
pub use identity::SolidIdentity;
