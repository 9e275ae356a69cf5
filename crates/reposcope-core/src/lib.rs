//! Configuration loading, secret handling, and construction of the indexing and
//! search services from configuration.

pub mod bootstrap;
pub mod config;
pub mod secret;

pub use bootstrap::Services;
pub use config::Config;
pub use secret::Secret;
