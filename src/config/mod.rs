//! Configuration Module
//!
//! Driver settings and their loading from files and the environment.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{DriverConfig, ProxySettings, RateLimitSettings, SessionSettings};
